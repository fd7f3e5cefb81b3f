//! In-memory text/image dataset
//!
//! Stores every image together with several caption embeddings. Training
//! batches pair each image with the mean of a random window of its own
//! caption embeddings and draw a mismatched image from a different example.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use ndarray::{s, Array2, Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DatasetProvider, TestBatch, TrainingBatch};
use crate::error::{GanClsError, Result};

/// One image with its captions and their embeddings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Image path, relative to the manifest file
    pub image: PathBuf,
    /// Caption texts
    pub captions: Vec<String>,
    /// One embedding per caption
    pub embeddings: Vec<Vec<f32>>,
}

/// JSON manifest describing a dataset on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextImageManifest {
    /// Dataset name (e.g., "flowers")
    pub name: String,
    /// Training examples
    pub train: Vec<ManifestEntry>,
    /// Held-out examples used for sampling
    #[serde(default)]
    pub test: Vec<ManifestEntry>,
}

/// One split of the dataset
#[derive(Debug)]
struct Split {
    /// Shape (N, H, W, C), values in [-1, 1]
    images: Array4<f32>,
    /// Shape (N, K, E): K captions per image
    embeddings: Array3<f32>,
    /// N x K caption texts
    captions: Vec<Vec<String>>,
    /// Visiting order for the current epoch
    order: Vec<usize>,
    /// Position in `order`
    cursor: usize,
}

impl Split {
    fn new(
        label: &str,
        images: Array4<f32>,
        embeddings: Array3<f32>,
        captions: Vec<Vec<String>>,
    ) -> Result<Self> {
        let n = images.shape()[0];
        if embeddings.shape()[0] != n || captions.len() != n {
            return Err(GanClsError::Dataset(format!(
                "{} split has {} images, {} embedding rows and {} caption rows",
                label,
                n,
                embeddings.shape()[0],
                captions.len()
            )));
        }
        let k = embeddings.shape()[1];
        if n > 0 && k == 0 {
            return Err(GanClsError::Dataset(format!(
                "{} split has no captions per image",
                label
            )));
        }
        if let Some(bad) = captions.iter().position(|c| c.len() != k) {
            return Err(GanClsError::Dataset(format!(
                "{} example {} has {} captions, expected {}",
                label,
                bad,
                captions[bad].len(),
                k
            )));
        }

        Ok(Self {
            images,
            embeddings,
            captions,
            order: (0..n).collect(),
            cursor: 0,
        })
    }

    fn len(&self) -> usize {
        self.images.shape()[0]
    }

    fn captions_per_image(&self) -> usize {
        self.embeddings.shape()[1]
    }

    fn shuffle(&mut self, rng: &mut StdRng) {
        self.order.shuffle(rng);
        self.cursor = 0;
    }

    fn next_batch(&mut self, rng: &mut StdRng, batch_size: usize, window: usize) -> Result<TrainingBatch> {
        let n = self.len();
        if batch_size == 0 || batch_size > n {
            return Err(GanClsError::Dataset(format!(
                "batch size {} does not fit {} training examples",
                batch_size, n
            )));
        }
        if n < 2 {
            return Err(GanClsError::Dataset(
                "at least two training examples are needed to draw mismatched images".to_string(),
            ));
        }

        // Start a new epoch when the remaining examples cannot fill a batch
        if self.cursor + batch_size > n {
            debug!("Training split exhausted, reshuffling");
            self.shuffle(rng);
        }
        let indices: Vec<usize> = self.order[self.cursor..self.cursor + batch_size].to_vec();
        self.cursor += batch_size;

        let mismatched: Vec<usize> = indices
            .iter()
            .map(|&idx| {
                let other = rng.gen_range(0..n - 1);
                if other >= idx {
                    other + 1
                } else {
                    other
                }
            })
            .collect();

        let k = self.captions_per_image();
        let window = window.clamp(1, k);
        let embed_dim = self.embeddings.shape()[2];
        let mut embeddings = Array2::<f32>::zeros((batch_size, embed_dim));
        let mut captions = Vec::with_capacity(batch_size);

        for (row, &idx) in indices.iter().enumerate() {
            let chosen = index::sample(&mut *rng, k, window);
            let mut target = embeddings.row_mut(row);
            for caption_idx in chosen.iter() {
                target += &self.embeddings.slice(s![idx, caption_idx, ..]);
            }
            target /= window as f32;
            captions.push(self.captions[idx][chosen.index(0)].clone());
        }

        Ok(TrainingBatch {
            real_images: self.images.select(Axis(0), &indices),
            mismatched_images: self.images.select(Axis(0), &mismatched),
            embeddings,
            captions,
        })
    }

    fn test_batch(&self, n: usize, offset: usize, replicas: usize) -> Result<TestBatch> {
        let len = self.len();
        if len == 0 {
            return Err(GanClsError::Dataset("held-out split is empty".to_string()));
        }
        if n == 0 || replicas == 0 {
            return Err(GanClsError::Dataset(format!(
                "test batch needs n > 0 and replicas > 0, got n={} replicas={}",
                n, replicas
            )));
        }

        let indices: Vec<usize> = (0..n).map(|i| (offset + i) % len).collect();
        let k = self.captions_per_image();
        let embed_dim = self.embeddings.shape()[2];

        let mut embeddings = Array3::<f32>::zeros((replicas, n, embed_dim));
        for r in 0..replicas {
            for (i, &idx) in indices.iter().enumerate() {
                embeddings
                    .slice_mut(s![r, i, ..])
                    .assign(&self.embeddings.slice(s![idx, r % k, ..]));
            }
        }

        let captions = indices
            .iter()
            .map(|&idx| (0..replicas).map(|r| self.captions[idx][r % k].clone()).collect())
            .collect();

        Ok(TestBatch {
            images: self.images.select(Axis(0), &indices),
            embeddings,
            captions,
        })
    }
}

/// Text/image dataset held in memory
#[derive(Debug)]
pub struct TextImageDataset {
    name: String,
    train: Split,
    test: Split,
    rng: StdRng,
}

impl TextImageDataset {
    /// Build a dataset from arrays
    ///
    /// Images are (N, H, W, C) in [-1, 1]; embeddings are (N, K, E) with K
    /// captions per image. Train and test must agree on image shape and E.
    pub fn from_arrays(
        name: impl Into<String>,
        train: (Array4<f32>, Array3<f32>, Vec<Vec<String>>),
        test: (Array4<f32>, Array3<f32>, Vec<Vec<String>>),
        seed: Option<u64>,
    ) -> Result<Self> {
        let train = Split::new("train", train.0, train.1, train.2)?;
        let test = Split::new("test", test.0, test.1, test.2)?;

        if test.len() > 0 {
            if train.images.shape()[1..] != test.images.shape()[1..] {
                return Err(GanClsError::Dataset(format!(
                    "train images {:?} and test images {:?} differ in shape",
                    train.images.shape(),
                    test.images.shape()
                )));
            }
            if train.embeddings.shape()[2] != test.embeddings.shape()[2] {
                return Err(GanClsError::Dataset(
                    "train and test embeddings differ in dimension".to_string(),
                ));
            }
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut train = train;
        train.shuffle(&mut rng);

        Ok(Self {
            name: name.into(),
            train,
            test,
            rng,
        })
    }

    /// Random images and embeddings, useful for smoke runs
    pub fn synthetic(
        name: impl Into<String>,
        num_train: usize,
        num_test: usize,
        image_shape: [usize; 3],
        captions_per_image: usize,
        embed_dim: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let [h, w, c] = image_shape;

        let mut make_split = |n: usize, label: &str| {
            let images = Array4::from_shape_fn((n, h, w, c), |_| rng.gen_range(-1.0f32..=1.0));
            let embeddings =
                Array3::from_shape_fn((n, captions_per_image, embed_dim), |_| rng.gen_range(-1.0f32..=1.0));
            let captions = (0..n)
                .map(|i| {
                    (0..captions_per_image)
                        .map(|k| format!("{} example {} caption {}", label, i, k))
                        .collect()
                })
                .collect::<Vec<Vec<String>>>();
            (images, embeddings, captions)
        };

        let train = make_split(num_train, "train");
        let test = make_split(num_test, "test");
        Self::from_arrays(name, train, test, seed.map(|s| s.wrapping_add(1)))
    }

    /// Load a dataset from a JSON manifest
    ///
    /// Images are resized to `output_size` x `output_size` and converted to
    /// RGB (`c_dim == 3`) or grayscale (`c_dim == 1`).
    pub fn from_manifest<P: AsRef<Path>>(
        path: P,
        output_size: u32,
        c_dim: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let manifest: TextImageManifest = serde_json::from_str(&content)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        info!(
            "Loading dataset '{}' from {} ({} train, {} test)",
            manifest.name,
            path.display(),
            manifest.train.len(),
            manifest.test.len()
        );

        let train = load_entries(&manifest.train, base_dir, output_size, c_dim)?;
        let test = load_entries(&manifest.test, base_dir, output_size, c_dim)?;
        Self::from_arrays(manifest.name, train, test, seed)
    }
}

impl DatasetProvider for TextImageDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn image_shape(&self) -> [usize; 3] {
        let shape = self.train.images.shape();
        [shape[1], shape[2], shape[3]]
    }

    fn embedding_dim(&self) -> usize {
        self.train.embeddings.shape()[2]
    }

    fn num_train_examples(&self) -> usize {
        self.train.len()
    }

    fn num_test_examples(&self) -> usize {
        self.test.len()
    }

    fn next_batch(&mut self, batch_size: usize, window: usize) -> Result<TrainingBatch> {
        self.train.next_batch(&mut self.rng, batch_size, window)
    }

    fn next_batch_test(&mut self, n: usize, offset: usize, replicas: usize) -> Result<TestBatch> {
        self.test.test_batch(n, offset, replicas)
    }
}

/// Decode manifest entries into split arrays
fn load_entries(
    entries: &[ManifestEntry],
    base_dir: &Path,
    output_size: u32,
    c_dim: usize,
) -> Result<(Array4<f32>, Array3<f32>, Vec<Vec<String>>)> {
    if c_dim != 1 && c_dim != 3 {
        return Err(GanClsError::Dataset(format!("unsupported channel count {}", c_dim)));
    }
    let size = output_size as usize;
    let k = entries.first().map(|e| e.embeddings.len()).unwrap_or(1);
    let embed_dim = entries
        .first()
        .and_then(|e| e.embeddings.first())
        .map(|v| v.len())
        .unwrap_or(0);

    let mut images = Array4::<f32>::zeros((entries.len(), size, size, c_dim));
    let mut embeddings = Array3::<f32>::zeros((entries.len(), k, embed_dim));
    let mut captions = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        if entry.embeddings.len() != k || entry.captions.len() != k {
            return Err(GanClsError::Dataset(format!(
                "{}: expected {} captions and embeddings, found {} and {}",
                entry.image.display(),
                k,
                entry.captions.len(),
                entry.embeddings.len()
            )));
        }

        let img = image::open(base_dir.join(&entry.image))?.resize_exact(
            output_size,
            output_size,
            FilterType::Lanczos3,
        );
        let pixels: Vec<u8> = if c_dim == 3 {
            img.to_rgb8().into_raw()
        } else {
            img.to_luma8().into_raw()
        };
        let mut target = images.index_axis_mut(Axis(0), i);
        for (dst, &src) in target.iter_mut().zip(pixels.iter()) {
            *dst = src as f32 / 127.5 - 1.0;
        }

        for (j, vector) in entry.embeddings.iter().enumerate() {
            if vector.len() != embed_dim {
                return Err(GanClsError::Dataset(format!(
                    "{}: embedding {} has dimension {}, expected {}",
                    entry.image.display(),
                    j,
                    vector.len(),
                    embed_dim
                )));
            }
            for (e, &value) in vector.iter().enumerate() {
                embeddings[[i, j, e]] = value;
            }
        }
        captions.push(entry.captions.clone());
    }

    Ok((images, embeddings, captions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn small_dataset(num_train: usize, seed: u64) -> TextImageDataset {
        TextImageDataset::synthetic("toy", num_train, 5, [16, 16, 3], 4, 8, Some(seed)).unwrap()
    }

    #[test]
    fn test_batch_shapes() {
        let mut dataset = small_dataset(10, 1);
        let batch = dataset.next_batch(4, 2).unwrap();

        assert_eq!(batch.real_images.shape(), &[4, 16, 16, 3]);
        assert_eq!(batch.mismatched_images.shape(), &[4, 16, 16, 3]);
        assert_eq!(batch.embeddings.shape(), &[4, 8]);
        assert_eq!(batch.captions.len(), 4);
        assert_eq!(batch.batch_size(), 4);
    }

    #[test]
    fn test_mismatched_images_differ_from_real() {
        // Two examples: the mismatched image is always the other one
        let mut dataset = small_dataset(2, 3);
        for _ in 0..10 {
            let batch = dataset.next_batch(2, 1).unwrap();
            for i in 0..2 {
                assert_ne!(
                    batch.real_images.index_axis(Axis(0), i),
                    batch.mismatched_images.index_axis(Axis(0), i)
                );
            }
        }
    }

    #[test]
    fn test_full_window_averages_all_captions() {
        let images = Array4::<f32>::zeros((2, 4, 4, 1));
        let mut embeddings = Array3::<f32>::zeros((2, 2, 3));
        embeddings.slice_mut(s![0, 0, ..]).fill(1.0);
        embeddings.slice_mut(s![0, 1, ..]).fill(3.0);
        embeddings.slice_mut(s![1, 0, ..]).fill(-2.0);
        embeddings.slice_mut(s![1, 1, ..]).fill(-4.0);
        let captions = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
        ];
        let empty = (
            Array4::<f32>::zeros((0, 4, 4, 1)),
            Array3::<f32>::zeros((0, 2, 3)),
            Vec::new(),
        );

        let mut dataset =
            TextImageDataset::from_arrays("avg", (images, embeddings, captions), empty, Some(0)).unwrap();

        // A window larger than K is clamped to K
        let batch = dataset.next_batch(2, 10).unwrap();
        let mut means: Vec<f32> = batch.embeddings.column(0).to_vec();
        means.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(means, vec![-3.0, 2.0]);
    }

    #[test]
    fn test_cursor_wraps_at_epoch_end() {
        let mut dataset = small_dataset(5, 7);

        // Two batches of two fit; the third starts a new epoch
        for _ in 0..10 {
            let batch = dataset.next_batch(2, 4).unwrap();
            assert_eq!(batch.batch_size(), 2);
        }
    }

    #[test]
    fn test_batch_errors() {
        let mut dataset = small_dataset(3, 9);
        assert!(matches!(dataset.next_batch(4, 1), Err(GanClsError::Dataset(_))));
        assert!(dataset.next_batch(0, 1).is_err());

        let mut single = small_dataset(1, 9);
        assert!(single.next_batch(1, 1).is_err());
    }

    #[test]
    fn test_next_batch_test_layout() {
        let mut dataset = small_dataset(4, 11);
        let batch = dataset.next_batch_test(3, 4, 2).unwrap();

        assert_eq!(batch.images.shape(), &[3, 16, 16, 3]);
        assert_eq!(batch.embeddings.shape(), &[2, 3, 8]);
        assert_eq!(batch.captions.len(), 3);
        assert_eq!(batch.captions[0].len(), 2);

        // offset 4 wraps to example 4, then 0 and 1
        assert_eq!(batch.captions[0][0], "test example 4 caption 0");
        assert_eq!(batch.captions[1][1], "test example 0 caption 1");
        assert_eq!(batch.captions[2][0], "test example 1 caption 0");
    }

    #[test]
    fn test_inconsistent_arrays_rejected() {
        let train = (
            Array4::<f32>::zeros((3, 4, 4, 3)),
            Array3::<f32>::zeros((2, 1, 5)),
            vec![vec!["x".to_string()]; 3],
        );
        let test = (
            Array4::<f32>::zeros((0, 4, 4, 3)),
            Array3::<f32>::zeros((0, 1, 5)),
            Vec::new(),
        );
        assert!(TextImageDataset::from_arrays("bad", train, test, None).is_err());
    }

    #[test]
    fn test_from_manifest() {
        let dir = tempfile::tempdir().unwrap();

        for (i, color) in [[255u8, 0, 0], [0, 255, 0], [0, 0, 255]].iter().enumerate() {
            let img = RgbImage::from_pixel(32, 32, Rgb(*color));
            img.save(dir.path().join(format!("img{}.png", i))).unwrap();
        }

        let entry = |i: usize| ManifestEntry {
            image: PathBuf::from(format!("img{}.png", i)),
            captions: vec![format!("caption {}a", i), format!("caption {}b", i)],
            embeddings: vec![vec![i as f32; 6], vec![i as f32 + 0.5; 6]],
        };
        let manifest = TextImageManifest {
            name: "colors".to_string(),
            train: vec![entry(0), entry(1)],
            test: vec![entry(2)],
        };
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let mut dataset = TextImageDataset::from_manifest(&manifest_path, 16, 3, Some(5)).unwrap();
        assert_eq!(dataset.name(), "colors");
        assert_eq!(dataset.image_shape(), [16, 16, 3]);
        assert_eq!(dataset.embedding_dim(), 6);
        assert_eq!(dataset.num_train_examples(), 2);
        assert_eq!(dataset.num_test_examples(), 1);

        let test = dataset.next_batch_test(1, 0, 1).unwrap();
        // Pure blue rescaled to [-1, 1]
        assert!((test.images[[0, 3, 3, 0]] + 1.0).abs() < 0.02);
        assert!((test.images[[0, 3, 3, 2]] - 1.0).abs() < 0.02);
        assert_eq!(test.embeddings[[0, 0, 0]], 2.0);
    }
}
