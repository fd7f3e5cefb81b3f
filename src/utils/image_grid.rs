//! Image grid export for monitoring samples
//!
//! Generated batches are tiled into a single RGB raster and written as PNG.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tch::{Device, Kind, Tensor};

use crate::error::{GanClsError, Result};

/// Destination for sample grids produced during training
pub trait SampleWriter {
    /// Write a batch of images in `[N, H, W, C]` layout, values in [-1, 1]
    fn write(&mut self, images: &Tensor, path: &Path) -> Result<()>;
}

/// Writes sample grids as PNG files
#[derive(Debug, Clone, Copy, Default)]
pub struct PngGridWriter;

impl SampleWriter for PngGridWriter {
    fn write(&mut self, images: &Tensor, path: &Path) -> Result<()> {
        let grid = tile_images(images)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        grid.save(path)?;
        Ok(())
    }
}

/// Grid shape `(rows, cols)` for `n` images
///
/// Rows are `floor(sqrt n)` and columns `ceil(sqrt n)`; `n` must fill the
/// grid exactly.
pub fn manifold_size(n: usize) -> Result<(usize, usize)> {
    let root = (n as f64).sqrt();
    let rows = root.floor() as usize;
    let cols = root.ceil() as usize;
    if n == 0 || rows * cols != n {
        return Err(GanClsError::Config(format!(
            "cannot arrange {} samples in a {}x{} grid",
            n, rows, cols
        )));
    }
    Ok((rows, cols))
}

/// Location of the sample grid for a given epoch and batch index
pub fn sample_path<P: AsRef<Path>>(sample_dir: P, epoch: usize, idx: usize) -> PathBuf {
    sample_dir
        .as_ref()
        .join("GANCLS")
        .join(format!("train_{:02}_{:04}.png", epoch, idx))
}

/// Map a value in [-1, 1] to a byte
fn to_pixel(value: f32) -> u8 {
    ((value + 1.0) / 2.0 * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Tile `[N, H, W, C]` images into one RGB raster
pub fn tile_images(images: &Tensor) -> Result<RgbImage> {
    let size = images.size();
    if size.len() != 4 || !(size[3] == 1 || size[3] == 3) {
        return Err(GanClsError::shape("sample grid images", "[N, H, W, 1 | 3]", &size));
    }
    let (n, h, w, c) = (size[0] as usize, size[1] as usize, size[2] as usize, size[3] as usize);
    let (rows, cols) = manifold_size(n)?;

    let values = Vec::<f32>::try_from(
        &images
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous()
            .view(-1),
    )?;

    let mut grid = RgbImage::new((cols * w) as u32, (rows * h) as u32);
    for i in 0..n {
        let (row, col) = (i / cols, i % cols);
        for y in 0..h {
            for x in 0..w {
                let base = ((i * h + y) * w + x) * c;
                let pixel = if c == 1 {
                    let v = to_pixel(values[base]);
                    Rgb([v, v, v])
                } else {
                    Rgb([
                        to_pixel(values[base]),
                        to_pixel(values[base + 1]),
                        to_pixel(values[base + 2]),
                    ])
                };
                grid.put_pixel((col * w + x) as u32, (row * h + y) as u32, pixel);
            }
        }
    }

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifold_size() {
        assert_eq!(manifold_size(64).unwrap(), (8, 8));
        assert_eq!(manifold_size(4).unwrap(), (2, 2));
        assert_eq!(manifold_size(6).unwrap(), (2, 3));
        assert_eq!(manifold_size(1).unwrap(), (1, 1));
        assert!(manifold_size(5).is_err());
        assert!(manifold_size(0).is_err());
    }

    #[test]
    fn test_sample_path() {
        let path = sample_path("samples", 3, 17);
        assert_eq!(path, PathBuf::from("samples/GANCLS/train_03_0017.png"));
    }

    #[test]
    fn test_pixel_rescaling() {
        assert_eq!(to_pixel(-1.0), 0);
        assert_eq!(to_pixel(1.0), 255);
        assert_eq!(to_pixel(0.0), 128);
        assert_eq!(to_pixel(3.0), 255);
        assert_eq!(to_pixel(-2.0), 0);
    }

    #[test]
    fn test_tile_layout() {
        // Image i is filled with a distinct value so its tile can be located
        let values: Vec<f32> = (0..6).map(|i| -1.0 + 0.4 * i as f32).collect();
        let images = Tensor::from_slice(&values)
            .view([6, 1, 1, 1])
            .repeat([1, 2, 3, 1]);

        let grid = tile_images(&images).unwrap();
        assert_eq!(grid.dimensions(), (9, 4));

        // Image 4 lands on row 1, column 1
        let expected = to_pixel(values[4]);
        assert_eq!(grid.get_pixel(3, 2), &Rgb([expected, expected, expected]));
        assert_eq!(grid.get_pixel(5, 3), &Rgb([expected, expected, expected]));
        assert_eq!(grid.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_png_writer_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_path(dir.path(), 0, 1);
        let images = Tensor::rand([4, 8, 8, 3], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;

        PngGridWriter.write(&images, &path).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (16, 16));
    }

    #[test]
    fn test_rejects_bad_layout() {
        let images = Tensor::zeros([4, 3, 8, 8], (Kind::Float, Device::Cpu));
        assert!(tile_images(&images).is_err());

        let images = Tensor::zeros([5, 8, 8, 3], (Kind::Float, Device::Cpu));
        assert!(tile_images(&images).is_err());
    }
}
