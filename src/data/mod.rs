//! Data module providing (image, caption embedding) batches
//!
//! This module provides:
//! - The `DatasetProvider` interface consumed by the trainer
//! - An in-memory text/image dataset with a JSON manifest loader
//! - Conversion from ndarray batches to tch tensors

mod convert;
mod dataset;

pub use convert::array_to_tensor;
pub use dataset::{ManifestEntry, TextImageDataset, TextImageManifest};

use ndarray::{Array2, Array3, Array4};

use crate::error::Result;

/// One training batch of matching and mismatched pairs
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    /// Images paired with `embeddings`, shape (B, H, W, C) in [-1, 1]
    pub real_images: Array4<f32>,
    /// Images never paired with their own caption, shape (B, H, W, C)
    pub mismatched_images: Array4<f32>,
    /// Caption embeddings, shape (B, E)
    pub embeddings: Array2<f32>,
    /// One caption per example, for diagnostics only
    pub captions: Vec<String>,
}

impl TrainingBatch {
    pub fn batch_size(&self) -> usize {
        self.real_images.shape()[0]
    }
}

/// Held-out batch used to condition the monitoring samples
#[derive(Debug, Clone)]
pub struct TestBatch {
    /// Images of the selected examples, shape (N, H, W, C)
    pub images: Array4<f32>,
    /// Caption embeddings per replica, shape (R, N, E)
    pub embeddings: Array3<f32>,
    /// Captions indexed as `[example][replica]`
    pub captions: Vec<Vec<String>>,
}

/// Source of training and sampling batches
pub trait DatasetProvider {
    /// Dataset name, part of the checkpoint directory key
    fn name(&self) -> &str;

    /// Image shape as `[height, width, channels]`
    fn image_shape(&self) -> [usize; 3];

    /// Dimension of the caption embeddings
    fn embedding_dim(&self) -> usize;

    /// Number of training examples
    fn num_train_examples(&self) -> usize;

    /// Number of held-out examples
    fn num_test_examples(&self) -> usize;

    /// Next training batch, advancing the internal cursor
    ///
    /// Each embedding averages `window` captions of its image. The cursor
    /// wraps (and reshuffles) at the end of an epoch.
    fn next_batch(&mut self, batch_size: usize, window: usize) -> Result<TrainingBatch>;

    /// `n` held-out examples starting at `offset` with `replicas` captions each
    fn next_batch_test(&mut self, n: usize, offset: usize, replicas: usize) -> Result<TestBatch>;
}
