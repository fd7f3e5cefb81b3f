//! # GAN-CLS Text-to-Image Synthesis
//!
//! This crate trains a conditional Generative Adversarial Network that
//! synthesizes images from caption embeddings. The discriminator is
//! matching-aware: besides real and generated images it sees real images
//! paired with the wrong caption, and learns to reject them.
//!
//! ## Modules
//!
//! - `context`: Execution context (device, seed, noise sampling)
//! - `data`: Text/image datasets and batching
//! - `model`: Embedding compressor, Generator and Discriminator
//! - `training`: Training loop, loss composition and metrics
//! - `utils`: Configuration, checkpoints and sample grid export

pub mod context;
pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use context::ExecutionContext;
pub use data::{DatasetProvider, TestBatch, TextImageDataset, TrainingBatch};
pub use error::{GanClsError, Result};
pub use model::{Discriminator, DiscriminatorConfig, EmbeddingCompressor, GanCls, Generator, GeneratorConfig};
pub use training::{LossComposer, SampleGrid, Trainer, TrainingConfig, TrainingMetrics, TrainingState};
pub use utils::{CheckpointManager, Config, PngGridWriter, SampleWriter};
