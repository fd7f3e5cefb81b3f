//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities
//! - Sample grid export

mod checkpoint;
mod config;
mod image_grid;

pub use checkpoint::{CheckpointManager, CheckpointMeta, ModelIdentity};
pub use config::{Config, DataConfig, ModelConfig, TrainingConfigFile};
pub use image_grid::{manifold_size, sample_path, tile_images, PngGridWriter, SampleWriter};
