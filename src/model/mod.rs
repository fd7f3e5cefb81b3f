//! Model module containing the GAN-CLS architecture components
//!
//! This module provides:
//! - Embedding compressor shared in design (not in weights) by both networks
//! - Generator network for synthesizing images from noise and captions
//! - Discriminator network scoring (image, caption) pairs
//! - GanCls wrapper owning the two disjoint parameter sets

mod discriminator;
mod embedding;
mod gancls;
mod generator;
pub mod layers;

pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use embedding::EmbeddingCompressor;
pub use gancls::GanCls;
pub use generator::{Generator, GeneratorConfig};
