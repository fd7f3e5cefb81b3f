//! Training module for GAN-CLS
//!
//! This module provides:
//! - Training loop implementation
//! - Matching-aware loss composition
//! - Step cadences, training configuration and metrics
//! - Adam with checkpointable moments

mod cadence;
mod losses;
mod metrics;
mod optimizer;
mod trainer;

pub use cadence::Cadence;
pub use losses::{bce_with_logits, DiscriminatorLosses, LossComposer};
pub use metrics::{StepRecord, TrainingMetrics};
pub use optimizer::Adam;
pub use trainer::{
    discriminator_step, generator_step, DiscriminatorStepLosses, SampleGrid, Trainer,
    TrainingConfig, TrainingState,
};
