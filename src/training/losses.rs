//! Loss functions for matching-aware GAN training
//!
//! The discriminator sees three kinds of pairs: real image with its caption,
//! real image with a wrong caption, and generated image with the caption it
//! was conditioned on. Only the first is labeled real.

use tch::{Reduction, Tensor};

use crate::error::{GanClsError, Result};

/// Mean binary cross entropy of `logits` against a constant `target`
pub fn bce_with_logits(logits: &Tensor, target: f64) -> Tensor {
    let targets = Tensor::full_like(logits, target);
    logits.binary_cross_entropy_with_logits::<Tensor>(&targets, None, None, Reduction::Mean)
}

/// The three discriminator loss terms and their blend
#[derive(Debug)]
pub struct DiscriminatorLosses {
    /// Generated image with its caption, target 0
    pub synthetic: Tensor,
    /// Real image with its caption, target `real_label`
    pub real_match: Tensor,
    /// Real image with a wrong caption, target 0
    pub real_mismatch: Tensor,
    /// `real_match + alpha * real_mismatch + (1 - alpha) * synthetic`
    pub total: Tensor,
}

/// Combines discriminator logits into the two training objectives
#[derive(Debug, Clone, Copy)]
pub struct LossComposer {
    /// Weight of the mismatched-caption term; `1 - alpha` weighs the synthetic term
    pub alpha: f64,
    /// Smoothed target for real matching pairs
    pub real_label: f64,
}

impl Default for LossComposer {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            real_label: 0.9,
        }
    }
}

impl LossComposer {
    pub fn new(alpha: f64, real_label: f64) -> Self {
        Self { alpha, real_label }
    }

    /// Discriminator objective from the three logit batches
    pub fn discriminator_losses(
        &self,
        synthetic_logits: &Tensor,
        real_match_logits: &Tensor,
        real_mismatch_logits: &Tensor,
    ) -> Result<DiscriminatorLosses> {
        let expected = synthetic_logits.size();
        for (name, logits) in [
            ("real-match logits", real_match_logits),
            ("real-mismatch logits", real_mismatch_logits),
        ] {
            if logits.size() != expected {
                return Err(GanClsError::shape(name, &expected, logits.size()));
            }
        }

        let synthetic = bce_with_logits(synthetic_logits, 0.0);
        let real_match = bce_with_logits(real_match_logits, self.real_label);
        let real_mismatch = bce_with_logits(real_mismatch_logits, 0.0);

        let total = &real_match + &real_mismatch * self.alpha + &synthetic * (1.0 - self.alpha);

        Ok(DiscriminatorLosses {
            synthetic,
            real_match,
            real_mismatch,
            total,
        })
    }

    /// Generator objective: generated pairs should be scored as real
    pub fn generator_loss(&self, synthetic_logits: &Tensor) -> Tensor {
        bce_with_logits(synthetic_logits, 1.0)
    }
}
