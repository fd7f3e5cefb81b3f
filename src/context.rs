//! Execution context threaded through model construction and training
//!
//! Holds the libtorch device and the random seed for a run. It is created
//! once at process start and passed by reference to every component that
//! allocates tensors.

use tch::{Device, Kind, Tensor};
use tracing::debug;

/// Explicit numerical-engine context for one process
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    device: Device,
    seed: Option<i64>,
}

impl ExecutionContext {
    /// Create a context, seeding libtorch when a seed is given
    pub fn new(device: Device, seed: Option<i64>) -> Self {
        if let Some(seed) = seed {
            tch::manual_seed(seed);
            debug!("Seeded libtorch with {}", seed);
        }
        Self { device, seed }
    }

    /// CPU context without a fixed seed
    pub fn cpu() -> Self {
        Self::new(Device::Cpu, None)
    }

    /// Device all tensors of this run live on
    pub fn device(&self) -> Device {
        self.device
    }

    /// Seed used at creation, if any
    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    /// Draw a noise batch uniformly from [-1, 1]
    ///
    /// Returns a tensor of shape (n, z_dim)
    pub fn uniform_noise(&self, n: i64, z_dim: i64) -> Tensor {
        Tensor::rand([n, z_dim], (Kind::Float, self.device)) * 2.0 - 1.0
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_noise_range() {
        let ctx = ExecutionContext::new(Device::Cpu, Some(7));
        let noise = ctx.uniform_noise(64, 100);

        assert_eq!(noise.size(), vec![64, 100]);
        let min_val = noise.min().double_value(&[]);
        let max_val = noise.max().double_value(&[]);
        assert!(min_val >= -1.0 && max_val <= 1.0);
        // Draws should cover both signs
        assert!(min_val < 0.0 && max_val > 0.0);
    }

    #[test]
    fn test_default_context() {
        let ctx = ExecutionContext::default();
        assert_eq!(ctx.device(), Device::Cpu);
        assert_eq!(ctx.seed(), None);
    }
}
