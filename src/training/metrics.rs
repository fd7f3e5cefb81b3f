//! Training metrics for monitoring GAN-CLS progress
//!
//! Records every step's losses and per-epoch averages.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Losses of one optimization step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step counter after the update
    pub step: u64,
    pub epoch: usize,
    pub d_loss: f64,
    pub g_loss: f64,
    pub d_real_match: f64,
    pub d_real_mismatch: f64,
    pub d_synthetic: f64,
}

/// Metrics collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Every step of the run, in order
    pub steps: Vec<StepRecord>,
    /// Generator losses per epoch
    pub gen_losses: Vec<f64>,
    /// Discriminator losses per epoch
    pub disc_losses: Vec<f64>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step
    pub fn record_step(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Record epoch averages
    pub fn record_epoch(&mut self, gen_loss: f64, disc_loss: f64) {
        self.gen_losses.push(gen_loss);
        self.disc_losses.push(disc_loss);
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.gen_losses.len()
    }

    /// Get number of recorded steps
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Get latest generator loss
    pub fn latest_gen_loss(&self) -> Option<f64> {
        self.steps.last().map(|r| r.g_loss)
    }

    /// Get latest discriminator loss
    pub fn latest_disc_loss(&self) -> Option<f64> {
        self.steps.last().map(|r| r.d_loss)
    }

    /// Calculate moving average of per-epoch generator loss
    pub fn gen_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.gen_losses, window)
    }

    /// Calculate moving average of per-epoch discriminator loss
    pub fn disc_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.disc_losses, window)
    }

    /// Check if training appears to have collapsed
    ///
    /// Mode collapse indicators:
    /// - Discriminator loss very low (can easily distinguish)
    /// - Generator loss very high (can't fool discriminator)
    pub fn check_mode_collapse(&self, window: usize) -> bool {
        if self.num_epochs() < window {
            return false;
        }

        let disc_ma = self.disc_loss_ma(window);
        let gen_ma = self.gen_loss_ma(window);

        disc_ma < 0.1 && gen_ma > 5.0
    }

    /// Save per-step metrics to a CSV file
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.steps {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load per-step metrics from a CSV file, rebuilding epoch averages
    pub fn load_csv<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.deserialize() {
            let record: StepRecord = result?;
            metrics.record_step(record);
        }

        let epochs = metrics.steps.iter().map(|r| r.epoch).max().map_or(0, |e| e + 1);
        for epoch in 0..epochs {
            let in_epoch: Vec<&StepRecord> =
                metrics.steps.iter().filter(|r| r.epoch == epoch).collect();
            if in_epoch.is_empty() {
                continue;
            }
            let n = in_epoch.len() as f64;
            let gen = in_epoch.iter().map(|r| r.g_loss).sum::<f64>() / n;
            let disc = in_epoch.iter().map(|r| r.d_loss).sum::<f64>() / n;
            metrics.record_epoch(gen, disc);
        }

        Ok(metrics)
    }
}

/// Calculate moving average of last `window` values
fn moving_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = window.min(values.len());
    let sum: f64 = values.iter().rev().take(n).sum();
    sum / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: u64, epoch: usize, d_loss: f64, g_loss: f64) -> StepRecord {
        StepRecord {
            step,
            epoch,
            d_loss,
            g_loss,
            d_real_match: d_loss / 2.0,
            d_real_mismatch: d_loss / 4.0,
            d_synthetic: d_loss / 4.0,
        }
    }

    #[test]
    fn test_training_metrics() {
        let mut metrics = TrainingMetrics::new();

        metrics.record_step(record(2, 0, 1.5, 0.8));
        metrics.record_step(record(3, 0, 1.3, 0.75));
        metrics.record_epoch(0.775, 1.4);

        assert_eq!(metrics.num_steps(), 2);
        assert_eq!(metrics.num_epochs(), 1);
        assert_eq!(metrics.latest_disc_loss(), Some(1.3));
        assert_eq!(metrics.latest_gen_loss(), Some(0.75));
    }

    #[test]
    fn test_mode_collapse_detection() {
        let mut metrics = TrainingMetrics::new();
        for _ in 0..9 {
            metrics.record_epoch(6.0, 0.05);
        }
        assert!(!metrics.check_mode_collapse(10));

        metrics.record_epoch(6.0, 0.05);
        assert!(metrics.check_mode_collapse(10));

        metrics.record_epoch(0.7, 1.2);
        assert!((metrics.gen_loss_ma(2) - 3.35).abs() < 1e-12);
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut metrics = TrainingMetrics::new();
        metrics.record_step(record(2, 0, 1.0, 2.0));
        metrics.record_step(record(3, 0, 3.0, 4.0));
        metrics.record_step(record(4, 1, 0.5, 0.5));
        metrics.save_csv(&path).unwrap();

        let loaded = TrainingMetrics::load_csv(&path).unwrap();
        assert_eq!(loaded.steps, metrics.steps);
        assert_eq!(loaded.disc_losses, vec![2.0, 0.5]);
        assert_eq!(loaded.gen_losses, vec![3.0, 0.5]);
    }
}
