//! Configuration management
//!
//! Provides unified configuration for the entire GAN-CLS pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointManager, ModelIdentity};
use crate::context::ExecutionContext;
use crate::error::{GanClsError, Result};
use crate::model::{DiscriminatorConfig, GeneratorConfig};
use crate::training::{Cadence, TrainingConfig};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
}

/// Data-related configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Dataset name, part of the checkpoint directory
    pub dataset_name: String,
    /// JSON manifest listing images, captions and embeddings
    pub manifest_path: Option<PathBuf>,
    /// Captions averaged into each training embedding
    pub caption_window: usize,
    /// Seed for shuffling and mismatch sampling
    pub seed: Option<u64>,
}

/// Model-related configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Noise dimension
    pub z_dim: i64,
    /// Raw caption embedding dimension
    pub embed_dim: i64,
    /// Compressed conditioning dimension
    pub compressed_embed_dim: i64,
    /// Base filters for generator
    pub gf_dim: i64,
    /// Base filters for discriminator
    pub df_dim: i64,
    /// Image channels: 1 or 3
    pub c_dim: i64,
    /// Output image side length
    pub output_size: i64,
}

/// Training-related configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfigFile {
    /// Number of epochs
    pub epoch: usize,
    pub batch_size: usize,
    /// Sample grid size
    pub sample_num: usize,
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Weight of the mismatched-caption term
    pub alpha: f64,
    /// Smoothed target for real matching pairs
    pub real_label: f64,
    /// Checkpoint directory
    pub checkpoint_dir: PathBuf,
    /// Sample grid directory
    pub sample_dir: PathBuf,
    pub sample_every: u64,
    pub sample_offset: u64,
    pub checkpoint_every: u64,
    pub checkpoint_offset: u64,
    /// Snapshots kept on disk, 0 keeps all
    pub max_to_keep: usize,
    /// Device: "cpu" or "cuda"
    pub device: String,
    /// Seed for libtorch
    pub seed: Option<i64>,
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                dataset_name: "flowers".to_string(),
                manifest_path: None,
                caption_window: 4,
                seed: None,
            },
            model: ModelConfig {
                z_dim: 100,
                embed_dim: 1024,
                compressed_embed_dim: 128,
                gf_dim: 128,
                df_dim: 64,
                c_dim: 3,
                output_size: 64,
            },
            training: TrainingConfigFile {
                epoch: 25,
                batch_size: 64,
                sample_num: 64,
                learning_rate: 2e-4,
                beta1: 0.5,
                alpha: 0.5,
                real_label: 0.9,
                checkpoint_dir: PathBuf::from("checkpoint"),
                sample_dir: PathBuf::from("samples"),
                sample_every: 100,
                sample_offset: 1,
                checkpoint_every: 500,
                checkpoint_offset: 2,
                max_to_keep: 5,
                device: "cpu".to_string(),
                seed: None,
                show_progress: true,
            },
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from TOML or JSON depending on the extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_toml(path) {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save as TOML or JSON depending on the extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if is_toml(path) {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Get device from configuration
    pub fn device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Execution context for this configuration's device and seed
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.device(), self.training.seed)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        let t = &self.training;

        if m.z_dim <= 0 || m.embed_dim <= 0 || m.compressed_embed_dim <= 0 {
            return invalid("z_dim, embed_dim and compressed_embed_dim must be > 0");
        }
        if m.gf_dim <= 0 || m.df_dim <= 0 {
            return invalid("gf_dim and df_dim must be > 0");
        }
        if m.output_size <= 0 || m.output_size % 16 != 0 {
            return invalid(format!(
                "output_size must be a positive multiple of 16, got {}",
                m.output_size
            ));
        }
        if m.compressed_embed_dim >= m.embed_dim {
            return invalid(format!(
                "compressed_embed_dim ({}) must be smaller than embed_dim ({})",
                m.compressed_embed_dim, m.embed_dim
            ));
        }
        if m.c_dim != 1 && m.c_dim != 3 {
            return invalid(format!("c_dim must be 1 or 3, got {}", m.c_dim));
        }
        if self.data.caption_window == 0 {
            return invalid("caption_window must be > 0");
        }
        if t.epoch == 0 || t.batch_size == 0 || t.sample_num == 0 {
            return invalid("epoch, batch_size and sample_num must be > 0");
        }
        let s16 = (m.output_size / 16) as usize;
        if t.batch_size * s16 * s16 < 2 {
            return invalid(format!(
                "batch_size {} leaves one value per batch-norm channel at output_size {}",
                t.batch_size, m.output_size
            ));
        }
        if t.sample_num != t.batch_size {
            return invalid(format!(
                "sample_num ({}) must equal batch_size ({})",
                t.sample_num, t.batch_size
            ));
        }
        if t.learning_rate.is_nan() || t.learning_rate <= 0.0 {
            return invalid("learning_rate must be > 0");
        }
        if !(0.0..1.0).contains(&t.beta1) {
            return invalid(format!("beta1 must lie in [0, 1), got {}", t.beta1));
        }
        if !(0.0..=1.0).contains(&t.alpha) {
            return invalid(format!("alpha must lie in [0, 1], got {}", t.alpha));
        }
        if !(t.real_label > 0.0 && t.real_label <= 1.0) {
            return invalid(format!("real_label must lie in (0, 1], got {}", t.real_label));
        }
        if t.sample_every == 0 || t.sample_offset >= t.sample_every {
            return invalid(format!(
                "sample_offset ({}) must be smaller than sample_every ({})",
                t.sample_offset, t.sample_every
            ));
        }
        if t.checkpoint_every == 0 || t.checkpoint_offset >= t.checkpoint_every {
            return invalid(format!(
                "checkpoint_offset ({}) must be smaller than checkpoint_every ({})",
                t.checkpoint_offset, t.checkpoint_every
            ));
        }
        Ok(())
    }

    /// Trainer settings
    pub fn training_config(&self) -> TrainingConfig {
        let t = &self.training;
        TrainingConfig {
            epochs: t.epoch,
            batch_size: t.batch_size,
            sample_num: t.sample_num,
            learning_rate: t.learning_rate,
            beta1: t.beta1,
            alpha: t.alpha,
            real_label: t.real_label,
            caption_window: self.data.caption_window,
            sample_dir: t.sample_dir.clone(),
            sample_cadence: Cadence::new(t.sample_every, t.sample_offset),
            checkpoint_cadence: Cadence::new(t.checkpoint_every, t.checkpoint_offset),
            show_progress: t.show_progress,
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            z_dim: self.model.z_dim,
            embed_dim: self.model.embed_dim,
            compressed_embed_dim: self.model.compressed_embed_dim,
            gf_dim: self.model.gf_dim,
            c_dim: self.model.c_dim,
            output_size: self.model.output_size,
        }
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig {
            embed_dim: self.model.embed_dim,
            compressed_embed_dim: self.model.compressed_embed_dim,
            df_dim: self.model.df_dim,
            c_dim: self.model.c_dim,
            output_size: self.model.output_size,
        }
    }

    /// Checkpoint manager keyed by the configured dataset name
    pub fn checkpoint_manager(&self) -> CheckpointManager {
        self.checkpoint_manager_for(&self.data.dataset_name)
    }

    /// Checkpoint manager for the dataset actually being trained on
    pub fn checkpoint_manager_for(&self, dataset_name: &str) -> CheckpointManager {
        CheckpointManager::new(
            &self.training.checkpoint_dir,
            ModelIdentity::new(
                dataset_name,
                self.training.batch_size,
                self.model.output_size as usize,
            ),
            self.training.max_to_keep,
        )
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(GanClsError::Config(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.data.dataset_name, "flowers");
        assert_eq!(config.model.z_dim, 100);
        assert_eq!(config.training.epoch, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.data.manifest_path = Some(PathBuf::from("data/flowers.json"));
        config.training.seed = Some(42);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[training]"));
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_validation() {
        let cases: [fn(&mut Config); 11] = [
            |c: &mut Config| c.model.output_size = 40,
            |c: &mut Config| c.model.compressed_embed_dim = 1024,
            |c: &mut Config| c.model.c_dim = 2,
            |c: &mut Config| c.training.alpha = 1.5,
            |c: &mut Config| c.training.real_label = 0.0,
            |c: &mut Config| c.training.sample_num = 16,
            |c: &mut Config| c.training.batch_size = 0,
            |c: &mut Config| c.training.sample_offset = 100,
            |c: &mut Config| c.training.checkpoint_every = 0,
            |c: &mut Config| c.data.caption_window = 0,
            |c: &mut Config| {
                c.model.output_size = 16;
                c.training.batch_size = 1;
                c.training.sample_num = 1;
            },
        ];

        for mutate in cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(GanClsError::Config(_))));
        }
    }

    #[test]
    fn test_single_example_batch_needs_larger_maps() {
        let mut config = Config::default();
        config.training.batch_size = 1;
        config.training.sample_num = 1;
        config.model.output_size = 32;
        assert!(config.validate().is_ok());

        config.model.output_size = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = Config::default();

        let training = config.training_config();
        assert_eq!(training.epochs, 25);
        assert_eq!(training.caption_window, 4);
        assert_eq!(training.sample_cadence, Cadence::new(100, 1));
        assert_eq!(training.checkpoint_cadence, Cadence::new(500, 2));

        assert_eq!(config.generator_config(), GeneratorConfig::default());
        assert_eq!(config.discriminator_config().df_dim, 64);

        assert_eq!(
            config.checkpoint_manager().model_dir(),
            PathBuf::from("checkpoint/GANCLS/flowers_64_64")
        );
        assert_eq!(
            config.checkpoint_manager_for("birds").model_dir(),
            PathBuf::from("checkpoint/GANCLS/birds_64_64")
        );
    }
}
