//! Error types for the GAN-CLS library

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, GanClsError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum GanClsError {
    /// Tensor contract violation between components
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Dataset construction or iteration failed
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Sample grid could not be generated or written
    #[error("sample export failed at step {step}: {reason}")]
    SampleExport { step: u64, reason: String },

    /// Checkpoint could not be written
    #[error("failed to save checkpoint to {}: {source}", path.display())]
    CheckpointSave {
        path: PathBuf,
        #[source]
        source: Box<GanClsError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML write error
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Image decoding/encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// libtorch error
    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),
}

impl GanClsError {
    /// Build a shape mismatch error from displayable parts
    pub fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Whether the training loop may log this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GanClsError::SampleExport { .. })
    }
}
