//! Caption embedding compression
//!
//! Projects a text embedding of dimension E down to a conditioning vector of
//! dimension C with a single learned affine map. The generator and the
//! discriminator each own one instance under their own variable store.

use tch::{nn, nn::Module, Tensor};

use super::layers::{weight_init, Activation};
use crate::error::{GanClsError, Result};

/// Learned affine projection `[B, E] -> [B, C]`
#[derive(Debug)]
pub struct EmbeddingCompressor {
    projection: nn::Linear,
    activation: Activation,
    embed_dim: i64,
    compressed_dim: i64,
}

impl EmbeddingCompressor {
    /// Create a compressor registering its weights under `vs`
    pub fn new(vs: &nn::Path, embed_dim: i64, compressed_dim: i64, activation: Activation) -> Self {
        let config = nn::LinearConfig {
            ws_init: weight_init(),
            ..Default::default()
        };
        let projection = nn::linear(vs, embed_dim, compressed_dim, config);

        Self {
            projection,
            activation,
            embed_dim,
            compressed_dim,
        }
    }

    /// Compress a batch of embeddings
    ///
    /// Fails with `ShapeMismatch` unless `embeddings` is `[B, embed_dim]`.
    pub fn compress(&self, embeddings: &Tensor) -> Result<Tensor> {
        let size = embeddings.size();
        if size.len() != 2 || size[1] != self.embed_dim {
            return Err(GanClsError::shape(
                "embedding compressor input",
                ["B".to_string(), self.embed_dim.to_string()],
                size,
            ));
        }
        Ok(self.forward(embeddings))
    }

    pub fn embed_dim(&self) -> i64 {
        self.embed_dim
    }

    pub fn compressed_dim(&self) -> i64 {
        self.compressed_dim
    }
}

impl Module for EmbeddingCompressor {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.activation.apply(self.projection.forward(xs))
    }
}
