//! GAN-CLS wrapper combining Generator and Discriminator
//!
//! Each network owns its own variable store, so the two parameter sets are
//! disjoint by construction and each optimizer is built over exactly one of
//! them.

use std::path::Path;

use tch::{nn::VarStore, Device, Tensor};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::training::Adam;

/// Complete GAN-CLS model
pub struct GanCls {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for discriminator
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
}

impl GanCls {
    /// Create a new GAN-CLS model on the context's device
    pub fn new(ctx: &ExecutionContext, gen_config: GeneratorConfig, disc_config: DiscriminatorConfig) -> Self {
        let device = ctx.device();
        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);

        let generator = Generator::new(&(gen_vs.root() / "generator"), gen_config);
        let discriminator = Discriminator::new(&(disc_vs.root() / "discriminator"), disc_config);

        Self {
            generator,
            discriminator,
            gen_vs,
            disc_vs,
            device,
        }
    }

    /// Create a model whose two networks agree on embedding and image sizes
    #[allow(clippy::too_many_arguments)]
    pub fn with_dims(
        ctx: &ExecutionContext,
        z_dim: i64,
        embed_dim: i64,
        compressed_embed_dim: i64,
        gf_dim: i64,
        df_dim: i64,
        c_dim: i64,
        output_size: i64,
    ) -> Self {
        let gen_config = GeneratorConfig {
            z_dim,
            embed_dim,
            compressed_embed_dim,
            gf_dim,
            c_dim,
            output_size,
        };

        let disc_config = DiscriminatorConfig {
            embed_dim,
            compressed_embed_dim,
            df_dim,
            c_dim,
            output_size,
        };

        Self::new(ctx, gen_config, disc_config)
    }

    /// Generate images from noise and caption embeddings
    ///
    /// Returns a tensor of shape (batch, output_size, output_size, c_dim)
    pub fn generate(&self, noise: &Tensor, phi: &Tensor, train: bool) -> Result<Tensor> {
        self.generator.generate(noise, phi, train)
    }

    /// Score (image, caption) pairs, returning `(score, logit)`
    pub fn discriminate(&self, images: &Tensor, phi: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        self.discriminator.discriminate(images, phi, train)
    }

    /// Adam optimizer over the generator's parameters only
    pub fn gen_optimizer(&self, lr: f64, beta1: f64) -> Adam {
        Adam::new(&self.gen_vs, lr, beta1)
    }

    /// Adam optimizer over the discriminator's parameters only
    pub fn disc_optimizer(&self, lr: f64, beta1: f64) -> Adam {
        Adam::new(&self.disc_vs, lr, beta1)
    }

    /// Save both parameter sets
    pub fn save<P: AsRef<Path>>(&self, gen_path: P, disc_path: P) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.disc_vs.save(disc_path)?;
        Ok(())
    }

    /// Restore both parameter sets in place
    pub fn load<P: AsRef<Path>>(&mut self, gen_path: P, disc_path: P) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.disc_vs.load(disc_path)?;
        Ok(())
    }

    /// Get latent dimension
    pub fn z_dim(&self) -> i64 {
        self.generator.config().z_dim
    }

    /// Get caption embedding dimension
    pub fn embed_dim(&self) -> i64 {
        self.generator.config().embed_dim
    }

    /// Get output image side length
    pub fn output_size(&self) -> i64 {
        self.generator.config().output_size
    }

    /// Get number of color channels
    pub fn c_dim(&self) -> i64 {
        self.generator.config().c_dim
    }

    /// Model configuration as JSON, stored alongside checkpoints
    pub fn config_json(&self) -> serde_json::Value {
        let gen = self.generator.config();
        let disc = self.discriminator.config();
        serde_json::json!({
            "z_dim": gen.z_dim,
            "embed_dim": gen.embed_dim,
            "compressed_embed_dim": gen.compressed_embed_dim,
            "gf_dim": gen.gf_dim,
            "df_dim": disc.df_dim,
            "c_dim": gen.c_dim,
            "output_size": gen.output_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn tiny_model() -> GanCls {
        GanCls::with_dims(&ExecutionContext::cpu(), 8, 16, 4, 4, 4, 3, 16)
    }

    #[test]
    fn test_gancls_creation() {
        let model = tiny_model();

        assert_eq!(model.z_dim(), 8);
        assert_eq!(model.embed_dim(), 16);
        assert_eq!(model.output_size(), 16);
        assert_eq!(model.c_dim(), 3);
    }

    #[test]
    fn test_parameter_sets_are_disjoint() {
        let model = tiny_model();

        let gen_names: Vec<String> = model.gen_vs.variables().into_keys().collect();
        let disc_names: Vec<String> = model.disc_vs.variables().into_keys().collect();

        assert!(!gen_names.is_empty() && !disc_names.is_empty());
        assert!(gen_names.iter().all(|n| n.starts_with("generator.")));
        assert!(disc_names.iter().all(|n| n.starts_with("discriminator.")));
        // Each network carries its own embedding compressor
        assert!(gen_names.iter().any(|n| n.contains("net_embed")));
        assert!(disc_names.iter().any(|n| n.contains("net_embed")));
    }

    #[test]
    fn test_generate_then_discriminate() {
        let model = tiny_model();
        let ctx = ExecutionContext::cpu();

        let noise = ctx.uniform_noise(4, 8);
        let phi = Tensor::randn([4, 16], (Kind::Float, Device::Cpu));
        let images = model.generate(&noise, &phi, true).unwrap();
        let (score, logit) = model.discriminate(&images, &phi, true).unwrap();

        assert_eq!(images.size(), vec![4, 16, 16, 3]);
        assert_eq!(score.size(), vec![4, 1]);
        assert_eq!(logit.size(), vec![4, 1]);
    }

    #[test]
    fn test_config_json() {
        let model = tiny_model();
        let json = model.config_json();
        assert_eq!(json["z_dim"], 8);
        assert_eq!(json["output_size"], 16);
    }
}
