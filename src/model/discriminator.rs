//! Discriminator network for GAN-CLS
//!
//! The Discriminator scores (image, caption) pairs. Images are downsampled
//! by four strided convolutions to an `output_size / 16` feature map, the
//! compressed caption embedding is tiled across that map and concatenated
//! along the channel axis, and a final convolution reduces the result to a
//! single logit per pair.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::embedding::EmbeddingCompressor;
use super::layers::{check_batch_norm_batch, conv2d, lrelu, Activation, ConvBn, ResidualBlock, LEAK};
use crate::error::{GanClsError, Result};

/// Discriminator network configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorConfig {
    /// Dimension of the caption embedding
    pub embed_dim: i64,
    /// Dimension of the compressed embedding tiled over the feature map
    pub compressed_embed_dim: i64,
    /// Filters of the first convolution; later stages use multiples
    pub df_dim: i64,
    /// Input color channels (1 or 3)
    pub c_dim: i64,
    /// Side length of the input square images
    pub output_size: i64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            embed_dim: 1024,
            compressed_embed_dim: 128,
            df_dim: 64,
            c_dim: 3,
            output_size: 64,
        }
    }
}

/// Discriminator network
///
/// Architecture:
/// 1. Conv 4x4/2 with LeakyReLU (no normalization)
/// 2. Three Conv 4x4/2 + BatchNorm + LeakyReLU stages
/// 3. Residual refinement at `s/16`
/// 4. Concatenate tiled compressed embedding, 1x1 Conv + BatchNorm + LeakyReLU
/// 5. Conv with an `s/16` kernel producing one logit
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    h0: nn::Conv2D,
    h1: ConvBn,
    h2: ConvBn,
    h3: ConvBn,
    res4: ResidualBlock,
    embed: EmbeddingCompressor,
    concat: ConvBn,
    logits: nn::Conv2D,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let df = config.df_dim;
        let s16 = config.output_size / 16;
        let leaky = Activation::LeakyRelu(LEAK);

        let h0 = conv2d(&(vs / "h0"), config.c_dim, df, 4, 2, 1);
        let h1 = ConvBn::strided(&(vs / "h1"), df, df * 2, 4, 2, 1, leaky);
        let h2 = ConvBn::strided(&(vs / "h2"), df * 2, df * 4, 4, 2, 1, leaky);
        let h3 = ConvBn::strided(&(vs / "h3"), df * 4, df * 8, 4, 2, 1, leaky);

        let res4 = ResidualBlock::new(&(vs / "h4_res"), df * 8, df * 2, leaky, leaky, leaky);

        let embed = EmbeddingCompressor::new(
            &(vs / "net_embed"),
            config.embed_dim,
            config.compressed_embed_dim,
            leaky,
        );

        let concat = ConvBn::new(
            &(vs / "h4_concat"),
            df * 8 + config.compressed_embed_dim,
            df * 8,
            1,
            leaky,
        );

        let logits = conv2d(&(vs / "logits"), df * 8, 1, s16, s16, 0);

        Self {
            config,
            h0,
            h1,
            h2,
            h3,
            res4,
            embed,
            concat,
            logits,
        }
    }

    /// Forward pass without shape validation
    ///
    /// # Arguments
    ///
    /// * `images` - Tensor of shape (batch_size, output_size, output_size, c_dim)
    /// * `phi` - Caption embeddings of shape (batch_size, embed_dim)
    /// * `train` - Whether in training mode (affects batch norm)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, 1) with logits (not sigmoid)
    pub fn forward_t(&self, images: &Tensor, phi: &Tensor, train: bool) -> Tensor {
        self.forward_compressed(images, &self.embed.forward(phi), train)
    }

    fn forward_compressed(&self, images: &Tensor, net_embed: &Tensor, train: bool) -> Tensor {
        let batch_size = images.size()[0];

        // (batch, h, w, c) -> (batch, c, h, w)
        let x = images.permute([0, 3, 1, 2]);

        let x = lrelu(&self.h0.forward(&x), LEAK);
        let x = self.h1.forward_t(&x, train);
        let x = self.h2.forward_t(&x, train);
        let x = self.h3.forward_t(&x, train);
        let x = self.res4.forward_t(&x, train);

        // Tile the compressed embedding over the spatial map
        let size = x.size();
        let (height, width) = (size[2], size[3]);
        let net_embed = net_embed
            .view([batch_size, self.config.compressed_embed_dim, 1, 1])
            .repeat([1, 1, height, width]);
        let x = Tensor::cat(&[&x, &net_embed], 1);

        let x = self.concat.forward_t(&x, train);

        self.logits.forward(&x).view([batch_size, 1])
    }

    /// Score (image, caption) pairs, validating input shapes
    ///
    /// Returns `(score, logit)`, both of shape (batch_size, 1), with the score
    /// being the sigmoid of the logit.
    pub fn discriminate(&self, images: &Tensor, phi: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let s = self.config.output_size;
        let image_size = images.size();
        if image_size.len() != 4 || image_size[1..] != [s, s, self.config.c_dim] {
            return Err(GanClsError::shape(
                "discriminator images",
                ["B".to_string(), s.to_string(), s.to_string(), self.config.c_dim.to_string()],
                image_size,
            ));
        }
        let net_embed = self.embed.compress(phi)?;
        if phi.size()[0] != image_size[0] {
            return Err(GanClsError::shape(
                "discriminator embedding",
                [image_size[0], self.config.embed_dim],
                phi.size(),
            ));
        }
        if train {
            check_batch_norm_batch("discriminator", image_size[0], s)?;
        }

        let logits = self.forward_compressed(images, &net_embed, train);
        Ok((logits.sigmoid(), logits))
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    fn small_config() -> DiscriminatorConfig {
        DiscriminatorConfig {
            embed_dim: 16,
            compressed_embed_dim: 4,
            df_dim: 4,
            c_dim: 3,
            output_size: 16,
        }
    }

    #[test]
    fn test_discriminator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small_config());

        let images = Tensor::rand([4, 16, 16, 3], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let phi = Tensor::randn([4, 16], (Kind::Float, Device::Cpu));
        let (score, logit) = disc.discriminate(&images, &phi, true).unwrap();

        assert_eq!(score.size(), vec![4, 1]);
        assert_eq!(logit.size(), vec![4, 1]);
    }

    #[test]
    fn test_discriminator_64px_tiles_embedding() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            output_size: 64,
            ..small_config()
        };
        let disc = Discriminator::new(&vs.root(), config);

        let images = Tensor::randn([2, 64, 64, 3], (Kind::Float, Device::Cpu));
        let phi = Tensor::randn([2, 16], (Kind::Float, Device::Cpu));
        let (score, _) = disc.discriminate(&images, &phi, true).unwrap();

        assert_eq!(score.size(), vec![2, 1]);
    }

    #[test]
    fn test_score_bounded_for_extreme_inputs() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small_config());

        let images = Tensor::randn([4, 16, 16, 3], (Kind::Float, Device::Cpu)) * 1e4;
        let phi = Tensor::randn([4, 16], (Kind::Float, Device::Cpu)) * 1e4;

        for train in [true, false] {
            let (score, _) = disc.discriminate(&images, &phi, train).unwrap();
            let min_val = score.min().double_value(&[]);
            let max_val = score.max().double_value(&[]);
            assert!(min_val >= 0.0 && max_val <= 1.0);
        }
    }

    #[test]
    fn test_shared_parameters_only_image_input_matters() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small_config());

        let real = Tensor::randn([4, 16, 16, 3], (Kind::Float, Device::Cpu));
        let wrong = Tensor::randn([4, 16, 16, 3], (Kind::Float, Device::Cpu));
        let phi = Tensor::randn([4, 16], (Kind::Float, Device::Cpu));

        // Inference mode keeps the three calls free of batch-statistic updates
        let (_, match_a) = disc.discriminate(&real, &phi, false).unwrap();
        let (_, mismatch) = disc.discriminate(&wrong, &phi, false).unwrap();
        let (_, match_b) = disc.discriminate(&real, &phi, false).unwrap();

        assert!(match_a.equal(&match_b));
        assert!(!match_a.equal(&mismatch));
    }

    #[test]
    fn test_discriminator_rejects_bad_shapes() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small_config());

        let nchw = Tensor::randn([4, 3, 16, 16], (Kind::Float, Device::Cpu));
        let phi = Tensor::randn([4, 16], (Kind::Float, Device::Cpu));
        assert!(matches!(
            disc.discriminate(&nchw, &phi, true),
            Err(GanClsError::ShapeMismatch { .. })
        ));

        let images = Tensor::randn([4, 16, 16, 3], (Kind::Float, Device::Cpu));
        let short_phi = Tensor::randn([4, 8], (Kind::Float, Device::Cpu));
        assert!(disc.discriminate(&images, &short_phi, true).is_err());

        let other_batch = Tensor::randn([3, 16], (Kind::Float, Device::Cpu));
        assert!(disc.discriminate(&images, &other_batch, true).is_err());
    }

    #[test]
    fn test_single_example_at_16px_needs_inference_mode() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small_config());

        let image = Tensor::randn([1, 16, 16, 3], (Kind::Float, Device::Cpu));
        let phi = Tensor::randn([1, 16], (Kind::Float, Device::Cpu));
        assert!(matches!(
            disc.discriminate(&image, &phi, true),
            Err(GanClsError::ShapeMismatch { .. })
        ));
        let (score, _) = disc.discriminate(&image, &phi, false).unwrap();
        assert_eq!(score.size(), vec![1, 1]);
    }
}
