//! Generator network for GAN-CLS
//!
//! The Generator maps a noise vector and a caption embedding to an image.
//! The embedding is compressed and appended to the noise, projected to a
//! `output_size / 16` feature map and upsampled by four resolution-doubling
//! stages to the target size.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::embedding::EmbeddingCompressor;
use super::layers::{
    batch_norm2d, check_batch_norm_batch, conv2d, deconv2d, weight_init, Activation, ConvBn,
    ResidualBlock,
};
use crate::error::{GanClsError, Result};

/// Generator network configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Size of the latent noise vector
    pub z_dim: i64,
    /// Dimension of the caption embedding
    pub embed_dim: i64,
    /// Dimension of the compressed embedding appended to the noise
    pub compressed_embed_dim: i64,
    /// Filters of the last upsampling stage; earlier stages use multiples
    pub gf_dim: i64,
    /// Output color channels (1 or 3)
    pub c_dim: i64,
    /// Side length of the generated square images
    pub output_size: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            z_dim: 100,
            embed_dim: 1024,
            compressed_embed_dim: 128,
            gf_dim: 128,
            c_dim: 3,
            output_size: 64,
        }
    }
}

/// One upsampling stage: transposed conv followed by a 3x3 conv
#[derive(Debug)]
struct Upsample {
    deconv: nn::ConvTranspose2D,
    conv: nn::Conv2D,
}

impl Upsample {
    fn new(vs: &nn::Path, in_channels: i64, out_channels: i64) -> Self {
        Self {
            deconv: deconv2d(&(vs / "deconv"), in_channels, out_channels),
            conv: conv2d(&(vs / "conv"), out_channels, out_channels, 3, 1, 1),
        }
    }

    fn forward(&self, xs: &Tensor) -> Tensor {
        self.conv.forward(&self.deconv.forward(xs))
    }
}

/// Generator network
///
/// Architecture:
/// 1. Compress embedding, concatenate with noise, dense projection + BatchNorm
/// 2. Residual refinement at `s/16`
/// 3. Upsample to `s/8`, BatchNorm, residual refinement
/// 4. Upsample to `s/4` and `s/2` with BatchNorm and ReLU
/// 5. Upsample to `s` with Tanh activation
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    embed: EmbeddingCompressor,
    fc: nn::Linear,
    bn0: nn::BatchNorm,
    res1: ResidualBlock,
    up2: Upsample,
    bn2: nn::BatchNorm,
    res3: ResidualBlock,
    up4: Upsample,
    bn4: nn::BatchNorm,
    up5: Upsample,
    bn5: nn::BatchNorm,
    up_out: Upsample,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let gf = config.gf_dim;
        let s16 = config.output_size / 16;

        let embed = EmbeddingCompressor::new(
            &(vs / "net_embed"),
            config.embed_dim,
            config.compressed_embed_dim,
            Activation::Identity,
        );

        let fc_config = nn::LinearConfig {
            ws_init: weight_init(),
            ..Default::default()
        };
        let fc = nn::linear(
            vs / "h0_dense",
            config.z_dim + config.compressed_embed_dim,
            gf * 8 * s16 * s16,
            fc_config,
        );
        let bn0 = batch_norm2d(&(vs / "h0_bn"), gf * 8);

        let res1 = ResidualBlock::new(
            &(vs / "h1_res"),
            gf * 8,
            gf * 2,
            Activation::Relu,
            Activation::Identity,
            Activation::Relu,
        );

        let up2 = Upsample::new(&(vs / "h2"), gf * 8, gf * 4);
        let bn2 = batch_norm2d(&(vs / "h2_bn"), gf * 4);

        let res3 = ResidualBlock::new(
            &(vs / "h3_res"),
            gf * 4,
            gf,
            Activation::Relu,
            Activation::Identity,
            Activation::Relu,
        );

        let up4 = Upsample::new(&(vs / "h4"), gf * 4, gf * 2);
        let bn4 = batch_norm2d(&(vs / "h4_bn"), gf * 2);

        let up5 = Upsample::new(&(vs / "h5"), gf * 2, gf);
        let bn5 = batch_norm2d(&(vs / "h5_bn"), gf);

        let up_out = Upsample::new(&(vs / "logits"), gf, config.c_dim);

        Self {
            config,
            embed,
            fc,
            bn0,
            res1,
            up2,
            bn2,
            res3,
            up4,
            bn4,
            up5,
            bn5,
            up_out,
        }
    }

    /// Forward pass without shape validation
    ///
    /// # Arguments
    ///
    /// * `noise` - Tensor of shape (batch_size, z_dim)
    /// * `phi` - Caption embeddings of shape (batch_size, embed_dim)
    /// * `train` - Batch statistics when true, running averages when false
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, output_size, output_size, c_dim) in [-1, 1]
    pub fn forward_t(&self, noise: &Tensor, phi: &Tensor, train: bool) -> Tensor {
        self.forward_compressed(noise, &self.embed.forward(phi), train)
    }

    fn forward_compressed(&self, noise: &Tensor, net_embed: &Tensor, train: bool) -> Tensor {
        let batch_size = noise.size()[0];
        let s16 = self.config.output_size / 16;

        let net_input = Tensor::cat(&[noise, net_embed], 1);

        // Dense projection reshaped to (batch, channels, s16, s16)
        let x = self.fc.forward(&net_input);
        let x = x.view([batch_size, self.config.gf_dim * 8, s16, s16]);
        let x = self.bn0.forward_t(&x, train);

        let x = self.res1.forward_t(&x, train);

        let x = self.up2.forward(&x);
        let x = self.bn2.forward_t(&x, train);
        let x = self.res3.forward_t(&x, train);

        let x = self.up4.forward(&x);
        let x = self.bn4.forward_t(&x, train).relu();

        let x = self.up5.forward(&x);
        let x = self.bn5.forward_t(&x, train).relu();

        let x = self.up_out.forward(&x).tanh();

        // (batch, c, h, w) -> (batch, h, w, c)
        x.permute([0, 2, 3, 1])
    }

    /// Generate images, validating input shapes
    ///
    /// In training mode the first batch norm sees `B * (s/16)^2` values per
    /// channel, which must be at least 2.
    pub fn generate(&self, noise: &Tensor, phi: &Tensor, train: bool) -> Result<Tensor> {
        let noise_size = noise.size();
        if noise_size.len() != 2 || noise_size[1] != self.config.z_dim {
            return Err(GanClsError::shape(
                "generator noise",
                ["B".to_string(), self.config.z_dim.to_string()],
                noise_size,
            ));
        }
        let net_embed = self.embed.compress(phi)?;
        if phi.size()[0] != noise_size[0] {
            return Err(GanClsError::shape(
                "generator embedding",
                [noise_size[0], self.config.embed_dim],
                phi.size(),
            ));
        }
        if train {
            check_batch_norm_batch("generator", noise_size[0], self.config.output_size)?;
        }
        Ok(self.forward_compressed(noise, &net_embed, train))
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}
