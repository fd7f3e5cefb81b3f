//! Building blocks shared by the generator and discriminator stacks
//!
//! Convolutions run on NCHW tensors. Kernels are initialized from N(0, 0.02)
//! and batch-norm scales from N(1, 0.02).

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use crate::error::{GanClsError, Result};

/// Negative slope of the leaky ReLU used throughout the discriminator
pub const LEAK: f64 = 0.2;

/// Kernel initializer for dense and convolution layers
pub fn weight_init() -> nn::Init {
    nn::Init::Randn {
        mean: 0.0,
        stdev: 0.02,
    }
}

/// Leaky ReLU as `max(x, slope * x)`
pub fn lrelu(x: &Tensor, slope: f64) -> Tensor {
    x.maximum(&(x * slope))
}

/// Pointwise nonlinearity applied after a normalized convolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu(f64),
}

impl Activation {
    pub fn apply(&self, x: Tensor) -> Tensor {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.relu(),
            Activation::LeakyRelu(slope) => lrelu(&x, *slope),
        }
    }
}

/// Batch statistics need more than one value per channel
///
/// The smallest maps of both networks are `(s/16) x (s/16)`, so a training
/// batch must satisfy `batch * (s/16)^2 >= 2`.
pub fn check_batch_norm_batch(network: &str, batch_size: i64, output_size: i64) -> Result<()> {
    let s16 = output_size / 16;
    if batch_size * s16 * s16 < 2 {
        return Err(GanClsError::ShapeMismatch {
            context: format!("{} batch in training mode", network),
            expected: "at least 2 values per batch-norm channel".to_string(),
            actual: format!("{} x {}x{}", batch_size, s16, s16),
        });
    }
    Ok(())
}

/// 2D convolution with the stack's kernel initializer
pub fn conv2d(
    vs: &nn::Path,
    in_channels: i64,
    out_channels: i64,
    kernel: i64,
    stride: i64,
    padding: i64,
) -> nn::Conv2D {
    let config = nn::ConvConfig {
        stride,
        padding,
        ws_init: weight_init(),
        ..Default::default()
    };
    nn::conv2d(vs, in_channels, out_channels, kernel, config)
}

/// Resolution-doubling transposed convolution (4x4 kernel, stride 2)
pub fn deconv2d(vs: &nn::Path, in_channels: i64, out_channels: i64) -> nn::ConvTranspose2D {
    let config = nn::ConvTransposeConfig {
        stride: 2,
        padding: 1,
        ws_init: weight_init(),
        ..Default::default()
    };
    nn::conv_transpose2d(vs, in_channels, out_channels, 4, config)
}

/// Batch norm over channels with N(1, 0.02) scale init
pub fn batch_norm2d(vs: &nn::Path, channels: i64) -> nn::BatchNorm {
    let config = nn::BatchNormConfig {
        ws_init: nn::Init::Randn {
            mean: 1.0,
            stdev: 0.02,
        },
        ..Default::default()
    };
    nn::batch_norm2d(vs, channels, config)
}

/// Convolution followed by batch norm and an activation
#[derive(Debug)]
pub struct ConvBn {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    activation: Activation,
}

impl ConvBn {
    /// Stride-1 convolution with "same" padding for odd kernels
    pub fn new(
        vs: &nn::Path,
        in_channels: i64,
        out_channels: i64,
        kernel: i64,
        activation: Activation,
    ) -> Self {
        Self::strided(vs, in_channels, out_channels, kernel, 1, kernel / 2, activation)
    }

    pub fn strided(
        vs: &nn::Path,
        in_channels: i64,
        out_channels: i64,
        kernel: i64,
        stride: i64,
        padding: i64,
        activation: Activation,
    ) -> Self {
        Self {
            conv: conv2d(&(vs / "conv"), in_channels, out_channels, kernel, stride, padding),
            bn: batch_norm2d(&(vs / "bn"), out_channels),
            activation,
        }
    }
}

impl ModuleT for ConvBn {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = self.conv.forward(xs);
        let x = self.bn.forward_t(&x, train);
        self.activation.apply(x)
    }
}

/// Bottleneck refinement block: 1x1 reduce, 3x3, 3x3 expand, skip-add
///
/// The output keeps the input's channel count and resolution.
#[derive(Debug)]
pub struct ResidualBlock {
    reduce: ConvBn,
    refine: ConvBn,
    expand: ConvBn,
    output: Activation,
}

impl ResidualBlock {
    /// # Arguments
    ///
    /// * `channels` - Channels of the input and output
    /// * `bottleneck` - Channels inside the block
    /// * `inner` - Activation after the reduce and refine convolutions
    /// * `expand` - Activation after the expand convolution, before the add
    /// * `output` - Activation after the skip connection
    pub fn new(
        vs: &nn::Path,
        channels: i64,
        bottleneck: i64,
        inner: Activation,
        expand: Activation,
        output: Activation,
    ) -> Self {
        Self {
            reduce: ConvBn::new(&(vs / "reduce"), channels, bottleneck, 1, inner),
            refine: ConvBn::new(&(vs / "refine"), bottleneck, bottleneck, 3, inner),
            expand: ConvBn::new(&(vs / "expand"), bottleneck, channels, 3, expand),
            output,
        }
    }
}

impl ModuleT for ResidualBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = self.reduce.forward_t(xs, train);
        let x = self.refine.forward_t(&x, train);
        let x = self.expand.forward_t(&x, train);
        self.output.apply(xs + x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn test_lrelu() {
        let x = Tensor::from_slice(&[-1.0f32, 0.0, 2.0]);
        let y = lrelu(&x, LEAK);
        let values: Vec<f32> = Vec::<f32>::try_from(&y).unwrap();
        assert!((values[0] + 0.2).abs() < 1e-6);
        assert_eq!(values[1], 0.0);
        assert_eq!(values[2], 2.0);
    }

    #[test]
    fn test_residual_block_preserves_shape() {
        let vs = VarStore::new(Device::Cpu);
        let block = ResidualBlock::new(
            &(vs.root() / "res"),
            16,
            4,
            Activation::Relu,
            Activation::Identity,
            Activation::Relu,
        );

        let x = Tensor::randn([2, 16, 4, 4], (Kind::Float, Device::Cpu));
        let y = block.forward_t(&x, true);
        assert_eq!(y.size(), vec![2, 16, 4, 4]);
    }

    #[test]
    fn test_deconv_doubles_resolution() {
        let vs = VarStore::new(Device::Cpu);
        let deconv = deconv2d(&(vs.root() / "up"), 8, 4);

        let x = Tensor::randn([1, 8, 3, 3], (Kind::Float, Device::Cpu));
        assert_eq!(deconv.forward(&x).size(), vec![1, 4, 6, 6]);
    }
}
