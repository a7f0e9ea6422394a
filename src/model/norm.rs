use crate::common::*;

/// Normalizes every sample to unit RMS across the channel dimension.
#[derive(Debug, Clone)]
pub struct PixelNorm {
    pub eps: f64,
}

impl Default for PixelNorm {
    fn default() -> Self {
        Self { eps: 1e-8 }
    }
}

impl nn::Module for PixelNorm {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs * (xs.square().mean_dim(&[1], true, xs.kind()) + self.eps).rsqrt()
    }
}

/// Adaptive instance normalization.
#[derive(Debug, Clone)]
pub struct AdaptiveInstanceNorm {
    channels: i64,
    eps: f64,
}

impl AdaptiveInstanceNorm {
    pub fn new(channels: usize) -> Result<Self> {
        ensure!(channels > 0, "channels must be positive");
        Ok(Self {
            channels: channels as i64,
            eps: 1e-5,
        })
    }

    /// Normalizes `image` per sample and channel, then applies the scale
    /// and bias halves of `style`.
    ///
    /// The image has shape `[b, c, h, w]` and the style `[b, 2c, 1, 1]`.
    pub fn f_forward(&self, image: &Tensor, style: &Tensor) -> Result<Tensor> {
        let Self { channels, eps } = *self;

        let (image_b, image_c, _, _) = image.size4()?;
        let (style_b, style_c, _, _) = style.size4()?;
        ensure!(
            style_b == 1 || style_b == image_b,
            "style batch size {} does not match image batch size {}",
            style_b,
            image_b
        );
        ensure!(
            image_c == channels,
            "expect {} image channels, but get {}",
            channels,
            image_c
        );
        ensure!(
            style_c == channels * 2,
            "expect {} style channels, but get {}",
            channels * 2,
            style_c
        );

        let factor = style.narrow(1, 0, channels);
        let bias = style.narrow(1, channels, channels);
        let xs = instance_norm_2d(image, eps);

        Ok(xs * factor + bias)
    }
}

/// Instance normalization over `[b, c, h, w]` without affine parameters.
pub fn instance_norm_2d(xs: &Tensor, eps: f64) -> Tensor {
    Tensor::instance_norm(
        xs,
        None::<Tensor>, // weight
        None::<Tensor>, // bias
        None::<Tensor>, // running_mean
        None::<Tensor>, // running_var
        true,           // use_input_stats
        0.1,            // momentum
        eps,
        false, // cudnn_enabled
    )
}
