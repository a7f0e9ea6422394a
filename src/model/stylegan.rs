use super::{
    activation::LeakyRelu,
    conv::{ScaledConv2D, ScaledConv2DInit},
    linear::{ScaledLinear, ScaledLinearInit},
    norm::{AdaptiveInstanceNorm, PixelNorm},
    weight_scale::WeightScale,
};
use crate::common::*;

pub use affine_style::*;
pub use conv_block::*;
pub use early_style_conv_block::*;
pub use intermediate_generator::*;
pub use noise_scale::*;
pub use style_conv_block::*;

mod affine_style {
    use super::*;

    /// Learned affine transform from the intermediate latent to a per-channel
    /// (scale, bias) style.
    #[derive(Debug)]
    pub struct AffineStyle {
        channels: i64,
        transform: ScaledLinear,
    }

    impl AffineStyle {
        pub fn new<'a>(
            path: impl Borrow<nn::Path<'a>>,
            w_dim: usize,
            channels: usize,
        ) -> Result<Self> {
            let path = path.borrow();
            ensure!(channels > 0, "channels must be positive");

            let transform =
                ScaledLinearInit::default().build(path / "transform", w_dim, channels * 2)?;
            let channels = channels as i64;

            // scale half starts at one, bias half at zero
            if let Some(bias) = &transform.bias {
                tch::no_grad(|| {
                    let _ = bias.narrow(0, 0, channels).fill_(1.0);
                    let _ = bias.narrow(0, channels, channels).fill_(0.0);
                });
            }

            Ok(Self {
                channels,
                transform,
            })
        }

        /// Maps `[b, w_dim]` to a `[b, 2c, 1, 1]` style.
        pub fn f_forward(&self, latent_w: &Tensor) -> Result<Tensor> {
            let style = self.transform.f_forward(latent_w)?;
            Ok(style.unsqueeze(2).unsqueeze(3))
        }

        pub fn channels(&self) -> usize {
            self.channels as usize
        }
    }
}

mod noise_scale {
    use super::*;

    /// Learned per-channel factor applied to externally generated noise.
    #[derive(Debug)]
    pub struct NoiseScale {
        channels: i64,
        weight: WeightScale,
    }

    impl NoiseScale {
        pub fn new<'a>(path: impl Borrow<nn::Path<'a>>, channels: usize) -> Result<Self> {
            ensure!(channels > 0, "channels must be positive");
            let channels = channels as i64;
            let weight = WeightScale::new(path, &[1, channels, 1, 1], nn::Init::Const(0.0))?;
            Ok(Self { channels, weight })
        }

        pub fn f_forward(&self, noise: &Tensor) -> Result<Tensor> {
            let (_, noise_c, _, _) = noise.size4()?;
            ensure!(
                noise_c == 1 || noise_c == self.channels,
                "noise must have 1 or {} channels, but get {}",
                self.channels,
                noise_c
            );
            Ok(noise * self.weight.weight())
        }

        pub fn weight(&self) -> &WeightScale {
            &self.weight
        }
    }
}

mod early_style_conv_block {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct EarlyStyleConvBlockInit {
        pub ksize: usize,
        pub activation: LeakyRelu,
    }

    impl Default for EarlyStyleConvBlockInit {
        fn default() -> Self {
            Self {
                ksize: 3,
                activation: Default::default(),
            }
        }
    }

    impl EarlyStyleConvBlockInit {
        pub fn build<'a>(
            self,
            path: impl Borrow<nn::Path<'a>>,
            channels: usize,
            w_dim: usize,
            resol: usize,
        ) -> Result<EarlyStyleConvBlock> {
            let path = path.borrow();
            let Self { ksize, activation } = self;
            ensure!(resol > 0, "resol must be positive");

            let constant = path.randn(
                "constant",
                &[1, channels as i64, resol as i64, resol as i64],
                0.0,
                1.0,
            );
            let style1 = AffineStyle::new(path / "style1", w_dim, channels)?;
            let style2 = AffineStyle::new(path / "style2", w_dim, channels)?;
            let noise1 = NoiseScale::new(path / "noise1", channels)?;
            let noise2 = NoiseScale::new(path / "noise2", channels)?;
            let adain = AdaptiveInstanceNorm::new(channels)?;
            let conv = ScaledConv2DInit::new(ksize).build(path / "conv", channels, channels)?;

            debug!(
                "build early style block with {} channels at {}x{}",
                channels, resol, resol
            );

            Ok(EarlyStyleConvBlock {
                resol: resol as i64,
                constant,
                style1,
                style2,
                noise1,
                noise2,
                adain,
                activation,
                conv,
            })
        }
    }

    /// The first generator block, fed by a learned constant.
    #[derive(Debug)]
    pub struct EarlyStyleConvBlock {
        resol: i64,
        constant: Tensor,
        style1: AffineStyle,
        style2: AffineStyle,
        noise1: NoiseScale,
        noise2: NoiseScale,
        adain: AdaptiveInstanceNorm,
        activation: LeakyRelu,
        conv: ScaledConv2D,
    }

    impl EarlyStyleConvBlock {
        /// The batch size is taken from `noise`, which must match the
        /// constant's resolution.
        pub fn f_forward(&self, latent_w: &Tensor, noise: &Tensor) -> Result<Tensor> {
            let Self {
                resol,
                ref constant,
                ref style1,
                ref style2,
                ref noise1,
                ref noise2,
                ref adain,
                ref activation,
                ref conv,
            } = *self;

            let (bsize, _, noise_h, noise_w) = noise.size4()?;
            let (w_bsize, _) = latent_w.size2()?;
            ensure!(
                (noise_h, noise_w) == (resol, resol),
                "expect noise of size {}x{}, but get {}x{}",
                resol,
                resol,
                noise_h,
                noise_w
            );
            ensure!(
                w_bsize == bsize,
                "batch size mismatch between latent ({}) and noise ({})",
                w_bsize,
                bsize
            );

            let xs = constant.repeat(&[bsize, 1, 1, 1]);
            let xs = xs + noise1.f_forward(noise)?;
            let xs = adain.f_forward(&xs, &style1.f_forward(latent_w)?)?;
            let xs = activation.forward(&xs);
            let xs = conv.forward(&xs);
            let xs = xs + noise2.f_forward(noise)?;
            let xs = adain.f_forward(&xs, &style2.f_forward(latent_w)?)?;
            let xs = activation.forward(&xs);

            Ok(xs)
        }

        pub fn channels(&self) -> usize {
            self.conv.out_channels()
        }

        pub fn resol(&self) -> usize {
            self.resol as usize
        }
    }
}

mod style_conv_block {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct StyleConvBlockInit {
        pub ksize: usize,
        pub activation: LeakyRelu,
    }

    impl Default for StyleConvBlockInit {
        fn default() -> Self {
            Self {
                ksize: 3,
                activation: Default::default(),
            }
        }
    }

    impl StyleConvBlockInit {
        pub fn build<'a>(
            self,
            path: impl Borrow<nn::Path<'a>>,
            in_c: usize,
            out_c: usize,
            w_dim: usize,
        ) -> Result<StyleConvBlock> {
            let path = path.borrow();
            let Self { ksize, activation } = self;

            let conv1 = ScaledConv2DInit::new(ksize).build(path / "conv1", in_c, out_c)?;
            let conv2 = ScaledConv2DInit::new(ksize).build(path / "conv2", out_c, out_c)?;
            let style1 = AffineStyle::new(path / "style1", w_dim, out_c)?;
            let style2 = AffineStyle::new(path / "style2", w_dim, out_c)?;
            let noise1 = NoiseScale::new(path / "noise1", out_c)?;
            let noise2 = NoiseScale::new(path / "noise2", out_c)?;
            let adain = AdaptiveInstanceNorm::new(out_c)?;

            debug!("build style block {} -> {} channels", in_c, out_c);

            Ok(StyleConvBlock {
                conv1,
                conv2,
                style1,
                style2,
                noise1,
                noise2,
                adain,
                activation,
            })
        }
    }

    /// Repeated generator block. Upsampling and noise generation are left
    /// to the caller.
    #[derive(Debug)]
    pub struct StyleConvBlock {
        conv1: ScaledConv2D,
        conv2: ScaledConv2D,
        style1: AffineStyle,
        style2: AffineStyle,
        noise1: NoiseScale,
        noise2: NoiseScale,
        adain: AdaptiveInstanceNorm,
        activation: LeakyRelu,
    }

    impl StyleConvBlock {
        pub fn f_forward(
            &self,
            previous: &Tensor,
            latent_w: &Tensor,
            noise: &Tensor,
        ) -> Result<Tensor> {
            let Self {
                ref conv1,
                ref conv2,
                ref style1,
                ref style2,
                ref noise1,
                ref noise2,
                ref adain,
                ref activation,
            } = *self;

            let xs = conv1.f_forward(previous)?;
            {
                let (bsize, _, in_h, in_w) = xs.size4()?;
                let (w_bsize, _) = latent_w.size2()?;
                ensure!(
                    w_bsize == bsize,
                    "batch size mismatch between latent ({}) and input ({})",
                    w_bsize,
                    bsize
                );
                let (noise_b, _, noise_h, noise_w) = noise.size4()?;
                ensure!(
                    (noise_h, noise_w) == (in_h, in_w),
                    "expect noise of size {}x{}, but get {}x{}",
                    in_h,
                    in_w,
                    noise_h,
                    noise_w
                );
                ensure!(
                    noise_b == 1 || noise_b == bsize,
                    "noise batch size {} does not match {}",
                    noise_b,
                    bsize
                );
            }

            let xs = xs + noise1.f_forward(noise)?;
            let xs = adain.f_forward(&xs, &style1.f_forward(latent_w)?)?;
            let xs = activation.forward(&xs);
            let xs = conv2.forward(&xs);
            let xs = xs + noise2.f_forward(noise)?;
            let xs = adain.f_forward(&xs, &style2.f_forward(latent_w)?)?;
            let xs = activation.forward(&xs);

            Ok(xs)
        }

        pub fn in_channels(&self) -> usize {
            self.conv1.in_channels()
        }

        pub fn out_channels(&self) -> usize {
            self.conv2.out_channels()
        }
    }
}

mod conv_block {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct ConvBlockInit {
        pub ksize1: usize,
        pub padding1: usize,
        pub ksize2: Option<usize>,
        pub padding2: Option<usize>,
        pub activation: LeakyRelu,
    }

    impl ConvBlockInit {
        pub fn new(ksize: usize, padding: usize) -> Self {
            Self {
                ksize1: ksize,
                padding1: padding,
                ksize2: None,
                padding2: None,
                activation: Default::default(),
            }
        }

        pub fn build<'a>(
            self,
            path: impl Borrow<nn::Path<'a>>,
            in_c: usize,
            out_c: usize,
        ) -> Result<ConvBlock> {
            let path = path.borrow();
            let Self {
                ksize1,
                padding1,
                ksize2,
                padding2,
                activation,
            } = self;
            let ksize2 = ksize2.unwrap_or(ksize1);
            let padding2 = padding2.unwrap_or(padding1);

            let conv1 = ScaledConv2DInit {
                padding: padding1,
                ..ScaledConv2DInit::new(ksize1)
            }
            .build(path / "conv1", in_c, out_c)?;
            let conv2 = ScaledConv2DInit {
                padding: padding2,
                ..ScaledConv2DInit::new(ksize2)
            }
            .build(path / "conv2", out_c, out_c)?;

            debug!(
                "build conv block {} -> {} channels, kernels {}/{}",
                in_c, out_c, ksize1, ksize2
            );

            Ok(ConvBlock {
                conv1,
                conv2,
                activation,
            })
        }
    }

    /// Discriminator block. Downsampling is left to the caller.
    #[derive(Debug)]
    pub struct ConvBlock {
        conv1: ScaledConv2D,
        conv2: ScaledConv2D,
        activation: LeakyRelu,
    }

    impl nn::Module for ConvBlock {
        fn forward(&self, xs: &Tensor) -> Tensor {
            let Self {
                ref conv1,
                ref conv2,
                ref activation,
            } = *self;

            let xs = activation.forward(&conv1.forward(xs));
            activation.forward(&conv2.forward(&xs))
        }
    }

    impl ConvBlock {
        pub fn f_forward(&self, image: &Tensor) -> Result<Tensor> {
            let xs = self.activation.forward(&self.conv1.f_forward(image)?);
            let xs = self.activation.forward(&self.conv2.f_forward(&xs)?);
            Ok(xs)
        }

        pub fn in_channels(&self) -> usize {
            self.conv1.in_channels()
        }

        pub fn out_channels(&self) -> usize {
            self.conv2.out_channels()
        }
    }
}

mod intermediate_generator {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct IntermediateGeneratorInit {
        pub num_layers: usize,
        pub activation: LeakyRelu,
    }

    impl Default for IntermediateGeneratorInit {
        fn default() -> Self {
            Self {
                num_layers: 8,
                activation: Default::default(),
            }
        }
    }

    impl IntermediateGeneratorInit {
        pub fn build<'a>(
            self,
            path: impl Borrow<nn::Path<'a>>,
            w_dim: usize,
        ) -> Result<IntermediateGenerator> {
            let path = path.borrow();
            let Self {
                num_layers,
                activation,
            } = self;
            ensure!(num_layers >= 1, "at least one mapping layer is required");
            ensure!(w_dim > 0, "w_dim must be positive");

            let layers: Vec<_> = (0..num_layers)
                .map(|index| {
                    ScaledLinearInit::default().build(
                        path / format!("linear{}", index),
                        w_dim,
                        w_dim,
                    )
                })
                .collect::<Result<_>>()?;

            debug!(
                "build mapping network with {} layers of width {}",
                num_layers, w_dim
            );

            Ok(IntermediateGenerator {
                w_dim: w_dim as i64,
                norm: PixelNorm::default(),
                layers,
                activation,
            })
        }
    }

    /// Maps a latent `z` into the intermediate latent space `w`.
    #[derive(Debug)]
    pub struct IntermediateGenerator {
        w_dim: i64,
        norm: PixelNorm,
        layers: Vec<ScaledLinear>,
        activation: LeakyRelu,
    }

    impl nn::Module for IntermediateGenerator {
        fn forward(&self, latent_z: &Tensor) -> Tensor {
            let Self {
                ref norm,
                ref layers,
                ref activation,
                ..
            } = *self;

            layers.iter().fold(norm.forward(latent_z), |xs, layer| {
                activation.forward(&layer.forward(&xs))
            })
        }
    }

    impl IntermediateGenerator {
        pub fn f_forward(&self, latent_z: &Tensor) -> Result<Tensor> {
            let (_, z_dim) = latent_z.size2()?;
            ensure!(
                z_dim == self.w_dim,
                "expect latent of dimension {}, but get {}",
                self.w_dim,
                z_dim
            );
            Ok(self.forward(latent_z))
        }

        pub fn w_dim(&self) -> usize {
            self.w_dim as usize
        }

        pub fn num_layers(&self) -> usize {
            self.layers.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn affine_style_init_test() -> Result<()> {
        let b = 3;
        let c = 5;
        let w_dim = 7;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let style = AffineStyle::new(&root / "style", w_dim, c)?;

        let zero_w = Tensor::zeros(&[b, w_dim as i64], FLOAT_CPU);
        let output = style.f_forward(&zero_w)?;
        assert_eq!(output.size(), vec![b, 2 * c as i64, 1, 1]);

        let expect = Tensor::cat(
            &[
                Tensor::ones(&[b, c as i64, 1, 1], FLOAT_CPU),
                Tensor::zeros(&[b, c as i64, 1, 1], FLOAT_CPU),
            ],
            1,
        );
        assert_abs_diff_eq!(f64::from((output - expect).abs().max()), 0.0);

        let variables = vs.variables();
        ensure!(variables.contains_key("style.transform.weight_orig"));
        ensure!(variables.contains_key("style.transform.bias"));

        Ok(())
    }

    #[test]
    fn noise_scale_test() -> Result<()> {
        let c = 8;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let scale = NoiseScale::new(&root / "noise", c)?;
        assert_eq!(scale.weight().fan_in(), c as i64);

        let noise = Tensor::randn(&[2, 1, 4, 4], FLOAT_CPU);
        let output = scale.f_forward(&noise)?;
        assert_eq!(output.size(), vec![2, c as i64, 4, 4]);
        assert_abs_diff_eq!(f64::from(output.abs().max()), 0.0);

        tch::no_grad(|| {
            let _ = scale.weight().weight_orig().shallow_clone().fill_(1.0);
        });
        let output = scale.f_forward(&noise)?;
        let expect = noise.expand(&[2, c as i64, 4, 4], false) * (2.0 / c as f64).sqrt();
        assert_abs_diff_eq!(
            f64::from((output - expect).abs().max()),
            0.0,
            epsilon = 1e-6
        );

        let bad_noise = Tensor::randn(&[2, 3, 4, 4], FLOAT_CPU);
        ensure!(scale.f_forward(&bad_noise).is_err());

        Ok(())
    }

    #[test]
    fn early_style_conv_block_test() -> Result<()> {
        let b = 4;
        let c = 6;
        let w_dim = 10;
        let resol = 4;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let block = EarlyStyleConvBlockInit::default().build(&root / "early", c, w_dim, resol)?;

        let latent_w = Tensor::randn(&[b, w_dim as i64], FLOAT_CPU);
        let noise = Tensor::randn(&[b, 1, resol as i64, resol as i64], FLOAT_CPU);
        let output = block.f_forward(&latent_w, &noise)?;
        assert_eq!(output.size(), vec![b, c as i64, resol as i64, resol as i64]);

        // noise weights start at zero, so the noise has no effect yet
        let other_noise = Tensor::randn(&[b, 1, resol as i64, resol as i64], FLOAT_CPU);
        let other = block.f_forward(&latent_w, &other_noise)?;
        assert_abs_diff_eq!(
            f64::from((&output - &other).abs().max()),
            0.0,
            epsilon = 1e-6
        );

        let bad_noise = Tensor::randn(&[b, 1, 8, 8], FLOAT_CPU);
        ensure!(block.f_forward(&latent_w, &bad_noise).is_err());

        let bad_latent = Tensor::randn(&[b + 1, w_dim as i64], FLOAT_CPU);
        ensure!(block.f_forward(&bad_latent, &noise).is_err());

        Ok(())
    }

    #[test]
    fn style_conv_block_test() -> Result<()> {
        let b = 2;
        let cx = 6;
        let cy = 3;
        let w_dim = 10;
        let h = 8;
        let w = 8;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let block = StyleConvBlockInit::default().build(&root / "block", cx, cy, w_dim)?;
        assert_eq!(block.in_channels(), cx);
        assert_eq!(block.out_channels(), cy);

        let previous = Tensor::randn(&[b, cx as i64, h, w], FLOAT_CPU);
        let latent_w = Tensor::randn(&[b, w_dim as i64], FLOAT_CPU);
        let noise = Tensor::randn(&[b, 1, h, w], FLOAT_CPU);

        let output = block.f_forward(&previous, &latent_w, &noise)?;
        assert_eq!(output.size(), vec![b, cy as i64, h, w]);

        let bad_noise = Tensor::randn(&[b, 1, h / 2, w / 2], FLOAT_CPU);
        ensure!(block.f_forward(&previous, &latent_w, &bad_noise).is_err());

        let bad_latent = Tensor::randn(&[b + 1, w_dim as i64], FLOAT_CPU);
        ensure!(block.f_forward(&previous, &bad_latent, &noise).is_err());

        Ok(())
    }

    #[test]
    fn style_conv_block_gradient_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let block = StyleConvBlockInit::default().build(&root, 4, 4, 8)?;

        let previous = Tensor::randn(&[2, 4, 4, 4], FLOAT_CPU);
        let latent_w = Tensor::randn(&[2, 8], FLOAT_CPU);
        let noise = Tensor::randn(&[2, 1, 4, 4], FLOAT_CPU);

        let output = block.f_forward(&previous, &latent_w, &noise)?;
        (output * Tensor::randn(&[2, 4, 4, 4], FLOAT_CPU))
            .sum(Kind::Float)
            .backward();

        let variables = vs.variables();
        ensure!(!variables.keys().any(|name| name.ends_with(".weight")));
        for (name, var) in variables {
            ensure!(var.grad().defined(), "{} has no gradient", name);
        }

        Ok(())
    }

    #[test]
    fn conv_block_test() -> Result<()> {
        let b = 2;
        let cx = 3;
        let cy = 8;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let block = ConvBlockInit::new(3, 1).build(&root / "same", cx, cy)?;
        let input = Tensor::randn(&[b, cx as i64, 8, 8], FLOAT_CPU);
        let output = block.f_forward(&input)?;
        assert_eq!(output.size(), vec![b, cy as i64, 8, 8]);

        let last = ConvBlockInit {
            ksize2: Some(4),
            padding2: Some(0),
            ..ConvBlockInit::new(3, 1)
        }
        .build(&root / "last", cy, cy)?;
        let input = Tensor::randn(&[b, cy as i64, 4, 4], FLOAT_CPU);
        let output = last.f_forward(&input)?;
        assert_eq!(output.size(), vec![b, cy as i64, 1, 1]);
        ensure!(last.in_channels() == cy && last.out_channels() == cy);

        // the 4x4 kernel does not fit a 2x2 map
        let small = Tensor::randn(&[b, cy as i64, 2, 2], FLOAT_CPU);
        ensure!(last.f_forward(&small).is_err());

        ensure!(last.f_forward(&Tensor::randn(&[b, cx as i64, 4, 4], FLOAT_CPU)).is_err());

        Ok(())
    }

    #[test]
    fn intermediate_generator_test() -> Result<()> {
        let b = 5;
        let w_dim = 16;

        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let mapping = IntermediateGeneratorInit {
            num_layers: 4,
            ..Default::default()
        }
        .build(&root / "mapping", w_dim)?;
        assert_eq!(mapping.num_layers(), 4);
        assert_eq!(vs.trainable_variables().len(), 8);

        let latent_z = Tensor::randn(&[b, w_dim as i64], FLOAT_CPU);
        let latent_w = mapping.f_forward(&latent_z)?;
        assert_eq!(latent_w.size(), vec![b, w_dim as i64]);

        // pixel norm makes the mapping invariant to the latent's magnitude
        let scaled = mapping.f_forward(&(&latent_z * 10.0))?;
        assert_abs_diff_eq!(
            f64::from((&latent_w - &scaled).abs().max()),
            0.0,
            epsilon = 1e-4
        );

        let bad = Tensor::randn(&[b, w_dim as i64 + 1], FLOAT_CPU);
        ensure!(mapping.f_forward(&bad).is_err());

        ensure!(IntermediateGeneratorInit {
            num_layers: 0,
            ..Default::default()
        }
        .build(&root / "empty", w_dim)
        .is_err());

        Ok(())
    }
}
