//! Drives every block once with random inputs and reports tensor shapes.
//!
//! The probe stands in for a training driver: it owns noise generation and
//! the resampling between blocks, which the blocks themselves leave out.

use crate::{
    common::*,
    config,
    model::{
        ConvBlock, ConvBlockInit, EarlyStyleConvBlock, EarlyStyleConvBlockInit,
        IntermediateGenerator, IntermediateGeneratorInit, StyleConvBlock, StyleConvBlockInit,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub latent_w: Vec<i64>,
    pub generator: Vec<Vec<i64>>,
    pub discriminator: Vec<Vec<i64>>,
    pub score: Vec<i64>,
    pub num_parameters: i64,
}

#[derive(Debug)]
struct Generator {
    mapping: IntermediateGenerator,
    early: EarlyStyleConvBlock,
    blocks: Vec<StyleConvBlock>,
}

#[derive(Debug)]
struct Discriminator {
    blocks: Vec<ConvBlock>,
    last: ConvBlock,
}

pub fn run(config: &config::Config) -> Result<ProbeReport> {
    let config::Config { model, probe } = config;
    let config::Probe { batch_size, device } = *probe;
    let bsize = batch_size.get() as i64;
    let latent_dim = model.latent_dim.get();

    let vs = nn::VarStore::new(device);
    let root = vs.root();

    let generator = build_generator(&root / "generator", model)?;
    let discriminator = build_discriminator(&root / "discriminator", model)?;

    let num_parameters: i64 = vs
        .trainable_variables()
        .iter()
        .map(|var| var.size().iter().product::<i64>())
        .sum();
    info!("{} trainable parameters", num_parameters);

    tch::no_grad(|| -> Result<_> {
        let kind = (Kind::Float, device);

        let latent_z = Tensor::randn(&[bsize, latent_dim as i64], kind);
        let latent_w = generator.mapping.f_forward(&latent_z)?;
        info!("latent_w: {:?}", latent_w.size());

        let generator_sizes = {
            let resol = generator.early.resol() as i64;
            let noise = Tensor::randn(&[bsize, 1, resol, resol], kind);
            let xs = generator.early.f_forward(&latent_w, &noise)?;
            info!("generator stage 0: {:?}", xs.size());

            let (_, sizes) = generator.blocks.iter().enumerate().try_fold(
                (xs.shallow_clone(), vec![xs.size()]),
                |(xs, mut sizes), (index, block)| -> Result<_> {
                    let xs = upsample_nearest(&xs)?;
                    let (_, _, h, w) = xs.size4()?;
                    let noise = Tensor::randn(&[bsize, 1, h, w], kind);
                    let xs = block.f_forward(&xs, &latent_w, &noise)?;
                    info!("generator stage {}: {:?}", index + 1, xs.size());
                    sizes.push(xs.size());
                    Ok((xs, sizes))
                },
            )?;
            sizes
        };

        let features = {
            let last = generator_sizes
                .last()
                .ok_or_else(|| format_err!("generator produced no stages"))?;
            Tensor::randn(last, kind)
        };

        let (features, discriminator_sizes) = discriminator.blocks.iter().enumerate().try_fold(
            (features, vec![]),
            |(xs, mut sizes), (index, block)| -> Result<_> {
                let xs = block.f_forward(&xs)?;
                let xs = downsample_avg(&xs)?;
                info!("discriminator stage {}: {:?}", index, xs.size());
                sizes.push(xs.size());
                Ok((xs, sizes))
            },
        )?;

        let score = discriminator.last.f_forward(&features)?.flatten(1, -1);
        info!("score: {:?}", score.size());

        Ok(ProbeReport {
            latent_w: latent_w.size(),
            generator: generator_sizes,
            discriminator: discriminator_sizes,
            score: score.size(),
            num_parameters,
        })
    })
}

fn build_generator<'a>(
    path: impl Borrow<nn::Path<'a>>,
    model: &config::Model,
) -> Result<Generator> {
    let path = path.borrow();
    let latent_dim = model.latent_dim.get();
    let channels: Vec<usize> = model.synthesis_channels.iter().map(|c| c.get()).collect();
    let first_c = *channels
        .first()
        .ok_or_else(|| format_err!("synthesis_channels must not be empty"))?;

    let mapping = IntermediateGeneratorInit {
        num_layers: model.mapping_layers.get(),
        ..Default::default()
    }
    .build(path / "mapping", latent_dim)?;

    let early = EarlyStyleConvBlockInit::default().build(
        path / "early",
        first_c,
        latent_dim,
        model.const_resol.get(),
    )?;

    let blocks: Vec<_> = izip!(&channels, channels.iter().skip(1))
        .enumerate()
        .map(|(index, (&in_c, &out_c))| {
            StyleConvBlockInit::default().build(
                path / format!("block{}", index),
                in_c,
                out_c,
                latent_dim,
            )
        })
        .collect::<Result<_>>()?;

    Ok(Generator {
        mapping,
        early,
        blocks,
    })
}

fn build_discriminator<'a>(
    path: impl Borrow<nn::Path<'a>>,
    model: &config::Model,
) -> Result<Discriminator> {
    let path = path.borrow();
    let in_c = model
        .synthesis_channels
        .last()
        .ok_or_else(|| format_err!("synthesis_channels must not be empty"))?
        .get();
    let channels: Vec<usize> = model
        .discriminator_channels
        .iter()
        .map(|c| c.get())
        .collect();
    let last_c = *channels
        .last()
        .ok_or_else(|| format_err!("discriminator_channels must not be empty"))?;

    // every discriminator block halves the generator's output resolution
    let image_resol = scale_pow2(
        model.const_resol.get(),
        model.synthesis_channels.len() - 1,
    )
    .ok_or_else(|| {
        format_err!(
            "{} synthesis stages overflow the image resolution",
            model.synthesis_channels.len()
        )
    })?;
    let num_halvings = channels.len();
    let divisor = scale_pow2(1, num_halvings)
        .ok_or_else(|| format_err!("cannot halve resolution {} for {} times", image_resol, num_halvings))?;
    ensure!(
        image_resol % divisor == 0,
        "cannot halve resolution {} for {} times",
        image_resol,
        num_halvings
    );
    let last_resol = image_resol / divisor;

    let blocks: Vec<_> = izip!(chain!(iter::once(&in_c), &channels), &channels)
        .enumerate()
        .map(|(index, (&in_c, &out_c))| {
            ConvBlockInit::new(3, 1).build(path / format!("block{}", index), in_c, out_c)
        })
        .collect::<Result<_>>()?;

    // collapses the remaining feature map into one value per sample
    let last = ConvBlockInit {
        ksize2: Some(last_resol),
        padding2: Some(0),
        ..ConvBlockInit::new(3, 1)
    }
    .build(path / "last", last_c, 1)?;

    Ok(Discriminator { blocks, last })
}

/// Computes `value * 2^exp`, or `None` on overflow.
fn scale_pow2(value: usize, exp: usize) -> Option<usize> {
    let exp = u32::try_from(exp).ok()?;
    let factor = 1usize.checked_shl(exp)?;
    value.checked_mul(factor)
}

fn upsample_nearest(xs: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = xs.size4()?;
    Ok(xs
        .reshape(&[b, c, h, 1, w, 1])
        .expand(&[b, c, h, 2, w, 2], false)
        .reshape(&[b, c, h * 2, w * 2]))
}

fn downsample_avg(xs: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = xs.size4()?;
    ensure!(
        h % 2 == 0 && w % 2 == 0,
        "cannot halve a {}x{} feature map",
        h,
        w
    );
    Ok(xs
        .reshape(&[b, c, h / 2, 2, w / 2, 2])
        .mean_dim(&[3, 5], false, Kind::Float))
}
