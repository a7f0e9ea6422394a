use super::weight_scale::WeightScale;
use crate::common::*;

#[derive(Debug, Clone)]
pub struct ScaledConv2DInit {
    pub ksize: usize,
    pub stride: usize,
    pub padding: usize,
    pub ws_init: nn::Init,
    pub bs_init: Option<nn::Init>,
}

impl ScaledConv2DInit {
    pub fn new(ksize: usize) -> Self {
        Self {
            ksize,
            stride: 1,
            padding: ksize / 2,
            ws_init: nn::Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
            bs_init: Some(nn::Init::Const(0.0)),
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<ScaledConv2D> {
        let path = path.borrow();
        let Self {
            ksize,
            stride,
            padding,
            ws_init,
            bs_init,
        } = self;

        ensure!(ksize > 0, "ksize must be positive");
        ensure!(stride > 0, "stride must be positive");
        ensure!(in_c > 0 && out_c > 0, "in_c and out_c must be positive");

        let in_c = in_c as i64;
        let out_c = out_c as i64;
        let ksize = ksize as i64;
        let stride = stride as i64;
        let padding = padding as i64;

        let weight = WeightScale::new(path, &[out_c, in_c, ksize, ksize], ws_init)?;
        let bias = bs_init.map(|bs_init| path.var("bias", &[out_c], bs_init));

        Ok(ScaledConv2D {
            in_c,
            out_c,
            stride: [stride; 2],
            padding: [padding; 2],
            weight,
            bias,
        })
    }
}

#[derive(Debug)]
pub struct ScaledConv2D {
    in_c: i64,
    out_c: i64,
    stride: [i64; 2],
    padding: [i64; 2],
    weight: WeightScale,
    bias: Option<Tensor>,
}

impl nn::Module for ScaledConv2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref stride,
            ref padding,
            ref weight,
            ref bias,
            ..
        } = *self;

        xs.convolution(
            &weight.weight(),
            bias.as_ref(),
            stride,
            padding,
            &[1, 1], // dilation
            false,   // transposed
            &[0, 0], // output_padding
            1,       // groups
        )
    }
}

impl ScaledConv2D {
    pub fn f_forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_bsize, in_c, in_h, in_w) = xs.size4()?;
        ensure!(
            in_c == self.in_c,
            "expect {} input channels, but get {}",
            self.in_c,
            in_c
        );

        let ksize = self.ksize();
        let [pad_h, pad_w] = self.padding;
        ensure!(
            in_h + 2 * pad_h >= ksize && in_w + 2 * pad_w >= ksize,
            "input of size {}x{} with padding {} is smaller than kernel size {}",
            in_h,
            in_w,
            pad_h,
            ksize
        );

        Ok(self.forward(xs))
    }

    pub fn in_channels(&self) -> usize {
        self.in_c as usize
    }

    fn ksize(&self) -> i64 {
        self.weight.weight_orig().size()[3]
    }

    pub fn out_channels(&self) -> usize {
        self.out_c as usize
    }

    pub fn weight(&self) -> &WeightScale {
        &self.weight
    }

    pub fn set_trainable(&self, trainable: bool) {
        let Self { weight, bias, .. } = self;
        weight.set_trainable(trainable);
        if let Some(bias) = bias {
            let _ = bias.set_requires_grad(trainable);
        }
    }
}
