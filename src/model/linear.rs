use super::weight_scale::WeightScale;
use crate::common::*;

#[derive(Debug, Clone)]
pub struct ScaledLinearInit {
    pub ws_init: nn::Init,
    pub bs_init: Option<nn::Init>,
}

impl Default for ScaledLinearInit {
    fn default() -> Self {
        Self {
            ws_init: nn::Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
            bs_init: Some(nn::Init::Const(0.0)),
        }
    }
}

impl ScaledLinearInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<ScaledLinear> {
        let path = path.borrow();
        let Self { ws_init, bs_init } = self;
        ensure!(in_c > 0 && out_c > 0, "in_c and out_c must be positive");
        let in_c = in_c as i64;
        let out_c = out_c as i64;

        let weight = WeightScale::new(path, &[out_c, in_c], ws_init)?;
        let bias = bs_init.map(|bs_init| path.var("bias", &[out_c], bs_init));

        Ok(ScaledLinear {
            in_c,
            out_c,
            weight,
            bias,
        })
    }
}

/// Fully-connected layer with a runtime-scaled weight.
#[derive(Debug)]
pub struct ScaledLinear {
    in_c: i64,
    out_c: i64,
    weight: WeightScale,
    pub(crate) bias: Option<Tensor>,
}

impl nn::Module for ScaledLinear {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref weight,
            ref bias,
            ..
        } = *self;

        let xs = xs.matmul(&weight.weight().tr());
        match bias {
            Some(bias) => xs + bias,
            None => xs,
        }
    }
}

impl ScaledLinear {
    pub fn f_forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_bsize, in_c) = xs.size2()?;
        ensure!(
            in_c == self.in_c,
            "expect {} input features, but get {}",
            self.in_c,
            in_c
        );
        Ok(self.forward(xs))
    }

    pub fn in_channels(&self) -> usize {
        self.in_c as usize
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
