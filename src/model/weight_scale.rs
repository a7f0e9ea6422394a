use crate::common::*;

/// Runtime weight scaling for equalized learning rate.
///
/// The trainable tensor is registered as `weight_orig` and is never fed to a
/// layer directly. Every call to [WeightScale::weight] derives the effective
/// weight `weight_orig * sqrt(2 / fan_in)`, so gradients only reach the raw
/// parameter and no scaled copy is ever stored.
#[derive(Debug)]
pub struct WeightScale {
    weight_orig: Tensor,
}

impl WeightScale {
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        dims: &[i64],
        init: nn::Init,
    ) -> Result<Self> {
        let path = path.borrow();
        ensure!(
            dims.len() >= 2,
            "scaled weight must have at least 2 dimensions, but get {:?}",
            dims
        );
        ensure!(
            dims.iter().all(|&dim| dim > 0),
            "scaled weight dimensions must be positive, but get {:?}",
            dims
        );

        let weight_orig = path.var("weight_orig", dims, init);
        Ok(Self { weight_orig })
    }

    /// Input connections per output unit, derived from the raw weight shape.
    pub fn fan_in(&self) -> i64 {
        fan_in(&self.weight_orig)
    }

    pub fn gain(&self) -> f64 {
        (2.0 / self.fan_in() as f64).sqrt()
    }

    pub fn weight(&self) -> Tensor {
        &self.weight_orig * self.gain()
    }

    pub fn weight_orig(&self) -> &Tensor {
        &self.weight_orig
    }

    pub fn set_trainable(&self, trainable: bool) {
        let _ = self.weight_orig.set_requires_grad(trainable);
    }
}

/// Computes `size(1) * numel(weight[0][0])`.
pub fn fan_in(weight: &Tensor) -> i64 {
    weight.size()[1..].iter().product()
}
