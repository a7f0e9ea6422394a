use crate::common::*;

#[derive(Debug, Clone, Copy)]
pub struct LeakyRelu {
    pub negative_slope: f64,
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self {
            negative_slope: 0.2,
        }
    }
}

impl nn::Module for LeakyRelu {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.clamp_min(0.0) + xs.clamp_max(0.0) * self.negative_slope
    }
}
