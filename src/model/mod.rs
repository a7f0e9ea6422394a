mod activation;
mod conv;
mod linear;
mod norm;
mod stylegan;
mod weight_scale;

pub use activation::*;
pub use conv::*;
pub use linear::*;
pub use norm::*;
pub use stylegan::*;
pub use weight_scale::*;
