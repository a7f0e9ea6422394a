pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use itertools::{chain, izip, Itertools};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    fs, iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, Module},
    Device, Kind, Tensor,
};
pub use tracing::{debug, info, warn};
