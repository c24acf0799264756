pub use anyhow::{ensure, Result};
pub use derivative::Derivative;
pub use log::warn;
pub use tch::{Device, Kind, Reduction, Tensor};
pub use tch_goodies::TensorExt;
