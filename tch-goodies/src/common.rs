pub use anyhow::{ensure, format_err, Result};
pub use getset::Getters;
pub use std::borrow::Borrow;
pub use tch::{Kind, Tensor};
pub use tch_tensor_like::TensorLike;
