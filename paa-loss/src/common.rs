pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, BoxCoder, TLBR};
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use ndarray::{Array2, ArrayView2, Axis};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    collections::HashSet,
    convert::TryFrom,
    fmt, fs, iter,
    path::Path,
    str::FromStr,
    sync::Arc,
};
pub use strum::{AsRefStr, IntoStaticStr};
pub use tch::{Device, IndexOp, Kind, Reduction, Tensor};
pub use tch_goodies::{BoxCoderTensorExt as _, TLBRTensor, TensorExt as _};
pub use tch_tensor_like::TensorLike;

#[cfg(feature = "profiling")]
pub use dashmap::DashSet;
#[cfg(feature = "profiling")]
pub use lazy_static::lazy_static;
#[cfg(feature = "profiling")]
pub use std::time::{Duration, Instant};

unzip_n::unzip_n!(pub 2);
