//! Typed error kinds carried inside [anyhow::Error].

use thiserror::Error;

/// The failure kinds of the loss computation.
///
/// They are raised through `anyhow` and can be recovered with
/// `err.downcast_ref::<PaaError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaaError {
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl PaaError {
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }
}
