//! Loss function building blocks on `tch`.

mod common;
pub mod bce_with_logits_loss;
pub mod focal_loss;
pub mod giou_loss;
pub mod smooth_l1_loss;

pub use bce_with_logits_loss::*;
pub use focal_loss::*;
pub use giou_loss::*;
pub use smooth_l1_loss::*;
