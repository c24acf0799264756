//! Tensor extensions and tensor-valued box geometry on top of `tch`.

mod common;
pub mod box_coder;
pub mod tensor;
pub mod tlbr_tensor;

pub use box_coder::*;
pub use tensor::*;
pub use tlbr_tensor::*;
