//! Safe bounding box types and functions.

mod common;

pub use rect::*;
pub mod rect;

pub use tlbr::*;
pub mod tlbr;

pub use box_coder::*;
pub mod box_coder;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
