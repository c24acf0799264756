//! Probabilistic anchor assignment and the detection losses built on it.
//!
//! The entry point is [PaaLoss](loss::PaaLoss), usually built from a [Config](config::Config).
//! It scores every anchor with a cheap IoU-based assignment, fits a two-mode Gaussian mixture
//! over the scores of each object's candidate anchors, and computes classification, box
//! regression and IoU-quality losses from the resulting assignment.

mod common;
pub mod assign;
pub mod box_list;
pub mod config;
pub mod criterion;
pub mod error;
pub mod gmm;
pub mod iou_calc;
pub mod label;
pub mod loss;
pub mod matcher;
pub mod prediction;
pub mod profiling;
pub mod reduce;
pub mod scorer;
pub mod target;

pub use assign::*;
pub use box_list::*;
pub use config::*;
pub use criterion::*;
pub use error::*;
pub use gmm::*;
pub use iou_calc::*;
pub use label::*;
pub use loss::*;
pub use matcher::*;
pub use prediction::*;
pub use reduce::*;
pub use scorer::*;
pub use target::*;
