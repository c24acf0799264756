//! Cross-worker reduction of the scalar statistics used as loss normalizers.

use crate::common::*;

/// The all-reduce-sum collaborator of the loss.
///
/// Each worker passes its local value and receives the sum over all workers.
pub trait Reducer: fmt::Debug + Send + Sync {
    /// The number of participating workers, at least one.
    fn world_size(&self) -> usize;

    fn reduce_sum(&self, value: f64) -> f64;

    /// Sum over workers divided by the number of workers.
    fn reduce_mean(&self, value: f64) -> f64 {
        self.reduce_sum(value) / self.world_size().max(1) as f64
    }
}

/// The identity reducer of a single-worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleWorker;

impl Reducer for SingleWorker {
    fn world_size(&self) -> usize {
        1
    }

    fn reduce_sum(&self, value: f64) -> f64 {
        value
    }
}
