use crate::common::*;

#[derive(Debug, Clone)]
pub struct SmoothL1LossInit {
    /// The transition point between the quadratic and linear regions.
    pub beta: f64,
    pub reduction: Reduction,
}

impl SmoothL1LossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            beta: 1.0 / 9.0,
            reduction,
        }
    }

    pub fn build(self) -> Result<SmoothL1Loss> {
        let Self { beta, reduction } = self;
        ensure!(
            beta.is_finite() && beta >= 0.0,
            "beta must be a non-negative finite number, but get {}",
            beta
        );
        Ok(SmoothL1Loss { beta, reduction })
    }
}

/// Elementwise smooth L1 (Huber-like) loss.
///
/// `0.5·x²/β` where `|x| < β`, and `|x| − 0.5·β` otherwise. A zero `β` degenerates to L1.
#[derive(Debug)]
pub struct SmoothL1Loss {
    beta: f64,
    reduction: Reduction,
}

impl SmoothL1Loss {
    /// Compute the loss between `[n, 4]` box codes.
    ///
    /// The optional `[n]` weight scales every coordinate of its row.
    pub fn forward(&self, input: &Tensor, target: &Tensor, weight: Option<&Tensor>) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target shape must be equal"
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.is_empty() && self.reduction == Reduction::Mean {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        let Self { beta, reduction } = *self;

        let diff = (input - target).abs();
        let loss = if beta > 0.0 {
            let quadratic = &diff * &diff * (0.5 / beta);
            let linear = &diff - 0.5 * beta;
            quadratic.where_self(&diff.lt(beta), &linear)
        } else {
            diff
        };

        let loss = match weight {
            Some(weight) => loss * weight.view([-1, 1]),
            None => loss,
        };

        match reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => unimplemented!(),
        }
    }
}
