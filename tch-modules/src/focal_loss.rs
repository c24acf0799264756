use crate::common::*;

/// Focal loss initializer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FocalLossInit<F>
where
    F: 'static + Fn(&Tensor, &Tensor) -> Tensor + Send,
{
    /// The wrapped loss function.
    #[derivative(Debug = "ignore")]
    pub loss_fn: F,
    /// The gamma coefficient.
    pub gamma: f64,
    /// The alpha coefficient.
    pub alpha: f64,
    /// The reduction method applied on output loss.
    pub reduction: Reduction,
}

impl<F> FocalLossInit<F>
where
    F: 'static + Fn(&Tensor, &Tensor) -> Tensor + Send,
{
    pub fn default(reduction: Reduction, loss_fn: F) -> Self {
        Self {
            loss_fn,
            gamma: 2.0,
            alpha: 0.25,
            reduction,
        }
    }

    /// Build a focal loss calculator.
    pub fn build(self) -> Result<FocalLoss> {
        let Self {
            loss_fn,
            gamma,
            alpha,
            reduction,
        } = self;

        ensure!(gamma >= 0.0, "gamma must be non-negative, but get {}", gamma);
        ensure!(
            (0.0..=1.0).contains(&alpha),
            "alpha must be in range [0, 1], but get {}",
            alpha
        );

        Ok(FocalLoss {
            loss_fn: Box::new(loss_fn),
            gamma,
            alpha,
            reduction,
        })
    }
}

/// Focal loss calculator.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FocalLoss {
    #[derivative(Debug = "ignore")]
    loss_fn: Box<dyn Fn(&Tensor, &Tensor) -> Tensor + Send>,
    gamma: f64,
    alpha: f64,
    reduction: Reduction,
}

impl FocalLoss {
    /// Compute focal loss from an input against to a ground truth.
    ///
    /// The wrapped loss function must produce elementwise losses.
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target shape must be equal"
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.is_empty() && self.reduction == Reduction::Mean {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        let Self {
            ref loss_fn,
            gamma,
            alpha,
            reduction,
        } = *self;

        let orig_loss = loss_fn(input, target);
        debug_assert_eq!(
            orig_loss.size(),
            target.size(),
            "the contained loss function must not apply reduction"
        );

        let input_prob = input.sigmoid();
        let p_t: Tensor = target * &input_prob + (1.0 - target) * (1.0 - &input_prob);
        let alpha_factor = target * alpha + (1.0 - target) * (1.0 - alpha);
        let modulating_factor = (-&p_t + 1.0).pow(&gamma.into());
        let loss: Tensor = &orig_loss * &alpha_factor * &modulating_factor;

        match reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => unimplemented!(),
        }
    }
}
