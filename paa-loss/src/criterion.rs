//! Classification and box regression criteria over rows of anchors.

use crate::{common::*, config::RegLossKind, error::PaaError};
use tch_modules::{
    BceWithLogitsLossInit, FocalLoss, FocalLossInit, GIoULoss, GIoULossInit, SmoothL1Loss,
    SmoothL1LossInit,
};

/// Sigmoid focal loss against integer anchor labels.
#[derive(Debug)]
pub struct ClassificationLoss {
    focal: FocalLoss,
}

impl ClassificationLoss {
    pub fn new(alpha: f64, gamma: f64) -> Result<Self> {
        let bce = BceWithLogitsLossInit::default(Reduction::None).build();
        let focal = FocalLossInit {
            alpha,
            gamma,
            ..FocalLossInit::default(Reduction::None, move |input, target| {
                bce.forward(input, target)
            })
        }
        .build()
        .map_err(|err| PaaError::invalid_argument(format!("{}", err)))?;
        Ok(Self { focal })
    }

    /// Compute the `[n, C]` elementwise loss of `[n, C]` logits.
    ///
    /// Labels are `[n]` integer codes. Code `k ≥ 1` marks class `k` as the target of its row,
    /// `0` is background and rows of `-1` are zeroed.
    pub fn forward(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let (num_rows, num_classes) = logits.size2()?;
        ensure!(
            labels.size() == vec![num_rows],
            PaaError::shape_mismatch(format!(
                "expect [{}] labels, but get {:?}",
                num_rows,
                labels.size()
            ))
        );
        let kind = logits.kind();
        let device = logits.device();

        let class_ids: Vec<i64> = (1..=num_classes).collect();
        let class_ids = Tensor::of_slice(&class_ids)
            .to_device(device)
            .view([1, num_classes]);
        let labels = labels.to_device(device).to_kind(Kind::Int64).view([-1, 1]);

        let target = labels.eq_tensor(&class_ids).to_kind(kind);
        let valid = labels.ge(0).to_kind(kind);
        let loss = self.focal.forward(logits, &target) * valid;
        Ok(loss)
    }
}

/// The box regression criterion on anchor-relative codes.
#[derive(Debug)]
pub enum RegressionLoss {
    GIoU(GIoULoss),
    SmoothL1(SmoothL1Loss),
}

impl RegressionLoss {
    pub fn new(kind: RegLossKind, box_coder: BoxCoder, smooth_l1_beta: f64) -> Result<Self> {
        let loss = match kind {
            RegLossKind::GIoU => Self::GIoU(
                GIoULossInit {
                    box_coder,
                    ..Default::default()
                }
                .build()?,
            ),
            RegLossKind::SmoothL1 => Self::SmoothL1(
                SmoothL1LossInit {
                    beta: smooth_l1_beta,
                    ..SmoothL1LossInit::default(Reduction::None)
                }
                .build()
                .map_err(|err| PaaError::invalid_argument(format!("{}", err)))?,
            ),
        };
        Ok(loss)
    }

    pub fn kind(&self) -> RegLossKind {
        match self {
            Self::GIoU(_) => RegLossKind::GIoU,
            Self::SmoothL1(_) => RegLossKind::SmoothL1,
        }
    }

    /// Compute the unreduced loss of `[n, 4]` predicted codes against target codes.
    ///
    /// The output is `[n]` for GIoU and `[n, 4]` for smooth L1. The optional `[n]` weight
    /// scales the loss of each anchor.
    pub fn forward(
        &self,
        pred: &Tensor,
        target: &Tensor,
        anchors: &Tensor,
        weight: Option<&Tensor>,
    ) -> Result<Tensor> {
        let loss = match self {
            Self::GIoU(giou) => {
                let has_weight = weight
                    .map(|weight| f64::from(weight.sum(Kind::Double)) > 0.0)
                    .unwrap_or(false);
                ensure!(
                    has_weight || pred.size()[0] > 0,
                    PaaError::invalid_argument(
                        "GIoU loss on an empty batch requires positive weights"
                    )
                );
                giou.forward(pred, target, anchors, weight)?
            }
            Self::SmoothL1(smooth_l1) => smooth_l1.forward(pred, target, weight),
        };
        Ok(loss)
    }

    /// Compute the loss of each anchor, averaged over its entries, as host values.
    pub fn per_anchor_losses(
        &self,
        pred: &Tensor,
        target: &Tensor,
        anchors: &Tensor,
    ) -> Result<Vec<f64>> {
        let values = self.forward(pred, target, anchors, None)?.f_to_f64_vec()?;
        let entries = self.kind().entries_per_box() as usize;
        let losses = values
            .chunks(entries)
            .map(|row| row.iter().sum::<f64>() / entries as f64)
            .collect();
        Ok(losses)
    }
}
