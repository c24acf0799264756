use crate::common::*;
use bbox::BoxCoder;
use tch_goodies::{BoxCoderTensorExt as _, TLBRTensor};

#[derive(Debug, Clone)]
pub struct GIoULossInit {
    pub box_coder: BoxCoder,
    /// The constant added to union and enclosing areas.
    pub epsilon: f64,
}

impl GIoULossInit {
    pub fn build(self) -> Result<GIoULoss> {
        let Self { box_coder, epsilon } = self;
        ensure!(
            epsilon.is_finite() && epsilon > 0.0,
            "epsilon must be positive, but get {}",
            epsilon
        );
        Ok(GIoULoss { box_coder, epsilon })
    }
}

impl Default for GIoULossInit {
    fn default() -> Self {
        Self {
            box_coder: BoxCoder::default(),
            epsilon: 1e-7,
        }
    }
}

/// Generalized IoU loss `1 − GIoU` on anchor-relative box codes.
#[derive(Debug)]
pub struct GIoULoss {
    box_coder: BoxCoder,
    epsilon: f64,
}

impl GIoULoss {
    pub fn box_coder(&self) -> &BoxCoder {
        &self.box_coder
    }

    /// Compute per-anchor losses of shape `[n]`.
    ///
    /// Predicted and target `[n, 4]` codes are decoded against the `[n, 4]` anchors. The losses
    /// are scaled by `weight` if it is given and has a positive sum. Otherwise the batch must be
    /// non-empty.
    pub fn forward(
        &self,
        pred: &Tensor,
        target: &Tensor,
        anchors: &Tensor,
        weight: Option<&Tensor>,
    ) -> Result<Tensor> {
        let pred_boxes = self.box_coder.f_decode_tensor(pred, anchors)?;
        let target_boxes = self.box_coder.f_decode_tensor(target, anchors)?;
        let pred_boxes = TLBRTensor::from_xyxy(&pred_boxes)?;
        let target_boxes = TLBRTensor::from_xyxy(&target_boxes)?;

        let giou = pred_boxes.giou_with(&target_boxes, self.epsilon);
        let losses = (1.0 - giou).view([-1]);

        let weight = match weight {
            Some(weight) => {
                let weight_sum = f64::from(weight.sum(Kind::Double));
                if weight_sum > 0.0 {
                    Some(weight)
                } else {
                    warn!("ignore GIoU loss weights summing to {}", weight_sum);
                    None
                }
            }
            None => None,
        };

        match weight {
            Some(weight) => Ok(losses * weight.view([-1])),
            None => {
                ensure!(
                    !losses.is_empty(),
                    "GIoU loss on an empty batch requires positive weights"
                );
                Ok(losses)
            }
        }
    }
}
