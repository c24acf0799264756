//! Per-anchor loss scores under the IoU-based assignment.

use crate::{
    common::*,
    criterion::{ClassificationLoss, RegressionLoss},
    error::PaaError,
    label::AnchorLabel,
};

/// The regression score of anchors that are not IoU-based positives.
pub const INF: f64 = 1e8;

/// Scores anchors by how well the current predictions fit their IoU-based targets.
///
/// The score of an anchor is its classification loss summed over classes, plus its box
/// regression loss if it is an IoU-based positive, or [INF] otherwise. Lower is better.
#[derive(Debug, Clone, Copy)]
pub struct AnchorScorer<'a> {
    pub cls_loss: &'a ClassificationLoss,
    pub reg_loss: &'a RegressionLoss,
}

impl AnchorScorer<'_> {
    /// Score the `[n]` rows of anchors.
    ///
    /// `cls_logits` is `[n, C]`, and `box_regression`, `anchors` and `reg_targets` are
    /// `[n, 4]`. Predictions are detached, so the scores carry no gradient.
    pub fn score(
        &self,
        cls_logits: &Tensor,
        box_regression: &Tensor,
        anchors: &Tensor,
        labels: &[AnchorLabel],
        reg_targets: &Tensor,
    ) -> Result<Vec<f64>> {
        let (num_rows, num_classes) = cls_logits.size2()?;
        ensure!(
            labels.len() as i64 == num_rows
                && box_regression.size() == vec![num_rows, 4]
                && anchors.size() == vec![num_rows, 4]
                && reg_targets.size() == vec![num_rows, 4],
            PaaError::shape_mismatch(format!(
                "cannot score {} labels with logits {:?}, codes {:?}, anchors {:?} and targets {:?}",
                labels.len(),
                cls_logits.size(),
                box_regression.size(),
                anchors.size(),
                reg_targets.size()
            ))
        );

        tch::no_grad(|| -> Result<_> {
            let device = cls_logits.device();
            let cls_logits = cls_logits.detach();
            let box_regression = box_regression.detach();

            let cls_scores: Vec<f64> = {
                let label_codes = AnchorLabel::to_tensor(labels, device);
                let losses = self
                    .cls_loss
                    .forward(&cls_logits, &label_codes)?
                    .f_to_f64_vec()?;
                losses
                    .chunks(num_classes.max(1) as usize)
                    .map(|row| row.iter().sum())
                    .collect()
            };

            let mut reg_scores = vec![INF; labels.len()];
            let pos_indexes: Vec<i64> = labels
                .iter()
                .enumerate()
                .filter(|(_, label)| label.is_positive())
                .map(|(index, _)| index as i64)
                .collect();

            if !pos_indexes.is_empty() {
                let indexes = Tensor::of_slice(&pos_indexes).to_device(device);
                let losses = self.reg_loss.per_anchor_losses(
                    &box_regression.f_index_select(0, &indexes)?,
                    &reg_targets.f_index_select(0, &indexes)?,
                    &anchors.f_index_select(0, &indexes)?,
                )?;
                izip!(&pos_indexes, losses).for_each(|(&index, loss)| {
                    reg_scores[index as usize] = loss;
                });
            }

            let scores: Vec<f64> = izip!(&cls_scores, &reg_scores)
                .map(|(cls, reg)| cls + reg)
                .collect();

            if let Some(index) = scores.iter().position(|score| score.is_nan()) {
                bail!(PaaError::numerical(format!(
                    "the score of anchor {} is NaN",
                    index
                )));
            }

            Ok(scores)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegLossKind;
    use approx::assert_abs_diff_eq;

    #[test]
    fn score_positive_and_negative_anchors() -> Result<()> {
        let cls_loss = ClassificationLoss::new(0.25, 2.0)?;
        let reg_loss = RegressionLoss::new(RegLossKind::GIoU, BoxCoder::default(), 1.0 / 9.0)?;
        let scorer = AnchorScorer {
            cls_loss: &cls_loss,
            reg_loss: &reg_loss,
        };

        let cls_logits = Tensor::zeros(&[3, 2], (Kind::Float, Device::Cpu));
        let box_regression = Tensor::zeros(&[3, 4], (Kind::Float, Device::Cpu));
        let anchors = Tensor::of_slice(&[
            0.0f32, 0.0, 10.0, 10.0, //
            0.0, 0.0, 10.0, 10.0, //
            0.0, 0.0, 10.0, 10.0,
        ])
        .view([3, 4]);
        let reg_targets = Tensor::zeros(&[3, 4], (Kind::Float, Device::Cpu));
        let labels = [
            AnchorLabel::Positive(1),
            AnchorLabel::Negative,
            AnchorLabel::Ignored,
        ];

        let scores = scorer.score(&cls_logits, &box_regression, &anchors, &labels, &reg_targets)?;

        let ln2 = 2f64.ln();
        let pos = 0.25 * 0.25 * ln2;
        let neg = 0.75 * 0.25 * ln2;
        assert_abs_diff_eq!(scores[0], pos + neg, epsilon = 1e-5);
        assert_abs_diff_eq!(scores[1], 2.0 * neg + INF, epsilon = 1e-3);
        assert_abs_diff_eq!(scores[2], INF, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn reject_nan_scores() -> Result<()> {
        let cls_loss = ClassificationLoss::new(0.25, 2.0)?;
        let reg_loss =
            RegressionLoss::new(RegLossKind::SmoothL1, BoxCoder::default(), 1.0 / 9.0)?;
        let scorer = AnchorScorer {
            cls_loss: &cls_loss,
            reg_loss: &reg_loss,
        };

        let cls_logits = Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu));
        let box_regression = Tensor::of_slice(&[f32::NAN, 0.0, 0.0, 0.0]).view([1, 4]);
        let anchors = Tensor::of_slice(&[0.0f32, 0.0, 10.0, 10.0]).view([1, 4]);
        let reg_targets = Tensor::zeros(&[1, 4], (Kind::Float, Device::Cpu));

        let err = scorer
            .score(
                &cls_logits,
                &box_regression,
                &anchors,
                &[AnchorLabel::Positive(2)],
                &reg_targets,
            )
            .unwrap_err();
        ensure!(matches!(
            err.downcast_ref::<PaaError>(),
            Some(PaaError::Numerical(_))
        ));
        Ok(())
    }
}
