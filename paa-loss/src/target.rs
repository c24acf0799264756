//! The cheap IoU-based assignment used to score anchors.

use crate::{
    box_list::BoxList,
    common::*,
    label::{AnchorLabel, LabeledBox},
    matcher::{MatchResult, Matcher},
};

/// The IoU-based assignment of the anchors of one image.
#[derive(Debug)]
pub struct IouBasedTargets {
    pub matches: Vec<MatchResult>,
    pub labels: Vec<AnchorLabel>,
    /// Codes of the matched ground truth boxes in shape `[M, 4]`.
    ///
    /// Unmatched anchors are encoded against the first ground truth box, or hold zeros if the
    /// image has none. Only rows of positive labels are meaningful.
    pub reg_targets: Tensor,
}

#[derive(Debug, Clone)]
pub struct IouTargetPreparer {
    matcher: Matcher,
    box_coder: BoxCoder,
}

impl IouTargetPreparer {
    pub fn new(matcher: Matcher, box_coder: BoxCoder) -> Self {
        Self { matcher, box_coder }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Match the concatenated anchors of one image to its ground truth boxes.
    pub fn prepare(&self, targets: &[LabeledBox], anchors: &BoxList) -> Result<IouBasedTargets> {
        let anchors_xyxy = anchors.xyxy()?;
        let num_anchors = anchors.len() as usize;

        if targets.is_empty() {
            return Ok(IouBasedTargets {
                matches: vec![MatchResult::BelowLowThreshold; num_anchors],
                labels: vec![AnchorLabel::Negative; num_anchors],
                reg_targets: anchors_xyxy.zeros_like(),
            });
        }

        let gt_xyxy =
            LabeledBox::to_xyxy_tensor(targets, anchors_xyxy.kind(), anchors_xyxy.device());
        let gt_list = BoxList::from_xyxy(gt_xyxy.shallow_clone(), anchors.image_size())?;
        let quality = gt_list.pairwise_iou_with(anchors)?;
        let matches = self.matcher.match_quality_tensor(&quality)?;

        let labels: Vec<AnchorLabel> = matches
            .iter()
            .map(|result| match *result {
                MatchResult::Matched(gt_index) => AnchorLabel::Positive(targets[gt_index].class),
                MatchResult::BelowLowThreshold => AnchorLabel::Negative,
                MatchResult::BetweenThresholds => AnchorLabel::Ignored,
            })
            .collect();

        let reg_targets = {
            let gt_indexes: Vec<i64> = matches
                .iter()
                .map(|result| result.matched_index().unwrap_or(0) as i64)
                .collect();
            let gt_indexes = Tensor::of_slice(&gt_indexes).to_device(gt_xyxy.device());
            let matched_gt = gt_xyxy.f_index_select(0, &gt_indexes)?;
            self.box_coder
                .f_encode_tensor(&matched_gt, &anchors_xyxy)?
                .set_requires_grad(false)
        };

        Ok(IouBasedTargets {
            matches,
            labels,
            reg_targets,
        })
    }
}
