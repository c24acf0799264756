//! Probabilistic anchor assignment over candidate anchors.

use crate::{
    common::*,
    error::PaaError,
    gmm::{partition_candidates_with, GaussianMixture1D},
    label::{AnchorLabel, LabeledBox},
    matcher::MatchResult,
};

/// The final assignment of the anchors of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAssignment {
    pub labels: Vec<AnchorLabel>,
    /// The ground truth index of each positive anchor.
    pub gt_indexes: Vec<Option<usize>>,
    /// The number of ground truths whose candidates went through a mixture fit.
    pub num_mixture_fits: usize,
}

impl ImageAssignment {
    pub fn num_positives(&self) -> usize {
        self.labels.iter().filter(|label| label.is_positive()).count()
    }
}

/// Selects candidate anchors by their scores and splits them with a two-component mixture.
#[derive(Debug, Clone)]
pub struct PaaAssigner {
    topk: usize,
    gmm: GaussianMixture1D,
}

impl PaaAssigner {
    pub fn new(topk: usize) -> Result<Self> {
        ensure!(
            topk >= 1,
            PaaError::invalid_argument("topk must be at least 1")
        );
        Ok(Self {
            topk,
            gmm: GaussianMixture1D::default(),
        })
    }

    pub fn with_gmm(self, gmm: GaussianMixture1D) -> Self {
        Self { gmm, ..self }
    }

    pub fn topk(&self) -> usize {
        self.topk
    }

    /// Pick the candidates of one ground truth.
    ///
    /// In every level, the anchors matched to `gt_index` with an IoU-based positive label
    /// are ranked by ascending score and the first `topk` of them are taken. Ties keep the
    /// anchor order.
    pub fn select_candidates(
        &self,
        gt_index: usize,
        level_sizes: &[usize],
        scores: &[f64],
        iou_labels: &[AnchorLabel],
        matches: &[MatchResult],
    ) -> Vec<usize> {
        let mut candidates = vec![];
        let mut start = 0;

        for &size in level_sizes {
            let end = start + size;
            let mut level_candidates: Vec<usize> = (start..end)
                .filter(|&index| {
                    matches[index] == MatchResult::Matched(gt_index)
                        && iou_labels[index].is_positive()
                })
                .collect();
            level_candidates.sort_by(|&lhs, &rhs| {
                scores[lhs]
                    .partial_cmp(&scores[rhs])
                    .unwrap_or(Ordering::Equal)
            });
            candidates.extend(level_candidates.into_iter().take(self.topk));
            start = end;
        }

        candidates
    }

    /// Assign the anchors of one image.
    ///
    /// `level_sizes` are the anchor counts of the pyramid levels in concatenation order.
    pub fn assign_image(
        &self,
        targets: &[LabeledBox],
        level_sizes: &[usize],
        scores: &[f64],
        iou_labels: &[AnchorLabel],
        matches: &[MatchResult],
    ) -> Result<ImageAssignment> {
        let num_anchors: usize = level_sizes.iter().sum();
        ensure!(
            scores.len() == num_anchors
                && iou_labels.len() == num_anchors
                && matches.len() == num_anchors,
            PaaError::shape_mismatch(format!(
                "expect {} anchors, but get {} scores, {} labels and {} matches",
                num_anchors,
                scores.len(),
                iou_labels.len(),
                matches.len()
            ))
        );

        let candidates: Vec<Vec<usize>> = (0..targets.len())
            .map(|gt_index| {
                self.select_candidates(gt_index, level_sizes, scores, iou_labels, matches)
            })
            .collect();

        self.assign_candidates(targets, &candidates, scores)
    }

    /// Assign anchors from explicit candidate lists, one list per ground truth.
    ///
    /// Every anchor starts as negative. Ground truths are visited in index order, and the
    /// candidates of each are split into a positive prefix and negatives by ascending score.
    /// An anchor appearing in several lists keeps the outcome of the last one.
    pub fn assign_candidates(
        &self,
        targets: &[LabeledBox],
        candidates: &[Vec<usize>],
        scores: &[f64],
    ) -> Result<ImageAssignment> {
        ensure!(
            targets.len() == candidates.len(),
            PaaError::shape_mismatch(format!(
                "expect {} candidate lists, but get {}",
                targets.len(),
                candidates.len()
            ))
        );

        let num_anchors = scores.len();
        let mut labels = vec![AnchorLabel::Negative; num_anchors];
        let mut gt_indexes = vec![None; num_anchors];
        let mut num_mixture_fits = 0;

        for (gt_index, (target, candidates)) in izip!(targets, candidates).enumerate() {
            if let Some(&index) = candidates.iter().find(|&&index| index >= num_anchors) {
                bail!(PaaError::invalid_argument(format!(
                    "candidate anchor {} is out of range of {} anchors",
                    index, num_anchors
                )));
            }
            if candidates.is_empty() {
                continue;
            }

            let mut sorted = candidates.clone();
            sorted.sort_by(|&lhs, &rhs| {
                scores[lhs]
                    .partial_cmp(&scores[rhs])
                    .unwrap_or(Ordering::Equal)
            });
            let sorted_scores: Vec<f64> = sorted.iter().map(|&index| scores[index]).collect();

            let is_positive = if sorted.len() == 1 {
                vec![true]
            } else {
                num_mixture_fits += 1;
                partition_candidates_with(&self.gmm, &sorted_scores)
            };

            izip!(&sorted, &is_positive).for_each(|(&index, &is_positive)| {
                if is_positive {
                    labels[index] = AnchorLabel::Positive(target.class);
                    gt_indexes[index] = Some(gt_index);
                } else {
                    labels[index] = AnchorLabel::Negative;
                    gt_indexes[index] = None;
                }
            });

            debug!(
                "ground truth {}: {} positives out of {} candidates",
                gt_index,
                is_positive.iter().filter(|&&is_positive| is_positive).count(),
                sorted.len()
            );
        }

        Ok(ImageAssignment {
            labels,
            gt_indexes,
            num_mixture_fits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(class: usize) -> Result<LabeledBox> {
        LabeledBox::new([0.0, 0.0, 10.0, 10.0], class)
    }

    #[test]
    fn select_topk_per_level() -> Result<()> {
        let assigner = PaaAssigner::new(2)?;
        let scores = [0.5, 0.1, 0.3, 0.2, 0.9, 0.4, 0.4];
        let matches = [
            MatchResult::Matched(0),
            MatchResult::Matched(0),
            MatchResult::Matched(0),
            MatchResult::Matched(1),
            MatchResult::Matched(0),
            MatchResult::Matched(0),
            MatchResult::Matched(0),
        ];
        let iou_labels = [
            AnchorLabel::Positive(1),
            AnchorLabel::Positive(1),
            AnchorLabel::Positive(1),
            AnchorLabel::Positive(2),
            AnchorLabel::Positive(1),
            AnchorLabel::Positive(1),
            AnchorLabel::Positive(1),
        ];

        let candidates = assigner.select_candidates(0, &[4, 3], &scores, &iou_labels, &matches);
        // level 0 picks anchors 1 and 2, level 1 breaks the tie of 5 and 6 by order
        ensure!(candidates == vec![1, 2, 5, 6], "get {:?}", candidates);

        let candidates = assigner.select_candidates(1, &[4, 3], &scores, &iou_labels, &matches);
        ensure!(candidates == vec![3]);
        Ok(())
    }

    #[test]
    fn split_two_clusters() -> Result<()> {
        let assigner = PaaAssigner::new(9)?;
        let scores = [2.0, 0.1, 2.3, 0.15, 0.12, 2.1, 5.0];
        let assignment =
            assigner.assign_candidates(&[target(4)?], &[vec![0, 1, 2, 3, 4, 5]], &scores)?;

        let expect_labels = [
            AnchorLabel::Negative,
            AnchorLabel::Positive(4),
            AnchorLabel::Negative,
            AnchorLabel::Negative,
            AnchorLabel::Positive(4),
            AnchorLabel::Negative,
            AnchorLabel::Negative,
        ];
        ensure!(
            assignment.labels == expect_labels,
            "get {:?}",
            assignment.labels
        );
        ensure!(assignment.gt_indexes[1] == Some(0));
        ensure!(assignment.gt_indexes[3].is_none());
        ensure!(assignment.num_mixture_fits == 1);
        ensure!(assignment.num_positives() == 2);
        Ok(())
    }

    #[test]
    fn spread_scores_keep_lowest() -> Result<()> {
        let assigner = PaaAssigner::new(3)?;
        let scores = [0.9, 0.1, 0.5];
        let level_sizes = [3];
        let matches = [MatchResult::Matched(0); 3];
        let iou_labels = [AnchorLabel::Positive(1); 3];
        let assignment =
            assigner.assign_image(&[target(1)?], &level_sizes, &scores, &iou_labels, &matches)?;

        ensure!(assignment.labels[1] == AnchorLabel::Positive(1));
        ensure!(assignment.labels[0] == AnchorLabel::Negative);
        ensure!(assignment.num_mixture_fits == 1);
        Ok(())
    }

    #[test]
    fn single_candidate_is_positive() -> Result<()> {
        let assigner = PaaAssigner::new(1)?;
        let assignment = assigner.assign_candidates(&[target(2)?], &[vec![1]], &[0.7, 3.0])?;
        ensure!(assignment.labels == vec![AnchorLabel::Negative, AnchorLabel::Positive(2)]);
        ensure!(assignment.gt_indexes == vec![None, Some(0)]);
        ensure!(assignment.num_mixture_fits == 0);
        Ok(())
    }

    #[test]
    fn later_ground_truth_wins_shared_anchor() -> Result<()> {
        let assigner = PaaAssigner::new(9)?;
        let scores = [0.1, 0.8, 0.05, 0.9, 1.0];
        let candidates = vec![vec![0, 1, 2], vec![2, 3, 4]];

        let assignment =
            assigner.assign_candidates(&[target(1)?, target(2)?], &candidates, &scores)?;
        ensure!(assignment.labels[2] == AnchorLabel::Positive(2));
        ensure!(assignment.gt_indexes[2] == Some(1));

        let candidates = vec![vec![2, 3, 4], vec![0, 1, 2]];
        let assignment =
            assigner.assign_candidates(&[target(2)?, target(1)?], &candidates, &scores)?;
        ensure!(assignment.labels[2] == AnchorLabel::Positive(1));
        ensure!(assignment.gt_indexes[2] == Some(1));
        Ok(())
    }

    #[test]
    fn reject_bad_candidates() -> Result<()> {
        let assigner = PaaAssigner::new(9)?;
        ensure!(assigner
            .assign_candidates(&[target(1)?], &[vec![0, 5]], &[0.1, 0.2])
            .is_err());
        ensure!(assigner
            .assign_candidates(&[target(1)?], &[], &[0.1, 0.2])
            .is_err());
        ensure!(PaaAssigner::new(0).is_err());
        Ok(())
    }
}
