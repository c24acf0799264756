//! Assignment of anchors to ground truth boxes by match quality.

use crate::{common::*, error::PaaError};

/// The matching outcome of one anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchResult {
    /// Matched to the ground truth of this index.
    Matched(usize),
    /// The best quality is below the low threshold.
    BelowLowThreshold,
    /// The best quality is between the low and high thresholds.
    BetweenThresholds,
}

impl MatchResult {
    pub fn matched_index(&self) -> Option<usize> {
        match *self {
            Self::Matched(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatcherInit {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub allow_low_quality_matches: bool,
}

impl MatcherInit {
    /// A single-threshold matcher.
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            low_threshold: threshold,
            high_threshold: threshold,
            allow_low_quality_matches: true,
        }
    }

    pub fn build(self) -> Result<Matcher> {
        let Self {
            low_threshold,
            high_threshold,
            allow_low_quality_matches,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&low_threshold) && (0.0..=1.0).contains(&high_threshold),
            PaaError::invalid_argument("matcher thresholds must be in range [0, 1]")
        );
        ensure!(
            low_threshold <= high_threshold,
            PaaError::invalid_argument(format!(
                "low_threshold ({}) must not exceed high_threshold ({})",
                low_threshold, high_threshold
            ))
        );

        Ok(Matcher {
            low_threshold,
            high_threshold,
            allow_low_quality_matches,
        })
    }
}

/// Matches every anchor to its best ground truth.
#[derive(Debug, Clone, CopyGetters)]
pub struct Matcher {
    #[get_copy = "pub"]
    low_threshold: f64,
    #[get_copy = "pub"]
    high_threshold: f64,
    #[get_copy = "pub"]
    allow_low_quality_matches: bool,
}

impl Matcher {
    /// Match anchors against the `[num_gt, num_anchors]` quality matrix.
    ///
    /// Ties pick the lowest ground truth index. Without ground truth boxes every anchor is
    /// below the low threshold. With low-quality matches enabled, every anchor that attains a
    /// ground truth's positive best quality gets back its own best match even below the
    /// thresholds. Ground truths that overlap no anchor (best quality 0) stay unmatched.
    pub fn match_quality(&self, quality: ArrayView2<'_, f64>) -> Vec<MatchResult> {
        let (num_gt, num_anchors) = quality.dim();
        if num_gt == 0 {
            return vec![MatchResult::BelowLowThreshold; num_anchors];
        }

        // best ground truth per anchor, first index on ties
        let best: Vec<(usize, f64)> = quality
            .columns()
            .into_iter()
            .map(|column| {
                column
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |(best_index, best_value), (index, &value)| {
                        if value > best_value {
                            (index, value)
                        } else {
                            (best_index, best_value)
                        }
                    })
            })
            .collect();

        let mut matches: Vec<MatchResult> = best
            .iter()
            .map(|&(gt_index, value)| {
                if value < self.low_threshold {
                    MatchResult::BelowLowThreshold
                } else if value < self.high_threshold {
                    MatchResult::BetweenThresholds
                } else {
                    MatchResult::Matched(gt_index)
                }
            })
            .collect();

        if self.allow_low_quality_matches {
            quality.rows().into_iter().for_each(|row| {
                let highest = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if highest <= 0.0 {
                    return;
                }

                row.iter()
                    .enumerate()
                    .filter(|&(_, &value)| value == highest)
                    .for_each(|(anchor_index, _)| {
                        let (gt_index, _) = best[anchor_index];
                        matches[anchor_index] = MatchResult::Matched(gt_index);
                    });
            });
        }

        matches
    }

    /// Match anchors against a `[num_gt, num_anchors]` quality tensor.
    pub fn match_quality_tensor(&self, quality: &Tensor) -> Result<Vec<MatchResult>> {
        let (num_gt, num_anchors) = quality.size2()?;
        let values = quality.f_to_f64_vec()?;
        let quality = Array2::from_shape_vec((num_gt as usize, num_anchors as usize), values)?;
        Ok(self.match_quality(quality.view()))
    }
}
