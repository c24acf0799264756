//! Two-component Gaussian mixture on scalar samples, fitted by expectation-maximization.

use crate::common::*;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GmmError {
    #[error("at least 2 samples are required, but get {0}")]
    TooFewSamples(usize),
    #[error("samples must be finite")]
    NonFinite,
    #[error("degenerate mixture: {0}")]
    Degenerate(&'static str),
}

/// The EM options of [GaussianMixture1D].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianMixture1D {
    /// Stop when the mean log-likelihood improves by less than this.
    pub tol: f64,
    /// Added to every variance.
    pub reg_covar: f64,
    pub max_iter: usize,
}

impl Default for GaussianMixture1D {
    fn default() -> Self {
        Self {
            tol: 1e-3,
            reg_covar: 1e-6,
            max_iter: 100,
        }
    }
}

/// The fitted mixture parameters.
#[derive(Debug, Clone, PartialEq, CopyGetters)]
pub struct GmmFit {
    #[get_copy = "pub"]
    weights: [f64; 2],
    #[get_copy = "pub"]
    means: [f64; 2],
    #[get_copy = "pub"]
    variances: [f64; 2],
    #[get_copy = "pub"]
    converged: bool,
    #[get_copy = "pub"]
    num_iterations: usize,
}

impl GaussianMixture1D {
    /// Fit the mixture with means initialized at the sample minimum and maximum, equal weights
    /// and unit variances.
    pub fn fit(&self, samples: &[f64]) -> Result<GmmFit, GmmError> {
        let num_samples = samples.len();
        if num_samples < 2 {
            return Err(GmmError::TooFewSamples(num_samples));
        }
        if !samples.iter().all(|value| value.is_finite()) {
            return Err(GmmError::NonFinite);
        }

        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut fit = GmmFit {
            weights: [0.5, 0.5],
            means: [min, max],
            variances: [1.0, 1.0],
            converged: false,
            num_iterations: 0,
        };
        let mut resp = vec![[0.0; 2]; num_samples];
        let mut lower_bound = f64::NEG_INFINITY;

        for iteration in 1..=self.max_iter {
            // E-step
            let mut log_norm_sum = 0.0;
            for (&sample, resp) in samples.iter().zip(resp.iter_mut()) {
                let weighted = fit.weighted_log_prob(sample);
                let log_norm = log_sum_exp(weighted);
                *resp = [
                    (weighted[0] - log_norm).exp(),
                    (weighted[1] - log_norm).exp(),
                ];
                log_norm_sum += log_norm;
            }
            let prev_lower_bound = lower_bound;
            lower_bound = log_norm_sum / num_samples as f64;

            // M-step
            fit.m_step(samples, &resp, self.reg_covar)?;
            fit.num_iterations = iteration;

            if !lower_bound.is_finite() {
                return Err(GmmError::Degenerate("non-finite log-likelihood"));
            }
            if (lower_bound - prev_lower_bound).abs() < self.tol {
                fit.converged = true;
                break;
            }
        }

        if !fit.converged {
            warn!("mixture fit did not converge in {} iterations", self.max_iter);
        }

        Ok(fit)
    }
}

impl GmmFit {
    /// Per-component `ln(weight) + ln N(x | mean, variance)`.
    fn weighted_log_prob(&self, sample: f64) -> [f64; 2] {
        let log_prob = |component: usize| {
            let mean = self.means[component];
            let variance = self.variances[component];
            self.weights[component].ln()
                - 0.5 * ((2.0 * PI).ln() + variance.ln() + (sample - mean).powi(2) / variance)
        };
        [log_prob(0), log_prob(1)]
    }

    fn m_step(
        &mut self,
        samples: &[f64],
        resp: &[[f64; 2]],
        reg_covar: f64,
    ) -> Result<(), GmmError> {
        for component in 0..2 {
            let nk = resp.iter().map(|resp| resp[component]).sum::<f64>() + 10.0 * f64::EPSILON;
            let mean = samples
                .iter()
                .zip(resp)
                .map(|(&sample, resp)| resp[component] * sample)
                .sum::<f64>()
                / nk;
            let variance = samples
                .iter()
                .zip(resp)
                .map(|(&sample, resp)| resp[component] * (sample - mean).powi(2))
                .sum::<f64>()
                / nk
                + reg_covar;

            if !(mean.is_finite() && variance.is_finite()) {
                return Err(GmmError::Degenerate("non-finite component parameters"));
            }
            if variance <= 0.0 {
                return Err(GmmError::Degenerate("non-positive variance"));
            }

            self.weights[component] = nk;
            self.means[component] = mean;
            self.variances[component] = variance;
        }

        let total: f64 = self.weights.iter().sum();
        self.weights.iter_mut().for_each(|weight| *weight /= total);
        Ok(())
    }

    /// Swap the components if needed so that component 0 has the lower mean.
    pub fn sort_by_mean(mut self) -> Self {
        if self.means[0] > self.means[1] {
            self.weights.swap(0, 1);
            self.means.swap(0, 1);
            self.variances.swap(0, 1);
        }
        self
    }

    /// The most probable component, the lower index on ties.
    pub fn predict(&self, sample: f64) -> usize {
        let [lhs, rhs] = self.weighted_log_prob(sample);
        if rhs > lhs {
            1
        } else {
            0
        }
    }

    /// The log-likelihood of the sample under the mixture.
    pub fn score_sample(&self, sample: f64) -> f64 {
        log_sum_exp(self.weighted_log_prob(sample))
    }
}

fn log_sum_exp(values: [f64; 2]) -> f64 {
    let max = values[0].max(values[1]);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|value| (value - max).exp()).sum::<f64>().ln()
}

/// Split candidates sorted by ascending anchor score into a positive prefix and the rest.
///
/// The mixture is fitted over the scores. The positive prefix ends at the first candidate of the
/// low-mean component with the highest likelihood. All candidates are positive when there is only
/// one, when the low-mean component is empty or when the fit fails.
pub fn partition_candidates(sorted_scores: &[f64]) -> Vec<bool> {
    partition_candidates_with(&GaussianMixture1D::default(), sorted_scores)
}

/// [partition_candidates] with custom EM options.
pub fn partition_candidates_with(gmm: &GaussianMixture1D, sorted_scores: &[f64]) -> Vec<bool> {
    let num_candidates = sorted_scores.len();
    debug_assert!(
        sorted_scores.windows(2).all(|pair| pair[0] <= pair[1]),
        "scores must be sorted in ascending order"
    );

    if num_candidates <= 1 {
        return vec![true; num_candidates];
    }

    let fit = match gmm.fit(sorted_scores) {
        Ok(fit) => fit.sort_by_mean(),
        Err(err) => {
            warn!(
                "mixture fit failed on {} candidates, treat all as positive: {}",
                num_candidates, err
            );
            return vec![true; num_candidates];
        }
    };

    let foreground: Vec<(usize, f64)> = sorted_scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| fit.predict(score) == 0)
        .map(|(index, &score)| (index, fit.score_sample(score)))
        .collect();

    let max_likelihood = foreground
        .iter()
        .map(|&(_, likelihood)| likelihood)
        .fold(f64::NEG_INFINITY, f64::max);
    let cutoff = foreground
        .iter()
        .find(|&&(_, likelihood)| likelihood == max_likelihood)
        .map(|&(index, _)| index);

    match cutoff {
        Some(cutoff) => (0..num_candidates).map(|index| index <= cutoff).collect(),
        None => vec![true; num_candidates],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    #[test]
    fn separate_two_clusters() -> Result<(), GmmError> {
        let samples = [0.1, 0.12, 0.15, 2.0, 2.1, 2.3];
        let fit = GaussianMixture1D::default().fit(&samples)?;
        ensure_converged(&fit);
        assert_abs_diff_eq!(fit.means()[0], 0.1233, epsilon = 1e-3);
        assert_abs_diff_eq!(fit.means()[1], 2.1333, epsilon = 1e-3);

        let components: Vec<_> = samples.iter().map(|&sample| fit.predict(sample)).collect();
        assert_eq!(components, vec![0, 0, 0, 1, 1, 1]);

        let mask = partition_candidates(&samples);
        assert_eq!(mask, vec![true, true, false, false, false, false]);
        Ok(())
    }

    fn ensure_converged(fit: &GmmFit) {
        assert!(fit.converged());
        assert!(fit.num_iterations() <= GaussianMixture1D::default().max_iter);
        assert_abs_diff_eq!(fit.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn lowest_score_is_always_positive() {
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let len = rng.gen_range(0..20);
            let mut scores: Vec<f64> = (0..len).map(|_| rng.gen_range(0.0..5.0)).collect();
            scores.sort_by(|lhs, rhs| lhs.partial_cmp(rhs).unwrap());

            let mask = partition_candidates(&scores);
            assert_eq!(mask.len(), len);
            if len > 0 {
                assert!(mask[0]);
            }
            // positives form a prefix
            assert!(mask.windows(2).all(|pair| pair[0] || !pair[1]));
        }
    }

    #[test]
    fn three_spread_candidates() {
        let mask = partition_candidates(&[0.1, 0.5, 0.9]);
        assert!(mask[0]);
        assert!(!mask[2]);
    }

    #[test]
    fn identical_scores() {
        let mask = partition_candidates(&[0.3, 0.3, 0.3]);
        assert_eq!(mask.len(), 3);
        assert!(mask[0]);
    }

    #[test]
    fn degenerate_inputs() {
        let gmm = GaussianMixture1D::default();
        assert_eq!(gmm.fit(&[1.0]), Err(GmmError::TooFewSamples(1)));
        assert_eq!(gmm.fit(&[1.0, f64::NAN]), Err(GmmError::NonFinite));
        assert_eq!(partition_candidates(&[]), Vec::<bool>::new());
        assert_eq!(partition_candidates(&[4.2]), vec![true]);
        assert_eq!(partition_candidates(&[1.0, f64::INFINITY]), vec![true, true]);
    }
}
