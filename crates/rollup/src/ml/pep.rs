//! Posterior error probability estimation.
//!
//! Four interchangeable estimators sit behind [`posterior_errors`]: the
//! internal density-ratio estimators (`kde_nnls`, `hist_nnls`) and the
//! external qvality binary (`qvality` with an internal fallback,
//! `qvality_bin` without one). Whatever the estimator, the returned PEPs are
//! clamped to [0, 1] and monotone non-decreasing as the score decreases.

use super::{isotonic, kde, qvality};
use crate::Error;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PepAlgorithm {
    /// External binary when present, internal histogram estimator otherwise.
    Qvality,
    /// External binary, required.
    QvalityBin,
    KdeNnls,
    HistNnls,
}

impl std::str::FromStr for PepAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qvality" => Ok(Self::Qvality),
            "qvality_bin" => Ok(Self::QvalityBin),
            "kde_nnls" => Ok(Self::KdeNnls),
            "hist_nnls" => Ok(Self::HistNnls),
            _ => Err(format!("`{}` is not a PEP algorithm", s)),
        }
    }
}

impl std::fmt::Display for PepAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qvality => f.write_str("qvality"),
            Self::QvalityBin => f.write_str("qvality_bin"),
            Self::KdeNnls => f.write_str("kde_nnls"),
            Self::HistNnls => f.write_str("hist_nnls"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PepConfig {
    pub algorithm: PepAlgorithm,
    /// Seed for the KDE subsampler. Threaded through explicitly; there is no
    /// process-wide RNG state anywhere in this crate.
    pub seed: u64,
    /// KDE cost grows with sample size; inputs above this are subsampled.
    pub max_kde_rows: usize,
    pub suppress_warnings: bool,
}

impl Default for PepConfig {
    fn default() -> Self {
        Self {
            algorithm: PepAlgorithm::Qvality,
            seed: 1,
            max_kde_rows: 10_000,
            suppress_warnings: false,
        }
    }
}

/// Estimate one posterior error probability per entry.
///
/// Single-class inputs short-circuit to the documented policy: with no
/// decoys nothing can be called an error (all 0), with no targets everything
/// is (all 1).
pub fn posterior_errors(
    scores: &[f64],
    target: &[bool],
    config: &PepConfig,
) -> Result<Vec<f64>, Error> {
    assert_eq!(scores.len(), target.len());
    if scores.is_empty() {
        return Ok(Vec::new());
    }
    let decoys = target.iter().filter(|&&t| !t).count();
    if decoys == 0 {
        return Ok(vec![0.0; scores.len()]);
    }
    if decoys == target.len() {
        return Ok(vec![1.0; scores.len()]);
    }

    let peps = match config.algorithm {
        PepAlgorithm::KdeNnls => kde_nnls(scores, target, config),
        PepAlgorithm::HistNnls => hist_nnls(scores, target),
        PepAlgorithm::Qvality => match qvality::run(scores, target) {
            Ok(peps) => peps,
            Err(Error::QvalityNotFound(bin)) => {
                if !config.suppress_warnings {
                    log::warn!(
                        "`{}` not found on the search path, using the internal histogram estimator",
                        bin
                    );
                }
                hist_nnls(scores, target)
            }
            Err(e) => return Err(e),
        },
        PepAlgorithm::QvalityBin => qvality::run(scores, target)?,
    };

    Ok(enforce_monotone(scores, peps))
}

/// Running maximum from the best score downward, with clamping to [0, 1].
fn enforce_monotone(scores: &[f64], mut peps: Vec<f64>) -> Vec<f64> {
    let mut order = (0..peps.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut running = 0.0f64;
    for &ix in &order {
        running = running.max(peps[ix].clamp(0.0, 1.0));
        peps[ix] = running;
    }
    peps
}

fn kde_nnls(scores: &[f64], target: &[bool], config: &PepConfig) -> Vec<f64> {
    let estimator = if scores.len() > config.max_kde_rows {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut keep =
            rand::seq::index::sample(&mut rng, scores.len(), config.max_kde_rows).into_vec();
        keep.sort_unstable();
        let sub_scores = keep.iter().map(|&i| scores[i]).collect::<Vec<_>>();
        let sub_decoys = keep.iter().map(|&i| !target[i]).collect::<Vec<_>>();
        kde::Estimator::fit(&sub_scores, &sub_decoys)
    } else {
        let decoys = target.iter().map(|&t| !t).collect::<Vec<_>>();
        kde::Estimator::fit(scores, &decoys)
    };

    match estimator {
        Some(estimator) => scores
            .iter()
            .map(|&s| estimator.posterior_error(s))
            .collect(),
        None => {
            // Degenerate score distribution (or the subsample lost a class)
            log::debug!("- density estimate is degenerate, using the histogram estimator");
            hist_nnls(scores, target)
        }
    }
}

fn hist_nnls(scores: &[f64], target: &[bool]) -> Vec<f64> {
    let n = scores.len();
    let mut min_score = f64::MAX;
    let mut max_score = f64::MIN;
    for s in scores {
        min_score = min_score.min(*s);
        max_score = max_score.max(*s);
    }
    if !(max_score > min_score) {
        // One undifferentiated bin
        let decoys = target.iter().filter(|&&t| !t).count();
        return vec![decoys as f64 / n as f64; n];
    }

    let bins = ((n as f64).sqrt().ceil() as usize).clamp(10, 500);
    let width = (max_score - min_score) / bins as f64;
    let index = |score: f64| (((score - min_score) / width) as usize).min(bins - 1);

    let mut targets = vec![0u64; bins];
    let mut decoys = vec![0u64; bins];
    for (&score, &is_target) in scores.iter().zip(target) {
        match is_target {
            true => targets[index(score)] += 1,
            false => decoys[index(score)] += 1,
        }
    }

    // With equal-width bins the density ratio reduces to d / (d + t) per
    // bin. Empty bins carry no evidence and are skipped; the monotone fit
    // interpolates across them.
    let mut centers = Vec::new();
    let mut raw = Vec::new();
    let mut weights = Vec::new();
    for bin in 0..bins {
        let total = targets[bin] + decoys[bin];
        if total == 0 {
            continue;
        }
        centers.push(min_score + (bin as f64 + 0.5) * width);
        raw.push(decoys[bin] as f64 / total as f64);
        weights.push(total as f64);
    }
    let fit = isotonic::decreasing(&raw, &weights);

    scores
        .iter()
        .map(|&score| interp(&centers, &fit, score))
        .collect()
}

fn interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let hi = xs.partition_point(|&center| center < x);
    if hi == 0 {
        return ys[0];
    }
    if hi == xs.len() {
        return ys[ys.len() - 1];
    }
    let linear = (x - xs[hi - 1]) / (xs[hi] - xs[hi - 1]);
    ys[hi - 1] + (ys[hi] - ys[hi - 1]) * linear
}

#[cfg(test)]
mod test {
    use super::*;

    fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        let step = (hi - lo) / (n - 1) as f64;
        (0..n).map(|i| lo + i as f64 * step).collect()
    }

    fn separated_classes(n: usize) -> (Vec<f64>, Vec<bool>) {
        let mut scores = linspace(-3.0, 3.0, n);
        let mut target = vec![false; n];
        scores.extend(linspace(2.0, 8.0, n));
        target.extend(vec![true; n]);
        (scores, target)
    }

    #[test]
    fn single_class_policies() {
        let config = PepConfig::default();
        let all_targets = posterior_errors(&[1.0, 2.0], &[true, true], &config).unwrap();
        assert_eq!(all_targets, vec![0.0, 0.0]);
        let all_decoys = posterior_errors(&[1.0, 2.0], &[false, false], &config).unwrap();
        assert_eq!(all_decoys, vec![1.0, 1.0]);
        assert!(posterior_errors(&[], &[], &config).unwrap().is_empty());
    }

    #[test]
    fn histogram_separates_classes() {
        let (scores, target) = separated_classes(200);
        let config = PepConfig {
            algorithm: PepAlgorithm::HistNnls,
            ..Default::default()
        };
        let peps = posterior_errors(&scores, &target, &config).unwrap();
        // Worst decoy scores vs best target scores
        assert!(peps[0] > 0.9);
        assert!(*peps.last().unwrap() < 0.1);
    }

    #[test]
    fn peps_are_monotone_and_bounded() {
        let (scores, target) = separated_classes(150);
        for algorithm in [PepAlgorithm::HistNnls, PepAlgorithm::KdeNnls] {
            let config = PepConfig {
                algorithm,
                ..Default::default()
            };
            let peps = posterior_errors(&scores, &target, &config).unwrap();
            let mut order = (0..scores.len()).collect::<Vec<_>>();
            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            let mut last = 0.0;
            for &ix in &order {
                assert!((0.0..=1.0).contains(&peps[ix]));
                assert!(peps[ix] >= last);
                last = peps[ix];
            }
        }
    }

    #[test]
    fn subsampling_is_seeded() {
        let (scores, target) = separated_classes(400);
        let config = PepConfig {
            algorithm: PepAlgorithm::KdeNnls,
            seed: 42,
            max_kde_rows: 100,
            ..Default::default()
        };
        let first = posterior_errors(&scores, &target, &config).unwrap();
        let second = posterior_errors(&scores, &target, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_binary_is_a_configuration_error() {
        // Only meaningful on hosts without a qvality installation
        if std::process::Command::new("qvality")
            .arg("-h")
            .output()
            .is_ok()
        {
            return;
        }
        let (scores, target) = separated_classes(20);
        let strict = PepConfig {
            algorithm: PepAlgorithm::QvalityBin,
            ..Default::default()
        };
        assert!(matches!(
            posterior_errors(&scores, &target, &strict),
            Err(Error::QvalityNotFound(_))
        ));

        // The plain qvality mode falls back to the internal estimator
        let lenient = PepConfig {
            algorithm: PepAlgorithm::Qvality,
            suppress_warnings: true,
            ..Default::default()
        };
        assert!(posterior_errors(&scores, &target, &lenient).is_ok());
    }
}
