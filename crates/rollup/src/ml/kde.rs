//! Posterior error probabilities from kernel density estimates.
//!
//! A non-parametric model of the target and decoy score distributions is fit
//! with Gaussian KDE, the decoy/total density ratio is evaluated on a fixed
//! grid, regularized into a monotone curve, and per-entry values are read off
//! by linear interpolation.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use super::isotonic;
use rayon::prelude::*;

pub struct Kde<'a> {
    sample: &'a [f64],
    pub bandwidth: f64,
    constant: f64,
}

impl<'a> Kde<'a> {
    /// Silverman's rule-of-thumb bandwidth, scaled by `bw_adjust`.
    pub fn new(sample: &'a [f64], bw_adjust: f64) -> Self {
        let factor = 4. / 3.;
        let exponent = 1. / 5.;
        let sigma = super::std(sample);
        let bandwidth = bw_adjust * sigma * (factor / sample.len() as f64).powf(exponent);
        let constant = (2.0 * std::f64::consts::PI).sqrt() * bandwidth * sample.len() as f64;
        Self {
            sample,
            bandwidth,
            constant,
        }
    }

    fn kernel(&self, x: f64) -> f64 {
        (-0.5 * x.powi(2)).exp()
    }

    pub fn pdf(&self, x: f64) -> f64 {
        let h = self.bandwidth;

        let sum = self
            .sample
            .par_iter()
            .fold(|| 0.0, |acc, xi| acc + self.kernel((x - xi) / h))
            .sum::<f64>();

        sum / self.constant
    }
}

pub struct Builder {
    bins: usize,
    bw_adjust: f64,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            bins: 1000,
            bw_adjust: 1.0,
        }
    }
}

impl Builder {
    pub fn bw_adjust(mut self, bw_adjust: f64) -> Self {
        self.bw_adjust = bw_adjust;
        self
    }

    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    /// Fit the binned PEP curve. Returns `None` when either class is empty
    /// or the score distribution is degenerate, in which case no density
    /// ratio is defined and the caller must fall back to an edge-case
    /// policy.
    pub fn build(self, scores: &[f64], decoys: &[bool]) -> Option<Estimator> {
        let d = scores
            .par_iter()
            .zip(decoys)
            .filter(|&(_, d)| *d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        let t = scores
            .par_iter()
            .zip(decoys)
            .filter(|&(_, d)| !*d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        if d.is_empty() || t.is_empty() {
            return None;
        }

        // P(decoy)
        let pi = d.len() as f64 / scores.len() as f64;
        let decoy = Kde::new(&d, self.bw_adjust);
        let target = Kde::new(&t, self.bw_adjust);
        if !(decoy.bandwidth > 0.0) || !(target.bandwidth > 0.0) {
            return None;
        }

        let mut min_score = f64::MAX;
        let mut max_score = f64::MIN;
        for s in scores {
            min_score = min_score.min(*s);
            max_score = max_score.max(*s);
        }
        if !(max_score > min_score) {
            return None;
        }
        let score_step = (max_score - min_score) / (self.bins - 1) as f64;

        // Raw decoy/total ratio on an evenly spaced grid, weighted by the
        // mixture density so that sparsely populated tails cannot dominate
        // the monotone fit
        let mut raw = Vec::with_capacity(self.bins);
        let mut weights = Vec::with_capacity(self.bins);
        for bin in 0..self.bins {
            let score = (bin as f64 * score_step) + min_score;
            let decoy = decoy.pdf(score) * pi;
            let target = target.pdf(score) * (1.0 - pi);
            let total = decoy + target;
            raw.push(if total > 0.0 { decoy / total } else { 0.5 });
            weights.push(total + 1e-300);
        }

        // PEP must not increase with score
        let bins = isotonic::decreasing(&raw, &weights);

        Some(Estimator {
            bins,
            min_score,
            score_step,
        })
    }
}

pub struct Estimator {
    bins: Vec<f64>,
    min_score: f64,
    score_step: f64,
}

impl Estimator {
    pub fn fit(scores: &[f64], decoys: &[bool]) -> Option<Estimator> {
        Builder::default().build(scores, decoys)
    }

    /// Calculate the posterior error probability for a given score, under the
    /// pre-fit non-parametric probability model.
    pub fn posterior_error(&self, score: f64) -> f64 {
        let bin_lo = self
            .bins
            .len()
            .saturating_sub(1)
            .min(((score - self.min_score) / self.score_step).max(0.0).floor() as usize);
        let bin_hi = self.bins.len().saturating_sub(1).min(bin_lo + 1);

        // PEP of lower & one higher bin
        let lower = self.bins[bin_lo];
        let upper = self.bins[bin_hi];

        // Calculate the score corresponding to the lower bin
        let bin_lo_score = bin_lo as f64 * self.score_step + self.min_score;
        // What percent of the way to the higher bin are we?
        let linear = ((score - bin_lo_score) / self.score_step).clamp(0.0, 1.0);

        // Linear interpolation between lower and upper bin
        let delta = upper - lower;
        (lower + (delta * linear)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        let step = (hi - lo) / (n - 1) as f64;
        (0..n).map(|i| lo + i as f64 * step).collect()
    }

    fn separated_classes() -> (Vec<f64>, Vec<bool>) {
        let mut scores = linspace(-3.0, 3.0, 200);
        let mut decoys = vec![true; 200];
        scores.extend(linspace(2.0, 8.0, 200));
        decoys.extend(vec![false; 200]);
        (scores, decoys)
    }

    #[test]
    fn separated_distributions() {
        let (scores, decoys) = separated_classes();
        let estimator = Estimator::fit(&scores, &decoys).unwrap();
        assert!(estimator.posterior_error(-2.0) > 0.9);
        assert!(estimator.posterior_error(7.0) < 0.1);
    }

    #[test]
    fn monotone_in_score() {
        let (scores, decoys) = separated_classes();
        let estimator = Estimator::fit(&scores, &decoys).unwrap();
        let probe = linspace(-4.0, 9.0, 100);
        for pair in probe.windows(2) {
            assert!(
                estimator.posterior_error(pair[0]) >= estimator.posterior_error(pair[1]) - 1e-12
            );
        }
    }

    #[test]
    fn degenerate_inputs() {
        assert!(Estimator::fit(&[1.0, 2.0], &[false, false]).is_none());
        assert!(Estimator::fit(&[1.0, 1.0], &[true, false]).is_none());
    }
}
