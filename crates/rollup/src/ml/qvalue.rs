//! Q-value estimation by target-decoy competition.
//!
//! Käll et al., https://pubmed.ncbi.nlm.nih.gov/18052118/
//!
//! All estimators share the same contract: scores and a parallel target mask
//! go in, q-values come out in the *original* row order. Sorting happens on
//! an index permutation internally, so callers never have to pre-sort.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QvalueAlgorithm {
    /// Target-decoy competition with the add-one correction. The default.
    Tdc,
    /// Derived from posterior error probabilities.
    FromPeps,
    /// Purely count-based, no correction term.
    FromCounts,
}

impl std::str::FromStr for QvalueAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tdc" => Ok(Self::Tdc),
            "from_peps" => Ok(Self::FromPeps),
            "from_counts" => Ok(Self::FromCounts),
            _ => Err(format!("`{}` is not a q-value algorithm", s)),
        }
    }
}

impl std::fmt::Display for QvalueAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tdc => f.write_str("tdc"),
            Self::FromPeps => f.write_str("from_peps"),
            Self::FromCounts => f.write_str("from_counts"),
        }
    }
}

/// Estimate q-values by target-decoy competition.
///
/// Scanning in descending-score order, the local FDR estimate at each
/// position is `(decoys + 1) / max(targets, 1)`. Positions sharing a score
/// share the estimate at the end of their tie group, and the q-value is the
/// running minimum from the worst score upward, capped at 1.
pub fn tdc(scores: &[f64], target: &[bool]) -> Vec<f64> {
    competition_qvalues(scores, target, |nt, nd| (nd + 1) as f64 / nt.max(1) as f64)
}

/// Tri-state variant of [`tdc`]: entries labeled 0 ("neither") are excluded
/// from the running counts but keep their position, so the output stays
/// aligned with the input.
pub fn tdc_labels(scores: &[f64], labels: &[i32]) -> Vec<f64> {
    assert_eq!(scores.len(), labels.len());
    let n = scores.len();
    if n == 0 {
        return Vec::new();
    }
    let order = descending(scores);

    let mut nt = 0u64;
    let mut nd = 0u64;
    let mut fdr = Vec::with_capacity(n);
    for &ix in &order {
        match labels[ix] {
            1 => nt += 1,
            -1 => nd += 1,
            _ => {}
        }
        fdr.push((nd + 1) as f64 / nt.max(1) as f64);
    }

    let q = fdr_to_qvalues(&fdr, &order, scores);
    restore(&q, &order)
}

/// Count-based variant without the add-one correction: `decoys / targets`.
///
/// With no decoys above a score threshold this reports 0, where [`tdc`]
/// stays conservative.
pub fn from_counts(scores: &[f64], target: &[bool]) -> Vec<f64> {
    competition_qvalues(scores, target, |nt, nd| nd as f64 / nt.max(1) as f64)
}

/// Derive q-values from posterior error probabilities.
///
/// The FDR among everything at or above a score is estimated as the mean PEP
/// of those entries, then made monotone exactly like the competition
/// estimators.
pub fn from_peps(scores: &[f64], peps: &[f64]) -> Vec<f64> {
    assert_eq!(scores.len(), peps.len());
    let n = scores.len();
    if n == 0 {
        return Vec::new();
    }
    let order = descending(scores);
    let mut sum = 0.0;
    let mut fdr = Vec::with_capacity(n);
    for (count, &ix) in order.iter().enumerate() {
        sum += peps[ix];
        fdr.push(sum / (count + 1) as f64);
    }
    let q = fdr_to_qvalues(&fdr, &order, scores);
    restore(&q, &order)
}

fn competition_qvalues(
    scores: &[f64],
    target: &[bool],
    local_fdr: impl Fn(u64, u64) -> f64,
) -> Vec<f64> {
    assert_eq!(scores.len(), target.len());
    let n = scores.len();
    if n == 0 {
        return Vec::new();
    }
    let order = descending(scores);

    let mut nt = 0u64;
    let mut nd = 0u64;
    let mut fdr = Vec::with_capacity(n);
    for &ix in &order {
        match target[ix] {
            true => nt += 1,
            false => nd += 1,
        }
        fdr.push(local_fdr(nt, nd));
    }

    let q = fdr_to_qvalues(&fdr, &order, scores);
    restore(&q, &order)
}

fn descending(scores: &[f64]) -> Vec<usize> {
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// Convert positional FDR estimates into monotone q-values.
///
/// Entries tied on score form one group and share the FDR at the end of the
/// group; the q-value is then the cumulative minimum scanned from the worst
/// score toward the best, starting at 1.
fn fdr_to_qvalues(fdr: &[f64], order: &[usize], scores: &[f64]) -> Vec<f64> {
    let n = fdr.len();
    let mut q = vec![1.0; n];
    let mut q_min = 1.0f64;
    let mut hi = n;
    while hi > 0 {
        let mut lo = hi - 1;
        while lo > 0 && scores[order[lo - 1]] == scores[order[hi - 1]] {
            lo -= 1;
        }
        q_min = q_min.min(fdr[hi - 1]);
        for slot in q.iter_mut().take(hi).skip(lo) {
            *slot = q_min;
        }
        hi = lo;
    }
    q
}

fn restore(sorted: &[f64], order: &[usize]) -> Vec<f64> {
    let mut out = vec![0.0; sorted.len()];
    for (pos, &ix) in order.iter().enumerate() {
        out[ix] = sorted[pos];
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn worked_example() {
        let scores = [6.0, 5.0, 3.0, 3.0, 2.0, 1.0];
        let target = [true, true, true, false, false, false];
        let q = tdc(&scores, &target);
        let expected = [0.5, 0.5, 2.0 / 3.0, 2.0 / 3.0, 1.0, 1.0];
        for (a, b) in q.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12, "{:?} vs {:?}", q, expected);
        }
    }

    #[test]
    fn monotone_in_descending_score_order() {
        let scores = [9.0, 8.5, 7.0, 7.0, 6.5, 5.0, 4.0, 3.5, 2.0, 1.0];
        let target = [
            true, true, false, true, true, false, true, false, true, false,
        ];
        let q = tdc(&scores, &target);
        let mut order = (0..scores.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        for pair in order.windows(2) {
            assert!(q[pair[0]] <= q[pair[1]]);
        }
    }

    #[test]
    fn input_order_does_not_matter() {
        let scores = [1.0, 5.0, 3.0, 3.0, 2.0, 6.0];
        let target = [false, true, true, false, false, true];
        let q = tdc(&scores, &target);
        // Same data as the worked example, permuted
        assert!((q[5] - 0.5).abs() < 1e-12);
        assert!((q[1] - 0.5).abs() < 1e-12);
        assert!((q[2] - 2.0 / 3.0).abs() < 1e-12);
        assert!((q[3] - 2.0 / 3.0).abs() < 1e-12);
        assert!((q[4] - 1.0).abs() < 1e-12);
        assert!((q[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_decoys() {
        let scores = [4.0, 3.0, 2.0, 1.0];
        let target = [true; 4];
        let q = tdc(&scores, &target);
        // (0 + 1) / 4 at the worst position, propagated up by the running min
        assert!(q.iter().all(|&x| (x - 0.25).abs() < 1e-12));
        let counts = from_counts(&scores, &target);
        assert!(counts.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn zero_targets() {
        let scores = [4.0, 3.0];
        let target = [false, false];
        let q = tdc(&scores, &target);
        assert!(q.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn empty_input() {
        assert!(tdc(&[], &[]).is_empty());
        assert!(from_peps(&[], &[]).is_empty());
    }

    #[test]
    fn excluded_labels_do_not_count() {
        let scores = [6.0, 5.0, 4.0, 3.0];
        let q = tdc_labels(&scores, &[1, 0, 1, -1]);
        let expected = [0.5, 0.5, 0.5, 1.0];
        for (a, b) in q.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12, "{:?} vs {:?}", q, expected);
        }
        // With the excluded entry counted as either class the answer differs
        let as_target = tdc_labels(&scores, &[1, 1, 1, -1]);
        assert!((as_target[2] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn from_peps_is_running_mean() {
        let scores = [3.0, 2.0, 1.0];
        let peps = [0.0, 0.3, 0.9];
        let q = from_peps(&scores, &peps);
        assert!((q[0] - 0.0).abs() < 1e-12);
        assert!((q[1] - 0.15).abs() < 1e-12);
        assert!((q[2] - 0.4).abs() < 1e-12);
    }
}
