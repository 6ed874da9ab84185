//! Weighted isotonic regression via pool-adjacent-violators.
//!
//! Used to regularize raw PEP curves into monotone ones: the least-squares
//! monotone fit under non-negativity is exactly what the pooled weighted
//! means produce.

/// Fit the best monotone non-decreasing sequence to `values` under the given
/// positive weights.
pub fn increasing(values: &[f64], weights: &[f64]) -> Vec<f64> {
    assert_eq!(values.len(), weights.len());

    #[derive(Clone, Copy)]
    struct Block {
        sum: f64,
        weight: f64,
        len: usize,
    }

    let mut blocks: Vec<Block> = Vec::with_capacity(values.len());
    for (&value, &weight) in values.iter().zip(weights) {
        let mut block = Block {
            sum: value * weight,
            weight,
            len: 1,
        };
        while let Some(prev) = blocks.last() {
            // Violation when the previous block mean exceeds this one.
            // Compare cross-multiplied to avoid the divisions.
            if prev.sum * block.weight <= block.sum * prev.weight {
                break;
            }
            block.sum += prev.sum;
            block.weight += prev.weight;
            block.len += prev.len;
            blocks.pop();
        }
        blocks.push(block);
    }

    let mut out = Vec::with_capacity(values.len());
    for block in blocks {
        let mean = block.sum / block.weight;
        out.extend(std::iter::repeat(mean).take(block.len));
    }
    out
}

/// Fit the best monotone non-increasing sequence.
pub fn decreasing(values: &[f64], weights: &[f64]) -> Vec<f64> {
    let negated = values.iter().map(|v| -v).collect::<Vec<_>>();
    increasing(&negated, weights)
        .into_iter()
        .map(|v| -v)
        .collect()
}
