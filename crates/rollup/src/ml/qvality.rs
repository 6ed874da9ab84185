//! Delegation to the external `qvality` binary from the Percolator suite.
//!
//! Target and decoy scores are written to scratch files, the binary is run,
//! and its Score/PEP/q-value table is read back from stdout. Input scores are
//! then mapped onto the table by linear interpolation, since qvality reports
//! one row per unique score rather than one per input entry.

use crate::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

const BINARY: &str = "qvality";

// Distinguishes concurrent invocations within one process
static SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

/// Probe for the binary up front, so that a run which explicitly requires it
/// fails before any computation instead of at the first estimation call.
pub fn require() -> Result<(), Error> {
    match Command::new(BINARY).arg("-h").output() {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::QvalityNotFound(BINARY.to_string()))
        }
        _ => Ok(()),
    }
}

pub fn run(scores: &[f64], target: &[bool]) -> Result<Vec<f64>, Error> {
    assert_eq!(scores.len(), target.len());

    let stamp = SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
    let scratch = std::env::temp_dir();
    let target_path = scratch.join(format!(
        "rollup-qvality-{}-{}.target",
        std::process::id(),
        stamp
    ));
    let decoy_path = scratch.join(format!(
        "rollup-qvality-{}-{}.decoy",
        std::process::id(),
        stamp
    ));

    let result = run_inner(scores, target, &target_path, &decoy_path);
    let _ = std::fs::remove_file(&target_path);
    let _ = std::fs::remove_file(&decoy_path);
    result
}

fn run_inner(
    scores: &[f64],
    target: &[bool],
    target_path: &PathBuf,
    decoy_path: &PathBuf,
) -> Result<Vec<f64>, Error> {
    write_scores(target_path, scores, target, true)?;
    write_scores(decoy_path, scores, target, false)?;

    let output = Command::new(BINARY)
        .arg(target_path)
        .arg(decoy_path)
        .output();
    let output = match output {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::QvalityNotFound(BINARY.to_string()))
        }
        Err(e) => return Err(e.into()),
        Ok(output) => output,
    };

    if !output.status.success() {
        return Err(Error::Qvality(format!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let table = parse_table(&String::from_utf8_lossy(&output.stdout));
    if table.is_empty() {
        return Err(Error::Qvality(
            "no parseable rows in qvality output".to_string(),
        ));
    }

    Ok(scores
        .iter()
        .map(|&score| interpolate(&table, score).clamp(0.0, 1.0))
        .collect())
}

fn write_scores(
    path: &PathBuf,
    scores: &[f64],
    target: &[bool],
    keep_targets: bool,
) -> Result<(), Error> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for (score, &is_target) in scores.iter().zip(target) {
        if is_target == keep_targets {
            writeln!(file, "{}", score)?;
        }
    }
    Ok(())
}

/// Parse qvality's stdout: a header line followed by
/// score / PEP / q-value triples. Returns (score, pep) sorted by score.
fn parse_table(stdout: &str) -> Vec<(f64, f64)> {
    let mut table = Vec::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let score = fields.next().and_then(|f| f.parse::<f64>().ok());
        let pep = fields.next().and_then(|f| f.parse::<f64>().ok());
        if let (Some(score), Some(pep)) = (score, pep) {
            table.push((score, pep));
        }
    }
    table.sort_by(|a, b| a.0.total_cmp(&b.0));
    table
}

fn interpolate(table: &[(f64, f64)], score: f64) -> f64 {
    let hi = table.partition_point(|&(s, _)| s < score);
    if hi == 0 {
        return table[0].1;
    }
    if hi == table.len() {
        return table[table.len() - 1].1;
    }
    let (lo_score, lo_pep) = table[hi - 1];
    let (hi_score, hi_pep) = table[hi];
    if hi_score == lo_score {
        return lo_pep;
    }
    let linear = (score - lo_score) / (hi_score - lo_score);
    lo_pep + (hi_pep - lo_pep) * linear
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_parsing_skips_headers() {
        let stdout = "Score\tPEP\tq-value\n3.0\t0.01\t0.001\n1.0\t0.5\t0.1\n";
        let table = parse_table(stdout);
        assert_eq!(table, vec![(1.0, 0.5), (3.0, 0.01)]);
    }

    #[test]
    fn interpolation_within_and_outside_the_table() {
        let table = vec![(1.0, 0.5), (3.0, 0.1)];
        assert_eq!(interpolate(&table, 0.0), 0.5);
        assert_eq!(interpolate(&table, 4.0), 0.1);
        assert!((interpolate(&table, 2.0) - 0.3).abs() < 1e-12);
    }
}
