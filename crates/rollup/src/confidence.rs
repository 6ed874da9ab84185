//! Confidence assembly: winners in, q-values and PEPs out.
//!
//! Rows are put into the stable output order (score descending, fingerprint
//! ascending), PEPs are estimated with the configured algorithm, and
//! q-values with the configured estimator. Because the rows are sorted
//! first, the returned records are already in the order they get written.

use crate::dataset::ScoredRow;
use crate::ml::pep::{self, PepConfig};
use crate::ml::qvalue::{self, QvalueAlgorithm};
use crate::Error;

#[derive(Clone, Debug)]
pub struct ConfidenceConfig {
    pub qvalue: QvalueAlgorithm,
    pub pep: PepConfig,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            qvalue: QvalueAlgorithm::Tdc,
            pep: PepConfig::default(),
        }
    }
}

/// One confidence-annotated winner.
#[derive(Clone, Debug)]
pub struct Assigned {
    pub row: ScoredRow,
    pub q_value: f64,
    pub posterior_error: f64,
}

impl Assigned {
    pub fn is_target(&self) -> bool {
        self.row.label == 1
    }
}

/// Annotate winners with q-values and posterior error probabilities.
pub fn assign(
    mut winners: Vec<ScoredRow>,
    config: &ConfidenceConfig,
) -> Result<Vec<Assigned>, Error> {
    winners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.fingerprint.cmp(&b.fingerprint))
            .then_with(|| a.psm_id.cmp(&b.psm_id))
    });

    let scores = winners.iter().map(|row| row.score).collect::<Vec<_>>();
    let target = winners.iter().map(|row| row.label == 1).collect::<Vec<_>>();

    let peps = pep::posterior_errors(&scores, &target, &config.pep)?;
    let qvals = match config.qvalue {
        QvalueAlgorithm::Tdc => qvalue::tdc(&scores, &target),
        QvalueAlgorithm::FromCounts => qvalue::from_counts(&scores, &target),
        QvalueAlgorithm::FromPeps => qvalue::from_peps(&scores, &peps),
    };

    Ok(winners
        .into_iter()
        .zip(qvals)
        .zip(peps)
        .map(|((row, q_value), posterior_error)| Assigned {
            row,
            q_value,
            posterior_error,
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ml::pep::PepAlgorithm;

    fn row(psm_id: &str, scannr: i64, label: i32, score: f64) -> ScoredRow {
        let mut row = ScoredRow {
            psm_id: psm_id.to_string(),
            specfile: Some("run.mzML".to_string()),
            scannr: Some(scannr),
            expmass: Some(500.0 + scannr as f64),
            calcmass: None,
            charge: Some(2),
            peptide: "K.PEPTIDE.R".to_string(),
            proteins: "sp|P1".to_string(),
            label,
            score,
            fingerprint: 0,
            file_id: 0,
        };
        row.fingerprint = row.identity_fingerprint();
        row
    }

    fn config() -> ConfidenceConfig {
        ConfidenceConfig {
            qvalue: QvalueAlgorithm::Tdc,
            pep: PepConfig {
                algorithm: PepAlgorithm::HistNnls,
                ..Default::default()
            },
        }
    }

    #[test]
    fn records_come_back_in_output_order() {
        let winners = vec![
            row("low", 1, 1, 1.0),
            row("high", 2, 1, 9.0),
            row("mid", 3, -1, 4.0),
        ];
        let assigned = assign(winners, &config()).unwrap();
        assert_eq!(assigned[0].row.psm_id, "high");
        assert_eq!(assigned[1].row.psm_id, "mid");
        assert_eq!(assigned[2].row.psm_id, "low");
        for pair in assigned.windows(2) {
            assert!(pair[0].q_value <= pair[1].q_value);
            assert!(pair[0].posterior_error <= pair[1].posterior_error);
        }
    }

    #[test]
    fn worked_example_q_values() {
        let labels = [1, 1, 1, -1, -1, -1];
        let scores = [6.0, 5.0, 3.0, 3.0, 2.0, 1.0];
        let winners = labels
            .iter()
            .zip(&scores)
            .enumerate()
            .map(|(i, (&label, &score))| row(&format!("p{}", i), i as i64, label, score))
            .collect::<Vec<_>>();
        let assigned = assign(winners, &config()).unwrap();
        let expected = [0.5, 0.5, 2.0 / 3.0, 2.0 / 3.0, 1.0, 1.0];
        for (record, want) in assigned.iter().zip(&expected) {
            assert!((record.q_value - want).abs() < 1e-12);
        }
    }

    #[test]
    fn no_targets_yields_no_target_records() {
        let winners = vec![row("d1", 1, -1, 2.0), row("d2", 2, -1, 1.0)];
        let assigned = assign(winners, &config()).unwrap();
        assert!(assigned.iter().all(|r| !r.is_target()));
        assert!(assigned.iter().all(|r| r.q_value == 1.0));
    }
}
