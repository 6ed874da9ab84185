//! Schema-resolved PSM tables.
//!
//! Input files are tab-delimited with a header row, in the Percolator PIN
//! family of formats: `specid`, `scannr` and/or `expmass`, `peptide`,
//! `proteins`, `label`, and any number of numeric feature columns. Column
//! names are case-insensitive and resolved exactly once, at load time, into a
//! fixed [`PsmSchema`] consumed by everything downstream.
//!
//! Labels are canonicalized to {+1 target, -1 decoy} on ingest: files written
//! with the {1, 0} convention are remapped so that 0 means decoy. Any other
//! label value is an input validation error.

use crate::fingerprint::{fingerprint, Field};
use crate::ml::qvalue;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Column-role mapping for one input file, resolved once from the header row.
#[derive(Clone, Debug)]
pub struct PsmSchema {
    pub headers: Vec<String>,
    pub specid: usize,
    pub label: usize,
    pub peptide: usize,
    pub proteins: usize,
    pub specfile: Option<usize>,
    pub scannr: Option<usize>,
    pub expmass: Option<usize>,
    pub calcmass: Option<usize>,
    pub charge: Option<usize>,
    pub score: Option<usize>,
    /// Everything not recognized as metadata.
    pub features: Vec<usize>,
}

impl PsmSchema {
    pub fn resolve(headers: &[String], path: &str) -> Result<Self, Error> {
        let mut specid = None;
        let mut label = None;
        let mut peptide = None;
        let mut proteins = None;
        let mut specfile = None;
        let mut scannr = None;
        let mut expmass = None;
        let mut calcmass = None;
        let mut charge = None;
        let mut score = None;
        let mut features = Vec::new();

        let schema_err = |message: &str| Error::Schema {
            path: path.to_string(),
            message: message.to_string(),
        };

        for (ix, header) in headers.iter().enumerate() {
            let role = header.trim().to_ascii_lowercase();
            let slot = match role.as_str() {
                "specid" | "psmid" | "psm_id" => &mut specid,
                "label" => {
                    if label.is_some() {
                        return Err(schema_err("more than one label column"));
                    }
                    &mut label
                }
                "peptide" => &mut peptide,
                "proteins" => {
                    if proteins.is_some() {
                        return Err(schema_err("more than one protein column"));
                    }
                    &mut proteins
                }
                "specfile" | "filename" => &mut specfile,
                "scannr" => &mut scannr,
                "expmass" => &mut expmass,
                "calcmass" => &mut calcmass,
                "charge" => &mut charge,
                "score" => &mut score,
                _ => {
                    features.push(ix);
                    continue;
                }
            };
            match slot {
                Some(_) => features.push(ix),
                None => *slot = Some(ix),
            }
        }

        let specid = specid.ok_or_else(|| schema_err("no specid column"))?;
        let label = label.ok_or_else(|| schema_err("no label column"))?;
        let peptide = peptide.ok_or_else(|| schema_err("no peptide column"))?;
        let proteins = proteins.ok_or_else(|| schema_err("no proteins column"))?;
        if scannr.is_none() && expmass.is_none() {
            return Err(schema_err("no scannr or expmass column"));
        }

        Ok(PsmSchema {
            headers: headers.to_vec(),
            specid,
            label,
            peptide,
            proteins,
            specfile,
            scannr,
            expmass,
            calcmass,
            charge,
            score,
            features,
        })
    }
}

/// One PSM with its identity metadata, score, and canonical label.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredRow {
    pub psm_id: String,
    /// Spectrum file column value, when the input carried one. Distinct from
    /// the container file the row was read out of.
    pub specfile: Option<String>,
    pub scannr: Option<i64>,
    pub expmass: Option<f64>,
    pub calcmass: Option<f64>,
    pub charge: Option<u8>,
    pub peptide: String,
    pub proteins: String,
    /// +1 target, -1 decoy.
    pub label: i32,
    pub score: f64,
    /// Stable tie-break hash over the spectrum identity fields.
    pub fingerprint: u32,
    /// Index into the caller's list of input files, for traceability.
    pub file_id: usize,
}

impl ScoredRow {
    /// Hash of the spectrum identity fields that are present, in the fixed
    /// order (specfile, scannr, expmass, calcmass).
    pub fn identity_fingerprint(&self) -> u32 {
        let mut fields: Vec<Field<'_>> = Vec::with_capacity(4);
        if let Some(ref specfile) = self.specfile {
            fields.push(Field::from(specfile.as_str()));
        }
        if let Some(scannr) = self.scannr {
            fields.push(Field::from(scannr));
        }
        if let Some(expmass) = self.expmass {
            fields.push(Field::from(expmass));
        }
        if let Some(calcmass) = self.calcmass {
            fields.push(Field::from(calcmass));
        }
        fingerprint(&fields)
    }

    fn from_record(
        record: &csv::StringRecord,
        schema: &PsmSchema,
        path: &str,
        line: u64,
        file_id: usize,
    ) -> Result<ScoredRow, Error> {
        let parse_err = |message: String| Error::Parse {
            path: path.to_string(),
            line,
            message,
        };
        let field = |ix: usize| record.get(ix).unwrap_or("").trim();
        let optional = |ix: Option<usize>| ix.map(&field).filter(|v| !v.is_empty());

        let label = parse_label(field(schema.label)).ok_or_else(|| {
            parse_err(format!(
                "label value `{}` is not one of 1, 0, -1",
                field(schema.label)
            ))
        })?;

        let scannr = match optional(schema.scannr) {
            Some(v) => Some(
                parse_int(v).ok_or_else(|| parse_err(format!("scannr `{}` is not an integer", v)))?,
            ),
            None => None,
        };
        let expmass = parse_optional_float(optional(schema.expmass), "expmass", &parse_err)?;
        let calcmass = parse_optional_float(optional(schema.calcmass), "calcmass", &parse_err)?;
        let charge = match optional(schema.charge) {
            Some(v) => Some(
                parse_int(v)
                    .filter(|&c| (1..=127).contains(&c))
                    .ok_or_else(|| parse_err(format!("charge `{}` is not a valid charge", v)))?
                    as u8,
            ),
            None => None,
        };
        let score = match schema.score.and_then(|ix| record.get(ix)) {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .map_err(|_| parse_err(format!("score `{}` is not numeric", v)))?,
            None => 0.0,
        };

        let mut row = ScoredRow {
            psm_id: field(schema.specid).to_string(),
            specfile: optional(schema.specfile).map(str::to_string),
            scannr,
            expmass,
            calcmass,
            charge,
            peptide: field(schema.peptide).to_string(),
            proteins: field(schema.proteins).to_string(),
            label,
            score,
            fingerprint: 0,
            file_id,
        };
        row.fingerprint = row.identity_fingerprint();
        Ok(row)
    }
}

fn parse_optional_float(
    value: Option<&str>,
    name: &str,
    parse_err: &dyn Fn(String) -> Error,
) -> Result<Option<f64>, Error> {
    match value {
        Some(v) => v
            .parse::<f64>()
            .map(Some)
            .map_err(|_| parse_err(format!("{} `{}` is not numeric", name, v))),
        None => Ok(None),
    }
}

fn parse_int(value: &str) -> Option<i64> {
    if let Ok(x) = value.parse::<i64>() {
        return Some(x);
    }
    // Some engines write integer columns in float notation
    match value.parse::<f64>() {
        Ok(x) if x.fract() == 0.0 && x.is_finite() => Some(x as i64),
        _ => None,
    }
}

fn parse_label(value: &str) -> Option<i32> {
    match parse_int(value)? {
        1 => Some(1),
        0 | -1 => Some(-1),
        _ => None,
    }
}

/// Streaming reader over one scored result file.
///
/// Yields rows one at a time so that the out-of-core selector never has to
/// materialize a whole file.
pub struct ScoredReader {
    reader: csv::Reader<std::fs::File>,
    record: csv::StringRecord,
    pub schema: PsmSchema,
    path: String,
    file_id: usize,
}

impl ScoredReader {
    pub fn open<P: AsRef<Path>>(path: P, file_id: usize) -> Result<Self, Error> {
        let display = path.as_ref().display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path.as_ref())?;
        let headers = reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let schema = PsmSchema::resolve(&headers, &display)?;
        if schema.score.is_none() {
            return Err(Error::Schema {
                path: display,
                message: "no score column; rollup input must already be scored".to_string(),
            });
        }
        Ok(ScoredReader {
            reader,
            record: csv::StringRecord::new(),
            schema,
            path: display,
            file_id,
        })
    }
}

impl Iterator for ScoredReader {
    type Item = Result<ScoredRow, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Err(e) => Some(Err(e.into())),
            Ok(false) => None,
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                Some(ScoredRow::from_record(
                    &self.record,
                    &self.schema,
                    &self.path,
                    line,
                    self.file_id,
                ))
            }
        }
    }
}

/// Read a whole scored result file into memory.
pub fn read_scored<P: AsRef<Path>>(path: P, file_id: usize) -> Result<Vec<ScoredRow>, Error> {
    ScoredReader::open(path, file_id)?.collect()
}

/// An in-memory PSM table with its numeric feature matrix.
///
/// Feature columns go through an explicit type-inference pass: a column where
/// every non-empty value parses as a number becomes a numeric feature (empty
/// cells become NaN); anything else is left as text and excluded from the
/// matrix, with the column names recorded in `text_columns`.
pub struct PsmDataset {
    pub schema: PsmSchema,
    pub rows: Vec<ScoredRow>,
    pub feature_names: Vec<String>,
    /// Column-major, aligned with `feature_names`.
    pub features: Vec<Vec<f64>>,
    pub text_columns: Vec<String>,
}

impl PsmDataset {
    pub fn read_pin<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let display = path.as_ref().display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path.as_ref())?;
        let headers = reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let schema = PsmSchema::resolve(&headers, &display)?;

        let mut rows = Vec::new();
        let mut raw_features: Vec<Vec<String>> = vec![Vec::new(); schema.features.len()];
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            rows.push(ScoredRow::from_record(&record, &schema, &display, line, 0)?);
            for (slot, &ix) in raw_features.iter_mut().zip(&schema.features) {
                slot.push(record.get(ix).unwrap_or("").trim().to_string());
            }
        }

        let mut feature_names = Vec::new();
        let mut features = Vec::new();
        let mut text_columns = Vec::new();
        for (raw, &ix) in raw_features.iter().zip(&schema.features) {
            match infer_numeric(raw) {
                Some(column) => {
                    feature_names.push(schema.headers[ix].clone());
                    features.push(column);
                }
                None => {
                    log::debug!(
                        "- column `{}` in {} is not numeric, keeping as text",
                        schema.headers[ix],
                        display
                    );
                    text_columns.push(schema.headers[ix].clone());
                }
            }
        }

        Ok(PsmDataset {
            schema,
            rows,
            feature_names,
            features,
            text_columns,
        })
    }

    pub fn labels(&self) -> Vec<i32> {
        self.rows.iter().map(|row| row.label).collect()
    }

    pub fn targets(&self) -> Vec<bool> {
        self.rows.iter().map(|row| row.label == 1).collect()
    }

    pub fn fingerprints(&self) -> Vec<u32> {
        self.rows.iter().map(|row| row.fingerprint).collect()
    }

    /// Re-derive tri-state labels from a score vector at the given FDR
    /// threshold. See [`update_labels`].
    pub fn update_labels(&self, scores: &[f64], eval_fdr: f64) -> Vec<i32> {
        let labels = self.labels();
        update_labels(scores, &labels, eval_fdr)
    }
}

fn infer_numeric(raw: &[String]) -> Option<Vec<f64>> {
    let mut column = Vec::with_capacity(raw.len());
    for value in raw {
        if value.is_empty() {
            column.push(f64::NAN);
        } else {
            column.push(value.parse::<f64>().ok()?);
        }
    }
    Some(column)
}

/// Assign tri-state labels {1, 0, -1} from scores at an evaluation FDR.
///
/// Targets whose TDC q-value is at or under `eval_fdr` keep label 1, targets
/// over it become 0, and decoys are always -1. The result is in the original
/// row order.
pub fn update_labels(scores: &[f64], labels: &[i32], eval_fdr: f64) -> Vec<i32> {
    assert_eq!(scores.len(), labels.len());
    let qvals = qvalue::tdc_labels(scores, labels);
    labels
        .iter()
        .zip(&qvals)
        .map(|(&label, &q)| match label {
            1 if q <= eval_fdr => 1,
            1 => 0,
            _ => -1,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn schema_resolution() {
        let schema = PsmSchema::resolve(
            &headers(&[
                "SpecId", "Label", "ScanNr", "ExpMass", "CalcMass", "feat_a", "feat_b", "Peptide",
                "Proteins",
            ]),
            "test.pin",
        )
        .unwrap();
        assert_eq!(schema.specid, 0);
        assert_eq!(schema.label, 1);
        assert_eq!(schema.scannr, Some(2));
        assert_eq!(schema.expmass, Some(3));
        assert_eq!(schema.calcmass, Some(4));
        assert_eq!(schema.peptide, 7);
        assert_eq!(schema.proteins, 8);
        assert_eq!(schema.features, vec![5, 6]);
        assert!(schema.score.is_none());
    }

    #[test]
    fn schema_errors() {
        let missing = PsmSchema::resolve(
            &headers(&["SpecId", "ScanNr", "Peptide", "Proteins"]),
            "test.pin",
        );
        assert!(matches!(missing, Err(Error::Schema { .. })));

        let duplicated = PsmSchema::resolve(
            &headers(&["SpecId", "Label", "label", "ScanNr", "Peptide", "Proteins"]),
            "test.pin",
        );
        assert!(matches!(duplicated, Err(Error::Schema { .. })));

        let no_spectrum = PsmSchema::resolve(
            &headers(&["SpecId", "Label", "Peptide", "Proteins"]),
            "test.pin",
        );
        assert!(matches!(no_spectrum, Err(Error::Schema { .. })));
    }

    #[test]
    fn row_fingerprint_matches_worked_value() {
        let row = ScoredRow {
            psm_id: "target_0_870_2_-1".to_string(),
            specfile: Some("test.mzML".to_string()),
            scannr: Some(870),
            expmass: Some(5902.639978936955),
            calcmass: Some(890.522815122875),
            charge: None,
            peptide: "K.AAAPEPTIDEK.L".to_string(),
            proteins: "sp|P12345".to_string(),
            label: 1,
            score: 0.0,
            fingerprint: 0,
            file_id: 0,
        };
        assert_eq!(row.identity_fingerprint(), 4196757312);
    }

    #[test]
    fn update_labels_worked_example() {
        let scores = [6.0, 5.0, 3.0, 3.0, 2.0, 1.0];
        let labels = [1, 1, 1, -1, -1, -1];
        assert_eq!(update_labels(&scores, &labels, 0.5), vec![1, 1, 0, -1, -1, -1]);
    }

    #[test]
    fn zero_one_labels_are_remapped() {
        assert_eq!(parse_label("1"), Some(1));
        assert_eq!(parse_label("0"), Some(-1));
        assert_eq!(parse_label("-1"), Some(-1));
        assert_eq!(parse_label("2"), None);
        assert_eq!(parse_label("x"), None);
    }

    #[test]
    fn read_scored_round_trip() {
        let path = std::env::temp_dir().join(format!("rollup-dataset-{}.tsv", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "SpecId\tLabel\tScanNr\tExpMass\tScore\tfeat\tPeptide\tProteins"
        )
        .unwrap();
        writeln!(file, "t1\t1\t101\t500.5\t2.5\t0.1\tK.PEPTIDE.R\tsp|A").unwrap();
        writeln!(file, "d1\t-1\t102\t501.5\t-1.5\t0.2\tK.EDITPEP.R\tdecoy_sp|A").unwrap();
        drop(file);

        let rows = read_scored(&path, 3).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].psm_id, "t1");
        assert_eq!(rows[0].scannr, Some(101));
        assert_eq!(rows[0].score, 2.5);
        assert_eq!(rows[0].label, 1);
        assert_eq!(rows[0].file_id, 3);
        assert_eq!(rows[1].label, -1);
        assert_ne!(rows[0].fingerprint, rows[1].fingerprint);
    }

    #[test]
    fn type_inference_leaves_text_columns() {
        let path = std::env::temp_dir().join(format!("rollup-infer-{}.tsv", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "SpecId\tLabel\tScanNr\tnum\tannotation\tPeptide\tProteins"
        )
        .unwrap();
        writeln!(file, "t1\t1\t1\t0.5\thigh\tK.AAA.R\tsp|A").unwrap();
        writeln!(file, "t2\t1\t2\t\tlow\tK.CCC.R\tsp|B").unwrap();
        drop(file);

        let dataset = PsmDataset::read_pin(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(dataset.feature_names, vec!["num".to_string()]);
        assert_eq!(dataset.text_columns, vec!["annotation".to_string()]);
        assert_eq!(dataset.features.len(), 1);
        assert_eq!(dataset.features[0][0], 0.5);
        assert!(dataset.features[0][1].is_nan());
    }
}
