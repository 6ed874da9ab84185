//! Best-entry competition at each aggregation level.
//!
//! Rows are grouped by a level-specific identity key and exactly one row per
//! group survives: the best score, ties broken by the smaller fingerprint.
//! The tie-break gives a total, input-order-independent result, which is what
//! makes repeated runs byte-identical.

use crate::dataset::ScoredRow;
use crate::Error;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Psm,
    Precursor,
    ModifiedPeptide,
    Peptide,
    PeptideGroup,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Psm,
        Level::Precursor,
        Level::ModifiedPeptide,
        Level::Peptide,
        Level::PeptideGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Psm => "psm",
            Level::Precursor => "precursor",
            Level::ModifiedPeptide => "modifiedpeptide",
            Level::Peptide => "peptide",
            Level::PeptideGroup => "peptidegroup",
        }
    }

    /// Pluralized name used in output file names.
    pub fn plural(&self) -> &'static str {
        match self {
            Level::Psm => "psms",
            Level::Precursor => "precursors",
            Level::ModifiedPeptide => "modifiedpeptides",
            Level::Peptide => "peptides",
            Level::PeptideGroup => "peptidegroups",
        }
    }

    /// The levels whose results can be rolled up from input at this level,
    /// including this level itself.
    pub fn rollup_levels(&self) -> Vec<Level> {
        match self {
            Level::Psm => Level::ALL.to_vec(),
            Level::Precursor => vec![
                Level::Precursor,
                Level::ModifiedPeptide,
                Level::Peptide,
                Level::PeptideGroup,
            ],
            Level::ModifiedPeptide => vec![Level::ModifiedPeptide, Level::Peptide],
            Level::Peptide => vec![Level::Peptide],
            Level::PeptideGroup => vec![Level::PeptideGroup],
        }
    }

    /// The identity key a row competes under at this level.
    pub fn group_key(&self, row: &ScoredRow) -> String {
        match self {
            Level::Psm => {
                let mut key = String::new();
                if let Some(ref specfile) = row.specfile {
                    key.push_str(specfile);
                }
                key.push('|');
                if let Some(scannr) = row.scannr {
                    key.push_str(&scannr.to_string());
                }
                key.push('|');
                if let Some(expmass) = row.expmass {
                    key.push_str(&expmass.to_string());
                }
                key
            }
            Level::Precursor => {
                let peptide = modified_peptide(&row.peptide);
                match (row.charge, row.expmass) {
                    (Some(charge), _) => format!("{}/{}", peptide, charge),
                    (None, Some(expmass)) => format!("{}/{}", peptide, expmass),
                    (None, None) => peptide.to_string(),
                }
            }
            Level::ModifiedPeptide => modified_peptide(&row.peptide).to_string(),
            Level::Peptide => bare_peptide(&row.peptide),
            Level::PeptideGroup => protein_group(&row.proteins),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "psm" => Ok(Level::Psm),
            "precursor" => Ok(Level::Precursor),
            "modifiedpeptide" => Ok(Level::ModifiedPeptide),
            "peptide" => Ok(Level::Peptide),
            "peptidegroup" => Ok(Level::PeptideGroup),
            _ => Err(format!("`{}` is not an aggregation level", s)),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip single-residue flanks from a Percolator-style peptide
/// (`K.PEPTIDE.R` becomes `PEPTIDE`).
fn modified_peptide(peptide: &str) -> &str {
    let bytes = peptide.as_bytes();
    let mut lo = 0;
    let mut hi = bytes.len();
    if hi >= 2 && bytes[1] == b'.' {
        lo = 2;
    }
    if hi >= lo + 2 && bytes[hi - 2] == b'.' {
        hi -= 2;
    }
    &peptide[lo..hi]
}

/// Reduce a peptide to its bare sequence: flanks stripped, bracketed
/// modification annotations and any other non-letter characters removed,
/// uppercased.
fn bare_peptide(peptide: &str) -> String {
    let mut bare = String::with_capacity(peptide.len());
    let mut depth = 0usize;
    for c in modified_peptide(peptide).chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_ascii_alphabetic() => bare.push(c.to_ascii_uppercase()),
            _ => {}
        }
    }
    bare
}

/// Canonical protein-group key: the sorted, deduplicated protein set.
fn protein_group(proteins: &str) -> String {
    let mut entries = proteins
        .split(|c| c == ';' || c == ',' || c == '\t')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();
    entries.sort_unstable();
    entries.dedup();
    entries.join(";")
}

#[derive(Clone, Debug)]
pub enum SelectorBackend {
    /// One running winner per group, held in a hash map.
    InMemory,
    /// Spill rows to `partitions` scratch files bucketed by group-key hash,
    /// then select within each partition independently. Peak memory is
    /// bounded by the largest partition instead of the whole input.
    OnDisk { partitions: usize, scratch: PathBuf },
}

pub struct Selector {
    level: Level,
    backend: SelectorBackend,
}

// Distinguishes concurrent spills within one process
static SPILL_ID: AtomicUsize = AtomicUsize::new(0);

impl Selector {
    pub fn new(level: Level, backend: SelectorBackend) -> Self {
        Selector { level, backend }
    }

    /// Consume rows and return one winner per group, in the stable output
    /// order (score descending, fingerprint ascending).
    pub fn select<I>(&self, rows: I) -> Result<Vec<ScoredRow>, Error>
    where
        I: IntoIterator<Item = Result<ScoredRow, Error>>,
    {
        let mut winners = match &self.backend {
            SelectorBackend::InMemory => self.select_in_memory(rows)?,
            SelectorBackend::OnDisk {
                partitions,
                scratch,
            } => self.select_on_disk(rows, *partitions, scratch)?,
        };
        winners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.fingerprint.cmp(&b.fingerprint))
                .then_with(|| a.psm_id.cmp(&b.psm_id))
        });
        Ok(winners)
    }

    fn select_in_memory<I>(&self, rows: I) -> Result<Vec<ScoredRow>, Error>
    where
        I: IntoIterator<Item = Result<ScoredRow, Error>>,
    {
        let mut best: FnvHashMap<String, ScoredRow> = FnvHashMap::default();
        for row in rows {
            let row = row?;
            let key = self.level.group_key(&row);
            match best.entry(key) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    if beats(&row, entry.get()) {
                        entry.insert(row);
                    }
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(row);
                }
            }
        }
        Ok(best.into_values().collect())
    }

    fn select_on_disk<I>(
        &self,
        rows: I,
        partitions: usize,
        scratch: &PathBuf,
    ) -> Result<Vec<ScoredRow>, Error>
    where
        I: IntoIterator<Item = Result<ScoredRow, Error>>,
    {
        let partitions = partitions.max(1);
        std::fs::create_dir_all(scratch)?;
        let stamp = SPILL_ID.fetch_add(1, Ordering::Relaxed);
        let paths = (0..partitions)
            .map(|i| {
                scratch.join(format!(
                    "rollup-{}-{}-{}-{:03}.part",
                    std::process::id(),
                    stamp,
                    self.level.as_str(),
                    i
                ))
            })
            .collect::<Vec<_>>();

        let result = self.spill_and_select(rows, &paths);
        for path in &paths {
            let _ = std::fs::remove_file(path);
        }
        result
    }

    fn spill_and_select<I>(&self, rows: I, paths: &[PathBuf]) -> Result<Vec<ScoredRow>, Error>
    where
        I: IntoIterator<Item = Result<ScoredRow, Error>>,
    {
        let mut writers = paths
            .iter()
            .map(|path| {
                std::fs::File::create(path).map(|file| {
                    csv::WriterBuilder::new()
                        .delimiter(b'\t')
                        .has_headers(false)
                        .from_writer(std::io::BufWriter::new(file))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for row in rows {
            let row = row?;
            let key = self.level.group_key(&row);
            let mut hasher = fnv::FnvHasher::default();
            key.hash(&mut hasher);
            let bucket = (hasher.finish() % paths.len() as u64) as usize;
            writers[bucket].serialize(&row)?;
        }
        for writer in &mut writers {
            writer.flush()?;
        }
        drop(writers);

        let mut winners = Vec::new();
        for path in paths {
            let reader = csv::ReaderBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .from_path(path)?;
            let rows = reader
                .into_deserialize::<ScoredRow>()
                .map(|row| row.map_err(Error::from));
            winners.extend(self.select_in_memory(rows)?);
        }
        Ok(winners)
    }
}

/// The competition ordering: higher score first, smaller fingerprint on
/// ties. Rows that collide on both (e.g. two PSMs from the same spectrum
/// with the same score) fall back to the PSM identifier so that the winner
/// never depends on input order.
fn beats(challenger: &ScoredRow, incumbent: &ScoredRow) -> bool {
    challenger
        .score
        .total_cmp(&incumbent.score)
        .reverse()
        .then(challenger.fingerprint.cmp(&incumbent.fingerprint))
        .then_with(|| challenger.psm_id.cmp(&incumbent.psm_id))
        .is_lt()
}
