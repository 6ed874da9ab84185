use crate::input::RollupConfig;
use crate::output;
use anyhow::Context;
use log::info;
use rayon::prelude::*;
use rollup_core::competition::{Level, Selector, SelectorBackend};
use rollup_core::confidence::{self, ConfidenceConfig};
use rollup_core::dataset::ScoredReader;
use rollup_core::ml::pep::PepConfig;
use std::path::PathBuf;

pub struct Runner {
    pub config: RollupConfig,
    /// Input file names, indexed by the `file_id` carried on every row.
    pub filenames: Vec<String>,
    paths: Vec<PathBuf>,
}

impl Runner {
    pub fn new(config: RollupConfig) -> anyhow::Result<Self> {
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(&config.src_dir)
            .with_context(|| format!("failed to read `{}`", config.src_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if path.is_file() && matches!(ext, "csv" | "tsv" | "pin") {
                paths.push(path);
            }
        }
        // Sorted so that file ids, and therefore results, do not depend on
        // directory enumeration order
        paths.sort();
        anyhow::ensure!(
            !paths.is_empty(),
            "no input files (.csv, .tsv, .pin) found in `{}`",
            config.src_dir.display()
        );

        if config.peps_algorithm == rollup_core::ml::pep::PepAlgorithm::QvalityBin {
            rollup_core::ml::qvality::require()?;
        }

        let filenames = paths
            .iter()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();

        info!(
            "- found {} input files in {}",
            paths.len(),
            config.src_dir.display()
        );
        log::debug!(
            "{}",
            serde_json::to_string_pretty(&config).expect("config is serializable")
        );

        Ok(Runner {
            config,
            filenames,
            paths,
        })
    }

    /// Process every rollup level derivable from the configured base level.
    /// Levels are independent, so one failing level does not abort the
    /// others; it is reported at the end instead.
    pub fn run(&self) -> anyhow::Result<()> {
        let levels = self.config.level.rollup_levels();
        let results = levels
            .par_iter()
            .map(|&level| (level, self.process_level(level)))
            .collect::<Vec<_>>();

        let mut failed = 0;
        for (level, result) in results {
            if let Err(err) = result {
                failed += 1;
                log::error!("- {} level failed: {:#}", level, err);
            }
        }
        anyhow::ensure!(failed == 0, "{} of {} levels failed", failed, levels.len());
        Ok(())
    }

    fn process_level(&self, level: Level) -> anyhow::Result<()> {
        let backend = match self.config.stream_confidence {
            true => SelectorBackend::OnDisk {
                partitions: 16,
                scratch: self.config.dest_dir.join(".rollup-scratch"),
            },
            false => SelectorBackend::InMemory,
        };
        let selector = Selector::new(level, backend);

        let mut readers = Vec::with_capacity(self.paths.len());
        for (file_id, path) in self.paths.iter().enumerate() {
            readers.push(
                ScoredReader::open(path, file_id)
                    .with_context(|| format!("failed to open `{}`", path.display()))?,
            );
        }
        let winners = selector.select(readers.into_iter().flatten())?;
        info!("- {}: {} competition groups", level, winners.len());

        let config = ConfidenceConfig {
            qvalue: self.config.qvalue_algorithm,
            pep: PepConfig {
                algorithm: self.config.peps_algorithm,
                seed: self.config.seed,
                suppress_warnings: self.config.suppress_warnings,
                ..Default::default()
            },
        };
        let assigned = confidence::assign(winners, &config)?;
        let passing = assigned
            .iter()
            .filter(|r| r.is_target() && r.q_value <= 0.01)
            .count();
        info!("- {}: {} targets at q <= 0.01", level, passing);

        let (targets, decoys) =
            output::write_level(&self.config, level, &self.filenames, &assigned)?;
        info!(
            "- {}: wrote {} and {}",
            level,
            targets.display(),
            decoys.display()
        );
        Ok(())
    }
}
