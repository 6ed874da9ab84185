use anyhow::Context;
use clap::ArgMatches;
use rollup_core::competition::Level;
use rollup_core::ml::pep::PepAlgorithm;
use rollup_core::ml::qvalue::QvalueAlgorithm;
use serde::Serialize;
use std::path::PathBuf;

/// Resolved rollup configuration - CLI arguments plus defaults.
#[derive(Clone, Debug, Serialize)]
pub struct RollupConfig {
    pub level: Level,
    pub src_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub file_root: String,
    pub peps_algorithm: PepAlgorithm,
    pub qvalue_algorithm: QvalueAlgorithm,
    pub stream_confidence: bool,
    pub seed: u64,
    /// 0 means one worker per available core.
    pub max_workers: usize,
    pub verbosity: u8,
    pub suppress_warnings: bool,
}

impl RollupConfig {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let level = matches
            .get_one::<String>("level")
            .expect("level is a required argument")
            .parse::<Level>()
            .map_err(anyhow::Error::msg)?;
        let peps_algorithm = matches
            .get_one::<String>("peps_algorithm")
            .expect("defaulted by clap")
            .parse::<PepAlgorithm>()
            .map_err(anyhow::Error::msg)?;
        let qvalue_algorithm = matches
            .get_one::<String>("qvalue_algorithm")
            .expect("defaulted by clap")
            .parse::<QvalueAlgorithm>()
            .map_err(anyhow::Error::msg)?;

        let src_dir = PathBuf::from(
            matches
                .get_one::<String>("src_dir")
                .expect("defaulted by clap"),
        );
        anyhow::ensure!(
            src_dir.is_dir(),
            "source directory `{}` does not exist",
            src_dir.display()
        );

        Ok(RollupConfig {
            level,
            src_dir,
            dest_dir: PathBuf::from(
                matches
                    .get_one::<String>("dest_dir")
                    .expect("defaulted by clap"),
            ),
            file_root: matches
                .get_one::<String>("file_root")
                .expect("defaulted by clap")
                .clone(),
            peps_algorithm,
            qvalue_algorithm,
            stream_confidence: matches.get_flag("stream_confidence"),
            seed: matches
                .get_one::<u64>("seed")
                .copied()
                .context("seed must be an integer")?,
            max_workers: matches
                .get_one::<usize>("max_workers")
                .copied()
                .unwrap_or(0),
            verbosity: matches.get_one::<u8>("verbosity").copied().unwrap_or(2),
            suppress_warnings: matches.get_flag("suppress_warnings"),
        })
    }
}
