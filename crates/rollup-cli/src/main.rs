use clap::{value_parser, Arg, ArgAction, Command, ValueHint};
use rollup_cli::input::RollupConfig;
use rollup_cli::runner::Runner;
use std::time::Instant;

fn main() {
    if let Err(err) = run() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("{:#}", err);
        } else {
            eprintln!("[Error] {:#}", err);
        }
        std::process::exit(250);
    }
}

fn run() -> anyhow::Result<()> {
    let matches = Command::new("rollup")
        .version(clap::crate_version!())
        .about("Multi-level confidence rollup for rescored peptide-spectrum matches")
        .arg(
            Arg::new("level")
                .long("level")
                .required(true)
                .value_parser(["psm", "precursor", "modifiedpeptide", "peptide", "peptidegroup"])
                .help("Aggregation level of the input files; this level and everything derivable from it is written"),
        )
        .arg(
            Arg::new("src_dir")
                .short('s')
                .long("src_dir")
                .default_value(".")
                .help("The directory in which to look for the files to rollup")
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("dest_dir")
                .short('d')
                .long("dest_dir")
                .default_value(".")
                .help("The directory in which to write the result files")
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("file_root")
                .short('r')
                .long("file_root")
                .default_value("rollup")
                .help("The prefix added to all output file names"),
        )
        .arg(
            Arg::new("peps_algorithm")
                .long("peps_algorithm")
                .default_value("qvality")
                .value_parser(["qvality", "qvality_bin", "kde_nnls", "hist_nnls"])
                .help(
                    "Algorithm for PEP computation. `qvality_bin` requires the qvality \
                     binary on the search path",
                ),
        )
        .arg(
            Arg::new("qvalue_algorithm")
                .long("qvalue_algorithm")
                .default_value("tdc")
                .value_parser(["tdc", "from_peps", "from_counts"])
                .help("Algorithm for q-value computation"),
        )
        .arg(
            Arg::new("stream_confidence")
                .long("stream_confidence")
                .action(ArgAction::SetTrue)
                .help("Bound peak memory by bucketing rows to disk instead of holding them all"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("1")
                .value_parser(value_parser!(u64))
                .help("Random seed for density-estimate subsampling"),
        )
        .arg(
            Arg::new("max_workers")
                .long("max_workers")
                .default_value("0")
                .value_parser(value_parser!(usize))
                .help("Number of worker threads (default = # of CPUs)"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .default_value("2")
                .value_parser(value_parser!(u8).range(0..=3))
                .help("0 - errors, 1 - warnings, 2 - messages, 3 - debug info"),
        )
        .arg(
            Arg::new("suppress_warnings")
                .long("suppress_warnings")
                .action(ArgAction::SetTrue)
                .help("Suppress warning messages; intended for production pipelines"),
        )
        .get_matches();

    let config = RollupConfig::from_arguments(matches)?;

    env_logger::Builder::default()
        .filter_level(match config.verbosity {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .parse_env(env_logger::Env::default().filter("ROLLUP_LOG"))
        .init();

    log::info!("rollup version {}", clap::crate_version!());
    log::info!("Command issued:");
    log::info!("  {}", std::env::args().collect::<Vec<_>>().join(" "));

    let threads = match config.max_workers {
        0 => num_cpus::get(),
        n => n,
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    std::fs::create_dir_all(&config.dest_dir)?;

    let start = Instant::now();
    let runner = Runner::new(config)?;
    runner.run()?;
    log::info!("finished in {:#?}", start.elapsed());

    Ok(())
}
