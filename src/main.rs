// main.rs

use std::time::Instant;

use anyhow::{Context, Error, Result};
use clap::Parser;
use log::info;

use rnaseq_qc::config::Config;
use rnaseq_qc::pipeline;

mod cli {
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Count matrix validation and QC for bulk RNA-seq.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[arg(short, long, default_value = "config.yaml")]
        pub(crate) config: PathBuf,

        /// Overrides `output.base_dir` from the config file.
        #[arg(short, long = "out-dir")]
        pub(crate) out_dir: Option<PathBuf>,

        /// Overrides `run.threads` from the config file.
        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }
}

fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting rnaseq_qc with args: {:?}", cli_args);

    let mut config = Config::load(&cli_args.config)
        .with_context(|| format!("Failed to load config {}", cli_args.config.display()))?;
    if let Some(dir) = cli_args.out_dir.clone() {
        config.output.base_dir = dir;
    }

    let num_threads = cli_args
        .threads
        .or(config.run.threads)
        .unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    let report = pipeline::run(&config).context("QC pipeline failed")?;

    info!(
        "QC table: {} samples over {} genes.",
        report.qc_table.len(),
        report.n_genes
    );
    if let Some(ev) = &report.explained_variance {
        let pcs: Vec<String> = ev.iter().map(|v| format!("{:.2}%", v * 100.0)).collect();
        info!("Explained variance (leading PCs): {}", pcs.join(", "));
    }
    for path in &report.written {
        info!("Wrote {}", path.display());
    }

    info!(
        "rnaseq_qc finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}
