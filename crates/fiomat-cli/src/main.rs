use anyhow::{Context, Result};
use clap::Parser;
use fiomat_runner::{default_mounts, run_matrix, safety_check, RunConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fiomat",
    version,
    about = "Runs fio across storage mounts over a workload parameter matrix"
)]
struct Cli {
    /// Directory to drop result files into.
    out_dir: PathBuf,

    /// Raise log verbosity.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    // An operator interrupt mid-matrix is a clean stop, not an error.
    ctrlc::set_handler(|| std::process::exit(0))
        .context("failed to install interrupt handler")?;

    let config = RunConfig::new(cli.out_dir, default_mounts()?);
    info!("output directory: {}", config.out_dir.display());

    if let Err(err) = safety_check(&config.fio_binary) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }

    let summary = run_matrix(&config)?;
    info!("completed {} jobs", summary.jobs_run);
    Ok(())
}
