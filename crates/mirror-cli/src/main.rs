//! Mirror Manager CLI
//!
//! Loads the configuration, synchronizes every enabled mirror under the
//! configured concurrency limit and keeps the operator summary flowing.

mod cli;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;
use mirror_core::{Scheduler, WorkerOutcome};
use mirror_meta::Config;
use mirror_summary::{RotationEngine, SummaryWriter};

use cli::Cli;
use error::{CliError, Result};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        tracing::error!(target: logging::EXIT_TARGET, error = ?e, "{}", e);
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init(cli.log_level(), None);
            return Err(e.into());
        }
    };
    let summary = match RotationEngine::from_config(&config) {
        Ok(engine) => SummaryWriter::new(engine),
        Err(e) => {
            logging::init(cli.log_level(), None);
            return Err(e.into());
        }
    };
    logging::init(cli.log_level(), Some(summary.clone()));
    tracing::debug!("using config file: {}", cli.config.display());

    if cli.summarize {
        summary.force_rotate()?;
    } else {
        rotate_if_due(&summary);
    }

    let result = synchronize(&config, cli.dry_run);
    rotate_if_due(&summary);
    result
}

fn synchronize(config: &Config, dry_run: bool) -> Result<()> {
    let scheduler = Scheduler::from_config(config, dry_run)?;
    tracing::debug!("enabled mirrors: {:?}", config.mirrors.enabled);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(scheduler.run())?;

    for (name, outcome) in report.outcomes() {
        match outcome {
            WorkerOutcome::Completed(result) => tracing::debug!(mirror = %name, "{}", result),
            WorkerOutcome::Skipped => tracing::debug!(mirror = %name, "skipped; locked elsewhere"),
            WorkerOutcome::Cancelled => tracing::debug!(mirror = %name, "cancelled"),
            WorkerOutcome::Failed(_) => {}
        }
    }

    match report.failures().count() {
        0 => Ok(()),
        count => Err(CliError::MirrorsFailed { count }),
    }
}

fn rotate_if_due(summary: &SummaryWriter) {
    if let Err(e) = summary.rotate_if_due() {
        tracing::error!(error = %e, "unable to rotate activity summary");
    }
}
