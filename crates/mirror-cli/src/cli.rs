//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Mirror Manager - keep local mirrors in sync with their upstream sources
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use an alternate configuration file
    #[arg(
        short,
        long,
        env = "MIRROR_CONFIG",
        default_value = mirror_meta::defaults::CONFIG_FILENAME
    )]
    pub config: PathBuf,

    /// Set logging level to DEBUG
    #[arg(short, long)]
    pub debug: bool,

    /// Set logging level to INFO
    #[arg(short, long)]
    pub verbose: bool,

    /// Perform a trial run with no changes made
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Send the activity summary now, before synchronizing
    #[arg(long)]
    pub summarize: bool,
}

impl Cli {
    /// Console log level selected by the flags; `--debug` wins.
    pub fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else {
            Level::WARN
        }
    }
}
