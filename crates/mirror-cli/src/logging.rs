//! Subscriber setup: console output plus the summary sink
//!
//! ```text
//! event ─┬─► fmt (stderr)   EnvFilter: RUST_LOG, else the -d/-v level
//!        └─► fmt (summary)  WARN and above, never from mirror_summary itself
//! ```
//!
//! The summary engine logs its own mail and rotation failures; letting those
//! back into the summary sink would re-enter the engine while it is locked.

use mirror_summary::SummaryWriter;
use tracing::{Level, Metadata};
use tracing_subscriber::filter::{EnvFilter, FilterExt, LevelFilter, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Target of the final "why did the run end" event, which the CLI also
/// prints itself.
pub const EXIT_TARGET: &str = "mirror::exit";

/// Install the global subscriber.
///
/// `summary` is absent when the configuration could not be loaded; the
/// console layer is installed regardless so the cause is always recorded.
pub fn init(level: Level, summary: Option<SummaryWriter>) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter.and(filter_fn(|meta: &Metadata<'_>| meta.target() != EXIT_TARGET)));

    let summary = summary.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter_fn(summarizable))
    });

    let installed = tracing_subscriber::registry()
        .with(console)
        .with(summary)
        .try_init();
    if let Err(e) = installed {
        eprintln!("unable to install logging: {}", e);
    }
}

/// Whether an event belongs in the operator summary.
pub fn summarizable(meta: &Metadata<'_>) -> bool {
    *meta.level() <= Level::WARN && !meta.target().starts_with("mirror_summary")
}
