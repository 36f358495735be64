//! Scheduler: starts workers for the enabled jobs under a concurrency limit
//!
//! The limit is a polled gate: before each start the scheduler counts the
//! workers that have not yet stopped and, while that count is at the limit,
//! sleeps for the poll interval and looks again. Termination signals only
//! cancel the run's token; stopping the workers happens here, on ordinary
//! tasks, after which the run ends as [`Error::Interrupted`]. A second
//! signal trips the kill switch, so workers kill their tools without waiting
//! out the grace period.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mirror_fs::LockManager;
use mirror_meta::Config;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::DEFAULT_GRACE_PERIOD;
use crate::job::{MirrorJob, jobs_from_config};
use crate::worker::{Worker, WorkerHandle, WorkerOutcome};
use crate::{Error, Result};

/// How often a full gate is re-checked
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of every job that was started, in start order
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<(String, WorkerOutcome)>,
}

impl RunReport {
    pub fn outcomes(&self) -> &[(String, WorkerOutcome)] {
        &self.outcomes
    }

    pub fn outcome(&self, mirror: &str) -> Option<&WorkerOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == mirror)
            .map(|(_, outcome)| outcome)
    }

    /// Jobs that could not run at all.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            WorkerOutcome::Failed(e) => Some((name.as_str(), e)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    fn push(&mut self, mirror: String, outcome: WorkerOutcome) {
        self.outcomes.push((mirror, outcome));
    }
}

/// Runs a list of jobs with at most `max_workers` at once
#[derive(Debug)]
pub struct Scheduler {
    jobs: Vec<MirrorJob>,
    max_workers: usize,
    locks: LockManager,
    poll_interval: Duration,
    grace: Duration,
    cancel: CancellationToken,
    kill_switch: CancellationToken,
}

impl Scheduler {
    pub fn new(jobs: Vec<MirrorJob>, max_workers: usize, locks: LockManager) -> Self {
        Self {
            jobs,
            max_workers: max_workers.max(1),
            locks,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace: DEFAULT_GRACE_PERIOD,
            cancel: CancellationToken::new(),
            kill_switch: CancellationToken::new(),
        }
    }

    /// Scheduler for the enabled mirrors of `config`.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let jobs = jobs_from_config(config, dry_run)?;
        Ok(Self::new(
            jobs,
            config.defaults.max_workers,
            LockManager::new(&config.defaults.lock_directory),
        ))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Grace period handed to every worker.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Token that cancels the whole run, as a termination signal would.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token that kills every running tool at once, skipping the grace period.
    pub fn kill_switch(&self) -> CancellationToken {
        self.kill_switch.clone()
    }

    /// Run every job, stopping early on SIGINT, SIGTERM or SIGHUP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] once all started workers have stopped
    /// if the run was cancelled. Per-job failures are not errors here; they
    /// are recorded in the [`RunReport`].
    pub async fn run(self) -> Result<RunReport> {
        let listener = SignalListener::install(self.cancel.clone(), self.kill_switch.clone())?;
        let result = self.run_jobs().await;

        match (listener.finish(), result) {
            (Some(signal), Err(Error::Interrupted { .. })) => Err(Error::Interrupted {
                cause: signal.to_string(),
            }),
            (_, result) => result,
        }
    }

    /// Run every job without installing signal handlers.
    ///
    /// Cancellation comes only from [`Scheduler::cancellation_token`].
    pub async fn run_jobs(self) -> Result<RunReport> {
        let mut registry: Vec<WorkerHandle> = Vec::new();

        for job in &self.jobs {
            if !self.wait_for_capacity(&registry).await {
                tracing::info!(remaining = %job.name, "cancelled; not starting further mirrors");
                break;
            }
            tracing::debug!("processing mirror: '{}'", job.name);
            let worker = Worker::new(job.clone(), self.locks.clone())
                .with_grace_period(self.grace)
                .with_kill_switch(self.kill_switch.clone());
            registry.push(worker.start(self.cancel.child_token()));
        }

        let all_stopped = async {
            for handle in &registry {
                handle.stopped().await;
            }
        };
        tokio::select! {
            _ = all_stopped => {}
            _ = self.cancel.cancelled() => {}
        }
        if self.cancel.is_cancelled() {
            tracing::warn!(workers = registry.len(), "stopping all workers");
            for handle in &registry {
                handle.stop();
            }
        }

        let mut report = RunReport::default();
        for handle in registry {
            let name = handle.name().to_string();
            let outcome = handle.wait().await;
            if let WorkerOutcome::Failed(e) = &outcome {
                tracing::error!(mirror = %name, error = %e, "mirror failed");
            }
            report.push(name, outcome);
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted {
                cause: "cancellation request".to_string(),
            });
        }
        Ok(report)
    }

    /// Block until fewer than `max_workers` workers are active.
    ///
    /// Returns `false` if the run was cancelled while waiting.
    async fn wait_for_capacity(&self, registry: &[WorkerHandle]) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let active = registry.iter().filter(|w| w.is_active()).count();
            if active < self.max_workers {
                return true;
            }
            tracing::trace!(active, max = self.max_workers, "at worker limit");
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }
}

/// Turns termination-class signals into cancelled tokens
///
/// The first signal cancels the run; the next one trips the kill switch.
struct SignalListener {
    caught: Arc<OnceLock<&'static str>>,
    task: JoinHandle<()>,
}

impl SignalListener {
    fn install(cancel: CancellationToken, kill_switch: CancellationToken) -> Result<Self> {
        let mut signals = TerminationSignals::install()?;
        let caught = Arc::new(OnceLock::new());

        let slot = caught.clone();
        let task = tokio::spawn(async move {
            let name = tokio::select! {
                name = signals.recv() => name,
                _ = cancel.cancelled() => return,
            };
            let _ = slot.set(name);
            tracing::warn!("interrupted via {}", name);
            cancel.cancel();

            let again = signals.recv().await;
            tracing::warn!("{} received while stopping; killing all mirror tools", again);
            kill_switch.cancel();
        });

        Ok(Self { caught, task })
    }

    /// Stop listening and report the signal that was caught, if any.
    fn finish(self) -> Option<&'static str> {
        self.task.abort();
        self.caught.get().copied()
    }
}

struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl TerminationSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}
