//! Worker: one mirror job's lock, subprocess and lifecycle
//!
//! ```text
//! Pending ──lock gained──► Running ──stop / exit──► Stopping ──lock released──► Stopped
//!    └────────────── lock held elsewhere, or lock error ───────────────────────►┘
//! ```
//!
//! A worker runs as its own tokio task. Stopping is cooperative: the handle
//! only cancels the worker's token, and the worker itself signals and, if
//! need be, kills its subprocess.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mirror_fs::{LockHandle, LockManager};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::collector::{DEFAULT_GRACE_PERIOD, Stream, StreamCollector, SubprocessResult};
use crate::job::MirrorJob;
use crate::Error;

/// Lifecycle of a [`Worker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Pending => "pending",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How one job run ended
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Another process holds the mirror's lock
    Skipped,
    /// Cancelled before the tool was started
    Cancelled,
    /// The tool ran; its result may still be a failure or a signal
    Completed(SubprocessResult),
    /// The job could not run: lock directory or spawn failure
    Failed(Error),
}

impl WorkerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, WorkerOutcome::Failed(_))
    }
}

/// A job ready to be started
#[derive(Debug, Clone)]
pub struct Worker {
    job: MirrorJob,
    locks: LockManager,
    grace: Duration,
    kill_switch: CancellationToken,
}

impl Worker {
    pub fn new(job: MirrorJob, locks: LockManager) -> Self {
        Self {
            job,
            locks,
            grace: DEFAULT_GRACE_PERIOD,
            kill_switch: CancellationToken::new(),
        }
    }

    /// Delay between SIGTERM and the forced kill when stopped.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Token that kills the tool immediately, grace period or not.
    pub fn with_kill_switch(mut self, kill_switch: CancellationToken) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    pub fn job(&self) -> &MirrorJob {
        &self.job
    }

    /// Spawn the worker task; it stops early once `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> WorkerHandle {
        let (state_tx, state) = watch::channel(WorkerState::Pending);
        let name = self.job.name.clone();
        let span = tracing::info_span!("mirror", mirror = %name);
        let task = tokio::spawn(self.run(cancel.clone(), state_tx).instrument(span));
        WorkerHandle {
            name,
            state,
            cancel,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, state: watch::Sender<WorkerState>) -> WorkerOutcome {
        let mut guard = match self.locks.try_acquire(&self.job.name) {
            Ok(Some(lock)) => {
                tracing::info!("gained exclusive-lock on {}", lock.path().display());
                LockGuard::new(lock, state)
            }
            Ok(None) => {
                tracing::info!(
                    "{} already locked by another process",
                    self.locks.lock_path(&self.job.name).display()
                );
                state.send_replace(WorkerState::Stopped);
                return WorkerOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot lock mirror");
                state.send_replace(WorkerState::Stopped);
                return WorkerOutcome::Failed(e.into());
            }
        };
        guard.state.send_replace(WorkerState::Running);

        if cancel.is_cancelled() {
            tracing::info!("cancelled before synchronization");
            return WorkerOutcome::Cancelled;
        }

        let outcome = self.synchronize(&cancel, &guard.state).await;
        guard.state.send_if_modified(|s| promote(s, WorkerState::Stopping));
        guard.release();
        outcome
    }

    async fn synchronize(
        &self,
        cancel: &CancellationToken,
        state: &watch::Sender<WorkerState>,
    ) -> WorkerOutcome {
        tracing::info!("mirror synchronization started");
        let collector = StreamCollector::new(&self.job.program, self.job.arguments())
            .with_grace_period(self.grace)
            .with_kill_switch(self.kill_switch.clone());
        tracing::debug!(program = %collector.program().display(), args = ?collector.args(), "spawning");

        let process = match collector.spawn() {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "mirror synchronization failed");
                return WorkerOutcome::Failed(e);
            }
        };
        if let Some(pid) = process.pid() {
            tracing::info!("rsync pid={}", pid);
        }

        let collect = process.collect(cancel, |stream, line| match stream {
            Stream::Stdout => tracing::info!("{}", line),
            Stream::Stderr => tracing::error!("{}", line),
        });
        tokio::pin!(collect);
        let result = tokio::select! {
            result = &mut collect => result,
            _ = cancel.cancelled() => {
                state.send_if_modified(|s| promote(s, WorkerState::Stopping));
                tracing::info!("stop requested; terminating rsync");
                collect.await
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "lost track of rsync");
                return WorkerOutcome::Failed(e);
            }
        };
        match result.signal() {
            Some(signal) => tracing::warn!("rsync terminated; caught signal {}", signal),
            None if result.success() => tracing::debug!("rsync {}", result),
            None => tracing::info!("rsync {}", result),
        }
        tracing::info!("mirror synchronization finished");
        WorkerOutcome::Completed(result)
    }
}

/// Move forward to `next`, never back.
fn promote(state: &mut WorkerState, next: WorkerState) -> bool {
    let rank = |s: WorkerState| s as u8;
    if rank(*state) < rank(next) {
        *state = next;
        true
    } else {
        false
    }
}

/// Releases the mirror's lock exactly once, however the worker exits.
struct LockGuard {
    lock: Option<LockHandle>,
    state: watch::Sender<WorkerState>,
}

impl LockGuard {
    fn new(lock: LockHandle, state: watch::Sender<WorkerState>) -> Self {
        Self {
            lock: Some(lock),
            state,
        }
    }

    fn release(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let path = lock.path().to_path_buf();
        match lock.release() {
            Ok(()) => tracing::info!("released exclusive-lock on {}", path.display()),
            Err(e) => tracing::error!(error = %e, "failed to remove lock file {}", path.display()),
        }
        self.state.send_replace(WorkerState::Stopped);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a started [`Worker`]
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    state: watch::Receiver<WorkerState>,
    cancel: CancellationToken,
    task: JoinHandle<WorkerOutcome>,
}

impl WorkerHandle {
    /// Mirror name of the job.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Whether the worker still counts against the concurrency limit.
    pub fn is_active(&self) -> bool {
        self.state() != WorkerState::Stopped
    }

    /// Ask the worker to stop.
    ///
    /// A running subprocess gets SIGTERM and, after the grace period, a
    /// forced kill. Calling this after the worker has finished does nothing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until the worker reaches [`WorkerState::Stopped`].
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // Err means the task is gone, which is stopped as well
        let _ = state.wait_for(|s| *s == WorkerState::Stopped).await;
    }

    /// Wait for the worker task and take its outcome.
    pub async fn wait(self) -> WorkerOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => WorkerOutcome::Failed(Error::WorkerLost {
                mirror: self.name,
                message: e.to_string(),
            }),
        }
    }
}
