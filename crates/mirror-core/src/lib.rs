//! Job orchestration for Mirror Manager
//!
//! ```text
//! Scheduler ──gate──► Worker ──► LockManager (mirror-fs)
//!                        └─────► StreamCollector ──► external tool
//! ```
//!
//! - [`job`]: [`MirrorJob`] and its deterministic tool command line
//! - [`collector`]: spawning the tool and draining its output while it runs
//! - [`worker`]: one job's lock, subprocess and state machine
//! - [`scheduler`]: the concurrency gate, signal handling and run report

pub mod collector;
pub mod error;
pub mod job;
pub mod scheduler;
pub mod worker;

pub use collector::{ExitKind, RunningProcess, Stream, StreamCollector, SubprocessResult};
pub use error::{Error, Result};
pub use job::{MirrorJob, jobs_from_config, normalize_dir_uri};
pub use scheduler::{RunReport, Scheduler};
pub use worker::{Worker, WorkerHandle, WorkerOutcome, WorkerState};
