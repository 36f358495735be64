//! Shared test utilities for the mirror-manager workspace.
//!
//! Standard fixtures used by the test suites of every crate. Dev-dependency
//! only; never published.
//!
//! # Modules
//!
//! - [`tool`]: [`FakeTool`] shell scripts standing in for rsync
//! - [`mail`]: [`RecordingMailer`] capturing dispatched summaries
//! - [`workspace`]: [`TestWorkspace`] temp tree with a ready config file

pub mod mail;
pub mod tool;
pub mod workspace;

pub use mail::RecordingMailer;
pub use tool::FakeTool;
pub use workspace::{TEST_GROUP, TestWorkspace};
