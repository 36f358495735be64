//! Filesystem primitives for Mirror Manager
//!
//! Provides the per-mirror advisory lock manager and the small set of
//! locked, atomic file operations the rest of the workspace builds on.

pub mod error;
pub mod io;
pub mod lock;

pub use error::{Error, Result};
pub use lock::{LockHandle, LockManager};
