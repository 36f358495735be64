//! Per-mirror advisory locking
//!
//! Each mirror name maps to one lock file inside a shared lock directory.
//! Mutual exclusion rests entirely on the OS advisory lock (`flock(2)` via
//! `fs2`); the text written into the file (holder pid, acquisition time) is
//! only there for operators inspecting a stuck lock.
//!
//! Acquisition never blocks: a lock held by anyone else, in this process or
//! another, is reported as `Ok(None)` so the caller can skip the job.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use fs2::FileExt;

use crate::{Error, Result};

/// Hands out exclusive locks for mirror names within one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    directory: PathBuf,
}

impl LockManager {
    /// Create a lock manager rooted at `directory`.
    ///
    /// The directory is not touched until the first acquisition attempt.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The shared lock directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the lock file backing `name`.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// Try to take the exclusive lock for `name` without blocking.
    ///
    /// Returns `Ok(Some(handle))` when the lock was gained and `Ok(None)` when
    /// somebody else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockDirectory`] if the lock directory cannot be
    /// created, or [`Error::Io`] if the lock file cannot be opened.
    pub fn try_acquire(&self, name: &str) -> Result<Option<LockHandle>> {
        self.ensure_directory()?;

        let path = self.lock_path(name);
        // Never truncate before holding the lock: the content belongs to the holder
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if is_contended(&e) {
                tracing::debug!(path = %path.display(), "lock already held");
                return Ok(None);
            }
            return Err(Error::io(&path, e));
        }

        // The previous holder may have unlinked the file between our open and
        // our lock; a lock on an orphaned inode excludes nobody.
        if !still_linked(&file, &path) {
            tracing::debug!(path = %path.display(), "lock file replaced while acquiring");
            return Ok(None);
        }

        let handle = LockHandle {
            path,
            file,
            pid: std::process::id(),
            acquired_at: Local::now(),
        };
        if let Err(e) = handle.write_diagnostics() {
            tracing::warn!(path = %handle.path.display(), error = %e, "could not record lock holder");
        }
        Ok(Some(handle))
    }

    fn ensure_directory(&self) -> Result<()> {
        // create_dir_all already tolerates an existing directory
        fs::create_dir_all(&self.directory).map_err(|source| Error::LockDirectory {
            path: self.directory.clone(),
            source,
        })
    }
}

/// A held exclusive lock. Dropping it unlocks without deleting the file;
/// [`LockHandle::release`] is the clean path.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: File,
    pid: u32,
    acquired_at: DateTime<Local>,
}

impl LockHandle {
    /// Path of the backing lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process id recorded as the holder.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// When the lock was gained.
    pub fn acquired_at(&self) -> DateTime<Local> {
        self.acquired_at
    }

    /// Delete the lock file and give up the lock.
    ///
    /// A lock file that has already disappeared is not an error.
    pub fn release(self) -> Result<()> {
        // Unlink while still holding so no newcomer can lock the old inode first
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        };
        let _ = self.file.unlock();
        removed
    }

    fn write_diagnostics(&self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        let mut writer = &self.file;
        writeln!(writer, "pid={}", self.pid)?;
        writeln!(writer, "acquired={}", self.acquired_at.to_rfc3339())?;
        writer.flush()
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        || err.kind() == ErrorKind::WouldBlock
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}
