//! Small-file persistence helpers for state records and lock sidecars

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;

use crate::{Error, Result};

/// Replace `path` with `content`; readers see either the old or the new
/// bytes, never a mix.
///
/// The content is synced in a hidden sibling file which is then renamed over
/// `path`. On failure the sibling is removed and `path` is left untouched.
/// Concurrent writers must serialise through [`with_file_lock`].
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            dir
        }
        None => Path::new("."),
    };

    let partial = partial_sibling(path);
    let replaced = write_synced(&partial, content)
        .and_then(|()| fs::rename(&partial, path).map_err(|e| Error::io(path, e)));
    if let Err(e) = replaced {
        if let Err(cleanup) = fs::remove_file(&partial) {
            tracing::debug!(path = %partial.display(), error = %cleanup, "partial file not removed");
        }
        return Err(e);
    }

    // Make the rename itself durable; some filesystems refuse directory fsync
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory sync skipped");
    }
    Ok(())
}

/// Unique per process and per call, so two threads never share one.
fn partial_sibling(path: &Path) -> PathBuf {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}-{}.partial",
        name,
        std::process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ))
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::io(path, e))
}

/// Read a text file, returning `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Run `f` while holding a blocking exclusive lock on `lock_path`.
///
/// The lock file is created on demand and left in place; only the lock
/// itself is released when `f` returns. This serialises read-modify-write
/// cycles across processes on files that are replaced by rename (and so
/// cannot carry the lock themselves).
pub fn with_file_lock<T>(lock_path: &Path, f: impl FnOnce() -> T) -> Result<T> {
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| Error::io(lock_path, e))?;

    file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: lock_path.to_path_buf(),
    })?;

    let value = f();

    // Released on drop as well; explicit to keep the critical section obvious
    let _ = file.unlock();
    Ok(value)
}
