//! Summary groups and their stable identifiers

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// A named notification bucket.
///
/// The identifier is the hex SHA-256 of the display name, so it is stable
/// across runs and hosts and safe to embed in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryGroup {
    name: String,
    id: String,
}

impl SummaryGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let id = format!("{:x}", hasher.finalize());
        Self { name, id }
    }

    /// Display name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File-name-safe identifier derived from the name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `prefix` with `.<id>` appended, e.g. `/var/log/mirror/summary.<id>`.
    pub fn suffixed(&self, prefix: &Path) -> PathBuf {
        with_suffix(prefix, &self.id)
    }
}

impl fmt::Display for SummaryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Append `.suffix` to the final component of `path`.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}
