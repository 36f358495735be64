//! Persisted rotation state, one record per summary group
//!
//! Each group owns a small TOML record at `<prefix>.<group-id>`:
//!
//! ```toml
//! group_name = "My Mirrors"
//! last_rotation = 1792300000
//! ```
//!
//! The record is opened, read or rewritten, and closed on every access
//! under an exclusive lock on `<prefix>.<group-id>.lock`, so several
//! processes (or threads) sharing a group never lose an update.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::group::{SummaryGroup, with_suffix};
use crate::{Error, Result};

/// What is remembered about a group between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    /// Display name of the group, for humans reading the file
    pub group_name: String,
    /// When the group's summary log was last rotated (epoch seconds on disk)
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_rotation: DateTime<Utc>,
}

/// Keyed store for one group's [`RotationState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    group: SummaryGroup,
    path: PathBuf,
    lock_path: PathBuf,
}

impl StateStore {
    /// Store for `group` under `prefix` (e.g. `/var/lib/mirror/log_state`).
    pub fn new(prefix: &Path, group: &SummaryGroup) -> Self {
        let path = group.suffixed(prefix);
        let lock_path = with_suffix(&path, "lock");
        Self {
            group: group.clone(),
            path,
            lock_path,
        }
    }

    /// Path of the state record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, if one has ever been written.
    pub fn load(&self) -> Result<Option<RotationState>> {
        mirror_fs::io::with_file_lock(&self.lock_path, || self.read_unlocked())?
    }

    /// Last rotation time, recording `now` first if the group is new.
    ///
    /// A group seen for the first time is treated as having just rotated,
    /// which matches its empty summary log.
    pub fn last_rotation_or_init(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        mirror_fs::io::with_file_lock(&self.lock_path, || {
            if let Some(state) = self.read_unlocked()? {
                return Ok(state.last_rotation);
            }
            self.write_unlocked(now)?;
            Ok(now)
        })?
    }

    /// Record a rotation at `when` and return the time now stored.
    ///
    /// The stored time never moves backwards: if another writer already
    /// recorded a later rotation, that later time is kept.
    pub fn record_rotation(&self, when: DateTime<Utc>) -> Result<DateTime<Utc>> {
        mirror_fs::io::with_file_lock(&self.lock_path, || {
            let stored = match self.read_unlocked()? {
                Some(state) if state.last_rotation > when => state.last_rotation,
                _ => when,
            };
            self.write_unlocked(stored)?;
            Ok(stored)
        })?
    }

    fn read_unlocked(&self) -> Result<Option<RotationState>> {
        let Some(content) = mirror_fs::io::read_optional(&self.path)? else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| Error::StateParse {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    fn write_unlocked(&self, last_rotation: DateTime<Utc>) -> Result<()> {
        let state = RotationState {
            group_name: self.group.name().to_string(),
            last_rotation,
        };
        let content = toml::to_string(&state)?;
        mirror_fs::io::write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }
}
