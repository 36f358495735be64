//! Dual-trigger rotation of a group's summary log
//!
//! The summary log is rotated when appending the next record would push it
//! past `max_bytes`, or when more than `interval` has passed since the last
//! rotation recorded in the group's [`StateStore`]. Rotation shifts the
//! numbered backups (`.1` newest), prunes beyond `history_count`, and mails
//! the displaced content.
//!
//! Two views of "why" are kept apart on purpose. [`RotationEngine::should_rotate`]
//! answers for this instant only, while [`Reasons`] accumulates every trigger
//! seen since the last dispatch. A summary sent for size therefore still says
//! "age" if the age condition was observed at any point in the same cycle.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::clock::{Clock, SystemClock};
use crate::group::{SummaryGroup, with_suffix};
use crate::mail::{self, Mailer, SendmailMailer, SummaryMessage};
use crate::state::StateStore;
use crate::{Error, Result};

const STATUS_GOOD: &str = "STATUS GOOD!  No warnings or errors to summarize.";
const CONTENT_START: &str = "=== Start of Warning/Error Summary ===";
const CONTENT_END: &str = "=== End of Warning/Error Summary ===";

/// Thresholds and routing for one summary group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    /// Rotate when the log would grow beyond this many bytes
    pub max_bytes: u64,
    /// Rotate when this much time has passed since the last rotation
    pub interval: Duration,
    /// Number of numbered backups to keep
    pub history_count: usize,
    pub recipients: Vec<String>,
    pub sender: String,
}

impl RotationSettings {
    pub fn from_config(summary: &mirror_meta::SummaryConfig) -> Self {
        Self {
            max_bytes: summary.size,
            interval: summary.interval_duration(),
            history_count: summary.history_count,
            recipients: summary.recipients.clone(),
            sender: mail::default_sender(),
        }
    }
}

/// Triggers observed since the last dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reasons {
    pub age: bool,
    pub size: bool,
}

impl Reasons {
    /// Operator-facing explanation, e.g. `"age and size of logged messages"`.
    pub fn describe(&self) -> String {
        let mut reasons = Vec::new();
        if self.age {
            reasons.push("age");
        }
        if self.size {
            reasons.push("size");
        }
        if reasons.is_empty() {
            "forced".to_string()
        } else {
            format!("{} of logged messages", reasons.join(" and "))
        }
    }
}

/// Rotating summary log for one [`SummaryGroup`]
pub struct RotationEngine {
    group: SummaryGroup,
    settings: RotationSettings,
    log_path: PathBuf,
    store: StateStore,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    reasons: Reasons,
}

impl RotationEngine {
    /// Open the engine for `group`.
    ///
    /// `summary_prefix` and `state_prefix` are suffixed with the group id to
    /// give the log and state paths. A group seen for the first time has its
    /// last rotation initialised to now.
    pub fn new(
        group: SummaryGroup,
        settings: RotationSettings,
        summary_prefix: &Path,
        state_prefix: &Path,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let log_path = group.suffixed(summary_prefix);
        let store = StateStore::new(state_prefix, &group);
        store.last_rotation_or_init(clock.now())?;

        Ok(Self {
            group,
            settings,
            log_path,
            store,
            mailer,
            clock,
            reasons: Reasons::default(),
        })
    }

    /// Engine wired to the system clock and the configured `sendmail`.
    pub fn from_config(config: &mirror_meta::Config) -> Result<Self> {
        Self::new(
            SummaryGroup::new(config.summary.group.clone()),
            RotationSettings::from_config(&config.summary),
            &config.defaults.summary_file,
            &config.defaults.log_state,
            Arc::new(SendmailMailer::new(config.summary.sendmail.clone())),
            Arc::new(SystemClock),
        )
    }

    pub fn group(&self) -> &SummaryGroup {
        &self.group
    }

    /// Path of the current (unrotated) summary log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Path of backup number `n` (1 is the most recent).
    pub fn backup_path(&self, n: usize) -> PathBuf {
        with_suffix(&self.log_path, &n.to_string())
    }

    /// Triggers accumulated since the last dispatch.
    pub fn reasons(&self) -> Reasons {
        self.reasons
    }

    /// Decide whether a record of `pending` bytes must go to a fresh log.
    ///
    /// Each trigger that holds right now is also folded into
    /// [`RotationEngine::reasons`]; the return value reflects only the
    /// present instant.
    pub fn should_rotate(&mut self, pending: u64) -> Result<bool> {
        let for_size = self.current_size()?.saturating_add(pending) > self.settings.max_bytes;
        let for_age = self.summary_due()?;

        self.reasons.size |= for_size;
        Ok(for_age || for_size)
    }

    /// Rotate the log and dispatch its content.
    ///
    /// Returns the message that was handed to the mailer. Mail failures are
    /// logged, not returned.
    pub fn rotate(&mut self) -> Result<SummaryMessage> {
        let rotated = self.shift_backups()?;
        self.open_current()?;

        let now = self.clock.now();
        let since = self.store.last_rotation_or_init(now)?;
        let content = if rotated {
            read_lossy(&self.backup_path(1))?
        } else {
            String::new()
        };
        let message = self.compose(since, now, &content);

        let sent = off_runtime(|| {
            self.mailer.send(
                &message.sender,
                &message.recipients,
                &message.subject,
                &message.body,
            )
        });
        if let Err(e) = sent {
            tracing::error!(group = %self.group, error = %e, "unable to mail log summary");
        }

        self.reasons = Reasons::default();
        self.store.record_rotation(now)?;
        tracing::debug!(group = %self.group, rotated, "summary dispatched");
        Ok(message)
    }

    /// Rotate regardless of thresholds.
    ///
    /// Succeeds when there is no current log yet; the summary is still sent
    /// and the rotation time still recorded.
    pub fn force_rotate(&mut self) -> Result<SummaryMessage> {
        self.rotate()
    }

    /// Rotate only if a zero-length record would trigger rotation.
    ///
    /// Lets an idle installation still emit its periodic summary.
    pub fn rotate_if_due(&mut self) -> Result<Option<SummaryMessage>> {
        if self.should_rotate(0)? {
            self.force_rotate().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Append one formatted record, rotating first if it is due.
    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        if self.should_rotate(record.len() as u64)? {
            self.rotate()?;
        }

        // Opened per record: another process may have rotated the file
        let mut file = self.open_current()?;
        file.write_all(record)
            .map_err(|e| Error::io(&self.log_path, e))?;
        Ok(())
    }

    fn summary_due(&mut self) -> Result<bool> {
        let now = self.clock.now();
        let last = self.store.last_rotation_or_init(now)?;
        let age = (now - last).to_std().unwrap_or(Duration::ZERO);
        let due = age > self.settings.interval;
        self.reasons.age |= due;
        Ok(due)
    }

    fn current_size(&self) -> Result<u64> {
        match fs::metadata(&self.log_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::io(&self.log_path, e)),
        }
    }

    /// Shift `.N-1 -> .N ... .1 -> .2`, then the current log to `.1`.
    ///
    /// Returns whether a current log existed to be moved.
    fn shift_backups(&self) -> Result<bool> {
        let keep = self.settings.history_count.max(1);

        // Anything beyond the retention count goes first
        let mut n = keep;
        loop {
            let path = self.backup_path(n);
            match fs::remove_file(&path) {
                Ok(()) => n += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(Error::io(&path, e)),
            }
        }

        for n in (1..keep).rev() {
            rename_if_present(&self.backup_path(n), &self.backup_path(n + 1))?;
        }
        rename_if_present(&self.log_path, &self.backup_path(1))
    }

    /// Open the current log for appending, creating it and its directory.
    fn open_current(&self) -> Result<File> {
        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Error::io(&self.log_path, e))
    }

    fn compose(&self, since: DateTime<Utc>, until: DateTime<Utc>, content: &str) -> SummaryMessage {
        let mut body = vec![
            format!("{:>25}:  {}", "Since", ctime(since)),
            format!("{:>25}:  {}", "Until", ctime(until)),
            format!("{:>25}:  {}", "Reason for Notification", self.reasons.describe()),
            "\n".to_string(),
        ];
        if content.trim().is_empty() {
            body.push(STATUS_GOOD.to_string());
        } else {
            body.push(CONTENT_START.to_string());
            body.push(content.to_string());
            body.push(CONTENT_END.to_string());
        }

        SummaryMessage {
            sender: self.settings.sender.clone(),
            recipients: self.settings.recipients.clone(),
            subject: format!("Mirror Activity Summary for {}", self.group.name()),
            body: body.join("\n"),
        }
    }
}

/// Rename `from` to `to`; a missing `from` (never created, or already
/// rotated by another process) is not an error. Returns whether it moved.
fn rename_if_present(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::trace!(path = %from.display(), "nothing to rotate");
            Ok(false)
        }
        Err(e) => Err(Error::io(from, e)),
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn ctime(when: DateTime<Utc>) -> String {
    when.with_timezone(&Local)
        .format("%a %b %e %H:%M:%S %Y")
        .to_string()
}

/// Run a blocking hand-off without starving the tokio worker it lands on.
///
/// Records arrive from tracing events inside async tasks; on a multi-thread
/// runtime the worker's other tasks move elsewhere while `f` blocks.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
