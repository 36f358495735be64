//! Built-in defaults for settings the configuration file may omit.

/// The default run-time configuration file.
pub const CONFIG_FILENAME: &str = "/etc/mirror/mirror.toml";

/// Where the rsync executable can be found.
pub const RSYNC: &str = "/usr/bin/rsync";

/// Where run-time advisory lock files are created.
pub const LOCK_DIRECTORY: &str = "/run/lock/mirror";

/// Prefix of the per-group rotation state files.
pub const LOG_STATE: &str = "/var/lib/mirror/log_state";

/// Prefix of the per-group summary log files.
pub const SUMMARY_FILENAME: &str = "/var/log/mirror/summary";

/// Mail submission program used to hand off summaries.
pub const SENDMAIL: &str = "/usr/sbin/sendmail";

pub const MAX_WORKERS: usize = 1;

pub const SUMMARY_GROUP: &str = "My Mirrors";

pub const SUMMARY_HISTORY_COUNT: usize = 3;

/// Seconds between summaries.
pub const SUMMARY_INTERVAL: u64 = 24 * 60 * 60;

/// Bytes of summary log that force an early summary.
pub const SUMMARY_SIZE: u64 = 20_000;

pub const SUMMARY_RECIPIENT: &str = "root";
