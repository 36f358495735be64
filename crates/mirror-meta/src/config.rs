//! Configuration types and loading for Mirror Manager
//!
//! The configuration file is TOML with four kinds of section:
//!
//! ```toml
//! [defaults]
//! rsync_options = ["-a", "--delete"]
//! max_workers = 2
//!
//! [summary]
//! group = "My Mirrors"
//! recipients = ["root"]
//!
//! [mirrors]
//! enabled = ["fedora"]
//!
//! [mirror.fedora]
//! source = "rsync://mirror.example.org/fedora"
//! target = "/srv/mirror/fedora"
//! exclude = ["*.iso"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Settings shared by every mirror and by the orchestrator itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// The external synchronisation tool
    pub rsync: PathBuf,
    /// Options passed to the tool ahead of any per-mirror arguments
    pub rsync_options: Vec<String>,
    /// Upper bound on simultaneously running workers
    pub max_workers: usize,
    pub lock_directory: PathBuf,
    pub log_state: PathBuf,
    pub summary_file: PathBuf,
    /// `HOST:PORT` of an rsync proxy, if one is required
    pub proxy: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            rsync: PathBuf::from(defaults::RSYNC),
            rsync_options: Vec::new(),
            max_workers: defaults::MAX_WORKERS,
            lock_directory: PathBuf::from(defaults::LOCK_DIRECTORY),
            log_state: PathBuf::from(defaults::LOG_STATE),
            summary_file: PathBuf::from(defaults::SUMMARY_FILENAME),
            proxy: None,
        }
    }
}

/// Operations summary settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Display name of the summary group
    pub group: String,
    /// Seconds between periodic summaries
    pub interval: u64,
    /// Bytes of logged content that trigger an early summary
    pub size: u64,
    /// Number of rotated summaries to keep
    pub history_count: usize,
    pub recipients: Vec<String>,
    pub sendmail: PathBuf,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            group: defaults::SUMMARY_GROUP.to_string(),
            interval: defaults::SUMMARY_INTERVAL,
            size: defaults::SUMMARY_SIZE,
            history_count: defaults::SUMMARY_HISTORY_COUNT,
            recipients: vec![defaults::SUMMARY_RECIPIENT.to_string()],
            sendmail: PathBuf::from(defaults::SENDMAIL),
        }
    }
}

impl SummaryConfig {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// The `[mirrors]` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MirrorsConfig {
    /// Names of the mirrors to process, in processing order
    #[serde(default)]
    pub enabled: Vec<String>,
}

/// One `[mirror.<name>]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub source: String,
    pub target: String,
    /// Include patterns, in the order the tool should apply them
    #[serde(default)]
    pub include: Vec<String>,
    /// Exclude patterns, in the order the tool should apply them
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// The complete, validated configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub mirrors: MirrorsConfig,
    #[serde(default)]
    pub mirror: BTreeMap<String, MirrorConfig>,
}

impl Config {
    /// Load and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigNotFound`] if the file does not exist,
    /// [`Error::InvalidConfig`] if it is not valid TOML for this schema, and
    /// the validation errors of [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = mirror_fs::io::read_optional(path)?.ok_or_else(|| Error::ConfigNotFound {
            path: path.to_path_buf(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), mirrors = ?config.mirrors.enabled, "configuration loaded");
        Ok(config)
    }

    /// Check the settings every run depends on.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.max_workers == 0 {
            return Err(invalid("defaults.max_workers", "must be at least 1"));
        }
        if self.summary.interval == 0 {
            return Err(invalid("summary.interval", "must be greater than zero"));
        }
        if self.summary.size == 0 {
            return Err(invalid("summary.size", "must be greater than zero"));
        }
        if self.summary.history_count == 0 {
            return Err(invalid("summary.history_count", "must be at least 1"));
        }
        if self.summary.group.trim().is_empty() {
            return Err(invalid("summary.group", "must not be blank"));
        }
        for name in &self.mirrors.enabled {
            if !is_plain_name(name) {
                return Err(invalid(
                    "mirrors.enabled",
                    &format!("'{}' is not a plain mirror name; it also names the lock file", name),
                ));
            }
            let mirror = self.mirror.get(name).ok_or_else(|| Error::MissingMirror {
                name: name.clone(),
            })?;
            if mirror.source.trim().is_empty() {
                return Err(invalid(&format!("mirror.{}.source", name), "must not be blank"));
            }
            if mirror.target.trim().is_empty() {
                return Err(invalid(&format!("mirror.{}.target", name), "must not be blank"));
            }
        }
        Ok(())
    }

    /// The enabled mirrors with their sections, in configured order.
    pub fn enabled_mirrors(&self) -> Result<Vec<(&str, &MirrorConfig)>> {
        self.mirrors
            .enabled
            .iter()
            .map(|name| {
                self.mirror
                    .get(name)
                    .map(|m| (name.as_str(), m))
                    .ok_or_else(|| Error::MissingMirror { name: name.clone() })
            })
            .collect()
    }
}

/// A name usable as a single file name inside the lock directory.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

fn invalid(key: &str, message: &str) -> Error {
    Error::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_defaults() {
        let summary = SummaryConfig::default();
        assert_eq!(summary.group, "My Mirrors");
        assert_eq!(summary.history_count, 3);
        assert_eq!(summary.interval, 86_400);
        assert_eq!(summary.size, 20_000);
        assert_eq!(summary.recipients, vec!["root".to_string()]);
    }

    #[test]
    fn test_defaults_section_defaults() {
        let defaults = DefaultsConfig::default();
        assert_eq!(defaults.max_workers, 1);
        assert_eq!(defaults.rsync, PathBuf::from("/usr/bin/rsync"));
        assert!(defaults.rsync_options.is_empty());
        assert!(defaults.proxy.is_none());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert!(config.enabled_mirrors().unwrap().is_empty());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config: Config = toml::from_str("[defaults]\nmax_workers = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "defaults.max_workers"));
    }

    #[test]
    fn test_enabled_without_section_rejected() {
        let config: Config = toml::from_str("[mirrors]\nenabled = [\"ghost\"]\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::MissingMirror { ref name } if name == "ghost"));
    }

    #[test]
    fn test_interval_duration() {
        let summary = SummaryConfig {
            interval: 3600,
            ..SummaryConfig::default()
        };
        assert_eq!(summary.interval_duration(), Duration::from_secs(3600));
    }
}
