//! Error types for mirror-meta

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Filesystem error: {0}")]
    Fs(#[from] mirror_fs::Error),

    #[error("Configuration not found at {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration at {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Mirror '{name}' is enabled but has no [mirror.{name}] section")]
    MissingMirror { name: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
