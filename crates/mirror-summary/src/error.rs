//! Error types for mirror-summary

use std::path::PathBuf;

/// Result type for mirror-summary operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rotating or persisting summary state
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem error from mirror-fs
    #[error(transparent)]
    Fs(#[from] mirror_fs::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted rotation state could not be understood
    #[error("Corrupt rotation state at {path}: {message}")]
    StateParse { path: PathBuf, message: String },

    #[error("Failed to serialize rotation state: {0}")]
    StateSerialize(#[from] toml::ser::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
