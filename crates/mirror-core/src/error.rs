//! Error types for mirror-core

use std::path::PathBuf;

/// Result type for mirror-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating mirror runs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The external tool could not be started
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was cut short by a termination signal or an explicit
    /// cancellation request
    #[error("interrupted by {cause}")]
    Interrupted { cause: String },

    /// A worker task ended without reporting an outcome
    #[error("worker for {mirror} did not finish: {message}")]
    WorkerLost { mirror: String, message: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from mirror-fs, including lock directory failures
    #[error(transparent)]
    Fs(#[from] mirror_fs::Error),

    /// Configuration error from mirror-meta
    #[error(transparent)]
    Meta(#[from] mirror_meta::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to a single job rather than the whole run.
    pub fn is_job_local(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. } | Error::Fs(_) | Error::WorkerLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_names_the_program() {
        let err = Error::Spawn {
            program: PathBuf::from("/usr/bin/rsync"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/usr/bin/rsync"));
        assert!(err.is_job_local());
    }

    #[test]
    fn interruption_is_not_job_local() {
        let err = Error::Interrupted {
            cause: "SIGTERM".to_string(),
        };
        assert_eq!(err.to_string(), "interrupted by SIGTERM");
        assert!(!err.is_job_local());
    }
}
