//! Error types for mirror-cli and their process exit statuses

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Configuration error (sysexits `EX_CONFIG`)
pub const EX_CONFIG: i32 = 78;
/// Operating system error, also used for interruption (sysexits `EX_OSERR`)
pub const EX_OSERR: i32 = 71;
/// Internal software error (sysexits `EX_SOFTWARE`)
pub const EX_SOFTWARE: i32 = 70;

/// Errors that end a CLI run
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from mirror-meta
    #[error("invalid configuration: {0}")]
    Config(#[from] mirror_meta::Error),

    /// Error from mirror-core
    #[error(transparent)]
    Core(#[from] mirror_core::Error),

    /// Error from mirror-summary
    #[error(transparent)]
    Summary(#[from] mirror_summary::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Some mirrors could not be attempted; the others still ran
    #[error("{count} mirror(s) could not be synchronized")]
    MirrorsFailed { count: usize },
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => EX_CONFIG,
            CliError::Core(mirror_core::Error::Meta(_)) => EX_CONFIG,
            CliError::Core(
                mirror_core::Error::Interrupted { .. }
                | mirror_core::Error::Spawn { .. }
                | mirror_core::Error::Fs(_),
            ) => EX_OSERR,
            CliError::MirrorsFailed { .. } => EX_OSERR,
            _ => EX_SOFTWARE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_ex_config() {
        let err = CliError::from(mirror_meta::Error::MissingMirror {
            name: "ghost".to_string(),
        });
        assert_eq!(err.exit_code(), EX_CONFIG);
        assert!(err.to_string().starts_with("invalid configuration"));
    }

    #[test]
    fn interruption_maps_to_ex_oserr() {
        let err = CliError::from(mirror_core::Error::Interrupted {
            cause: "SIGINT".to_string(),
        });
        assert_eq!(err.exit_code(), EX_OSERR);
    }

    #[test]
    fn failed_mirrors_map_to_ex_oserr() {
        assert_eq!(CliError::MirrorsFailed { count: 2 }.exit_code(), EX_OSERR);
    }

    #[test]
    fn anything_else_is_ex_software() {
        let err = CliError::from(std::io::Error::other("boom"));
        assert_eq!(err.exit_code(), EX_SOFTWARE);
    }
}
