//! # Errors
//!
//! Typed errors for contract violations. Everything else in the engine
//! degrades into the returned state instead of failing the run.

use thiserror::Error;

/// Integrity failures of the versioned state store.
///
/// These are programming-contract violations: they fail the calling
/// operation loudly, never the process.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no state versions have been saved yet")]
    Empty,

    #[error("state version {version} not found (latest is {latest:?})")]
    VersionNotFound { version: u64, latest: Option<u64> },

    #[error("saved state versions are immutable: {0}")]
    ImmutableVersion(String),

    #[error("state store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("state store backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Map a backend failure, turning the immutability trigger's abort into
    /// [`StoreError::ImmutableVersion`].
    pub(crate) fn from_backend(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(message))
                if message.contains("immutable") =>
            {
                StoreError::ImmutableVersion(message.clone())
            }
            _ => StoreError::Backend(err),
        }
    }
}

/// Invalid configuration values read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_found_message() {
        let err = StoreError::VersionNotFound {
            version: 7,
            latest: Some(3),
        };
        assert_eq!(
            err.to_string(),
            "state version 7 not found (latest is Some(3))"
        );
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::InvalidValue {
            key: "MAX_REFINEMENT_ITERATIONS".into(),
            value: "many".into(),
            reason: "expected an unsigned integer".into(),
        };
        assert!(err.to_string().contains("MAX_REFINEMENT_ITERATIONS"));
        assert!(err.to_string().contains("many"));
    }
}
