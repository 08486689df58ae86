use indexsync_core::config::ConfigError;
use indexsync_core::features::cache::CacheError;
use indexsync_core::features::locking::LockError;
use indexsync_storage::{ErrorKind, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Token registration failed for {repository_id}/{username}: {reason}")]
    Registration {
        repository_id: String,
        username: String,
        reason: String,
    },

    #[error("Failed to index {repository_id}/{object_id}: {reason}")]
    Document {
        repository_id: String,
        object_id: String,
        reason: String,
    },

    #[error("Lock acquisition interrupted: {0}")]
    LockInterrupted(#[from] LockError),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    #[error("A run is already active for repository {repository_id}")]
    ConcurrentRun { repository_id: String },

    #[error("Repository not configured: {0}")]
    UnknownRepository(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn document(
        repository_id: impl Into<String>,
        object_id: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Document {
            repository_id: repository_id.into(),
            object_id: object_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Transport(_) | OrchestratorError::ConcurrentRun { .. } => {
                ErrorCategory::Transient
            }
            OrchestratorError::Storage(e) => match e.kind {
                ErrorKind::Transport => ErrorCategory::Transient,
                ErrorKind::Database | ErrorKind::Index | ErrorKind::IO => {
                    ErrorCategory::Infrastructure
                }
                _ => ErrorCategory::Permanent,
            },
            OrchestratorError::CacheUnavailable(_) => ErrorCategory::Infrastructure,
            OrchestratorError::Other(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., rejected credentials, bad document)
    Permanent,
    /// Infrastructure error - alert ops (e.g., index or database down)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Transient,
            ErrorCategory::Permanent,
            ErrorCategory::Infrastructure,
        ] {
            let parsed = ErrorCategory::from_str(category.as_str()).unwrap();
            assert_eq!(*category, parsed);
        }
        assert!(ErrorCategory::from_str("invalid").is_err());
    }

    #[test]
    fn test_storage_errors_are_classified_by_kind() {
        let transient: OrchestratorError = StorageError::transport("reset").into();
        assert!(transient.is_transient());

        let infra: OrchestratorError = StorageError::index("disk full").into();
        assert_eq!(infra.category(), ErrorCategory::Infrastructure);

        let missing: OrchestratorError = StorageError::repository_not_found("r").into();
        assert_eq!(missing.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_concurrent_run_is_retryable() {
        let err = OrchestratorError::ConcurrentRun {
            repository_id: "r".into(),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("already active"));
    }
}
