//! Error types for indexsync-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (cursor store)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Repository unknown to the backend
    RepositoryNotFound,
    /// Content object does not exist (or no longer exists)
    ObjectNotFound,
    /// Object id already taken
    ObjectExists,
    /// Network failure talking to a remote collaborator; worth retrying
    Transport,
    /// Credentials or token refused by the remote side
    Unauthorized,
    /// Search engine failure
    Index,
    /// The search engine refused one document
    Rejected,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::RepositoryNotFound => "repository_not_found",
            ErrorKind::ObjectNotFound => "object_not_found",
            ErrorKind::ObjectExists => "object_exists",
            ErrorKind::Transport => "transport",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Index => "index",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of a storage port, tagged with the kind callers branch on.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn repository_not_found(repo_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RepositoryNotFound,
            format!("Repository not found: {}", repo_id.into()),
        )
    }

    pub fn object_not_found(repo_id: &str, object_id: &str) -> Self {
        Self::new(
            ErrorKind::ObjectNotFound,
            format!("Object not found: {}/{}", repo_id, object_id),
        )
    }

    pub fn object_exists(repo_id: &str, object_id: &str) -> Self {
        Self::new(
            ErrorKind::ObjectExists,
            format!("Object already exists: {}/{}", repo_id, object_id),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("cursor store: {}", err)).with_source(err)
    }
}

#[cfg(feature = "tantivy")]
impl From<tantivy::TantivyError> for StorageError {
    fn from(err: tantivy::TantivyError) -> Self {
        StorageError::index(format!("search index: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("stored document: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, err.to_string()).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
