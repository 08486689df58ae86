//! Error types for the cache layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend could not be reached. Callers degrade to pass-through.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
