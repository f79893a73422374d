//! Error types for weft

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The networked extraction/search backend was unreachable or answered
    /// with a server error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A capability (reasoning provider, embedding model) is not configured
    /// for the scope.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Graph store read or write failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Data inconsistency, e.g. a duplicate chain cycle or a missing entity
    /// during a merge.
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
