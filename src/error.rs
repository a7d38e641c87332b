//! Crate-level error type.

use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum Error {
    /// Action invoked on a task that is not in the current merged view.
    #[error("Task {0} not found")]
    TaskNotFound(i64),

    /// A second change on a task whose previous one has not settled.
    #[error("Task {0} already has a change in flight")]
    MutationPending(i64),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
