//! Error types for session-feedback.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::model::job::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("circuit breaker open (retry after {retry_after:?})")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("source file unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed provider output: {0}")]
    MalformedOutput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

impl Error {
    /// Recover an owned error from one shared between coalesced callers.
    pub fn from_shared(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(|shared| shared.duplicate())
    }

    fn duplicate(&self) -> Self {
        match self {
            Self::NotFound(s) => Self::NotFound(s.clone()),
            Self::InvalidTransition { from, to } => Self::InvalidTransition {
                from: *from,
                to: *to,
            },
            Self::Timeout(d) => Self::Timeout(*d),
            Self::Provider { provider, message } => Self::Provider {
                provider: provider.clone(),
                message: message.clone(),
            },
            Self::Unauthorized(s) => Self::Unauthorized(s.clone()),
            Self::QuotaExhausted(s) => Self::QuotaExhausted(s.clone()),
            Self::CircuitOpen { retry_after } => Self::CircuitOpen {
                retry_after: *retry_after,
            },
            Self::SourceUnavailable(s) => Self::SourceUnavailable(s.clone()),
            Self::MalformedOutput(s) => Self::MalformedOutput(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::Other(format!("json error: {e}")),
            Self::Other(s) => Self::Other(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
