//! Two-tier adapter error.
//!
//! A *soft* error is an expected, user-facing condition (bad link, nothing
//! to read) that the orchestrator surfaces as the source's content. A *hard*
//! error is an upstream fault (transport, HTTP status, malformed payload)
//! that becomes a failed source result.

use sourcerouter_shared::RouterError;

/// Which tier an [`AdapterError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Soft,
    Hard,
}

/// Error returned by [`SourceAdapter::fetch`](crate::SourceAdapter::fetch).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AdapterError {
    kind: ErrorKind,
    message: String,
}

impl AdapterError {
    pub fn soft(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Soft,
            message: message.into(),
        }
    }

    pub fn hard(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Hard,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_soft(&self) -> bool {
        self.kind == ErrorKind::Soft
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RouterError> for AdapterError {
    fn from(err: RouterError) -> Self {
        Self::hard(err.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::hard(format!("upstream request timed out: {err}"))
        } else {
            Self::hard(RouterError::Network(err.to_string()).to_string())
        }
    }
}

/// Convenience alias for adapter results.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
