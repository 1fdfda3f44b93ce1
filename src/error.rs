//! Typed error kinds shared across the engine, plus the `anyhow`-friendly
//! wrapper the higher layers propagate with `?`.

use thiserror::Error;

/// Stable classification for a failure, independent of its message.
///
/// Call sites that need to decide *what to do next* (retry a job, fail a
/// batch outright, degrade gracefully) match on this instead of inspecting
/// error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input was invalid; never retried.
    InputInvalid,
    /// Upstream (LLM or photo host) returned a transient failure.
    Upstream503,
    /// Upstream rejected the payload itself (too large, content policy).
    UpstreamPayloadRejected,
    /// Response body could not be parsed as expected.
    Parse,
    /// Persisting to the store failed.
    StoreWrite,
    /// Required configuration (e.g. an LLM key) is missing.
    ConfigMissing,
    /// The operation was cancelled by the caller.
    Cancelled,
}

impl ErrorKind {
    /// Whether a job that failed with this kind is worth retrying.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Upstream503)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("upstream service unavailable: {0}")]
    Upstream503(String),

    #[error("upstream rejected payload: {0}")]
    UpstreamPayloadRejected(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("failed to write to store: {0}")]
    StoreWrite(String),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InputInvalid(_) => ErrorKind::InputInvalid,
            AppError::Upstream503(_) => ErrorKind::Upstream503,
            AppError::UpstreamPayloadRejected(_) => ErrorKind::UpstreamPayloadRejected,
            AppError::Parse(_) => ErrorKind::Parse,
            AppError::StoreWrite(_) => ErrorKind::StoreWrite,
            AppError::ConfigMissing(_) => ErrorKind::ConfigMissing,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Io(_) => ErrorKind::StoreWrite,
            AppError::Json(_) => ErrorKind::Parse,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_503_is_retryable() {
        let err = AppError::Upstream503("timeout".into());
        assert!(err.retryable());
    }

    #[test]
    fn input_invalid_is_not_retryable() {
        let err = AppError::InputInvalid("missing albumKey".into());
        assert!(!err.retryable());
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!AppError::Cancelled.retryable());
    }
}
