//! Structured error taxonomy for the proxy pipeline.
//!
//! Every variant maps to exactly one of the error kinds in the design's
//! §7 taxonomy and carries enough context to render a response body
//! without a stack trace.

use thiserror::Error;

/// Errors that can occur while processing a chat-completion request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    ClientValidation(String),

    #[error("upstream provider returned a transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream provider rejected the request ({status}): {body}")]
    UpstreamPermanent { status: u16, body: String },

    #[error("circuit breaker '{name}' is open, retry after {retry_after_secs}s")]
    BreakerOpen { name: String, retry_after_secs: u64 },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Machine-readable error type, mirrored in the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ClientValidation(_) => "invalid_request_error",
            ProxyError::UpstreamTransient(_) => "upstream_transient_error",
            ProxyError::UpstreamPermanent { .. } => "upstream_error",
            ProxyError::BreakerOpen { .. } => "breaker_open_error",
            ProxyError::UnknownProvider(_) => "invalid_request_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Internal(format!("json error: {err}"))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProxyError::UpstreamTransient(err.to_string())
        } else {
            ProxyError::Internal(err.to_string())
        }
    }
}

impl From<sqlx::Error> for ProxyError {
    fn from(err: sqlx::Error) -> Self {
        ProxyError::Internal(format!("store error: {err}"))
    }
}

/// Failure reason from the output validator; always treated as `internal`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("system message lost during assembly")]
    SystemMessageLost,
    #[error("last message modified during assembly")]
    LastMessageModified,
}
