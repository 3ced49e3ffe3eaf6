use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the client runtime.
///
/// Every failing operation signals through one of these variants. The three
/// domain variants ([`Error::Api`], [`Error::RateLimited`], [`Error::Auth`])
/// form the classification surface callers are expected to match on; the
/// remaining variants carry ambient failures (transport, filesystem,
/// serialization) that either retry locally or get wrapped into
/// [`Error::Api`] once retries are exhausted.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic API failure: unexpected status codes and exhausted retries.
    #[error("API error: {message}{}", format_status(.status))]
    Api {
        message: String,
        status: Option<u16>,
        body: Option<serde_json::Value>,
    },

    /// HTTP 429. `retry_after_secs` comes from the `Retry-After` header,
    /// defaulting to 60 when absent or malformed.
    #[error("rate limit exceeded: {message} (retry after {retry_after_secs}s)")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
        status: Option<u16>,
        body: Option<serde_json::Value>,
    },

    /// HTTP 401/403 or a token acquisition failure.
    #[error("authentication error: {message}{}", format_status(.status))]
    Auth {
        message: String,
        status: Option<u16>,
        body: Option<serde_json::Value>,
    },

    /// A local file required for an upload does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Webhook payload failed validation (bad signature, missing event type).
    #[error("validation error: {0}")]
    Validation(String),

    /// Network-level failure (connect, timeout, body read). Retryable.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local I/O failure while streaming to disk. Retryable.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status: {s})"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a generic API error without status or body.
    pub fn api(message: impl Into<String>) -> Self {
        Error::Api {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Shorthand for an auth error without status or body.
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. }
            | Error::RateLimited { status, .. }
            | Error::Auth { status, .. } => *status,
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response body attached to this error, if any.
    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            Error::Api { body, .. }
            | Error::RateLimited { body, .. }
            | Error::Auth { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Whether the failure is transient and eligible for automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }

    /// Whether the failure already carries a domain classification.
    /// Classified errors are never re-wrapped and never auto-retried by
    /// the backoff engine.
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            Error::Api { .. } | Error::RateLimited { .. } | Error::Auth { .. }
        )
    }

    /// Wrap an unclassified error into [`Error::Api`] after retry
    /// exhaustion. Classified errors pass through unchanged.
    pub(crate) fn into_api(self) -> Self {
        if self.is_classified() {
            return self;
        }
        let status = self.status();
        Error::Api {
            message: format!("request failed: {self}"),
            status,
            body: None,
        }
    }
}
