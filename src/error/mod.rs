use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Closed set of failure kinds produced by the layer or attached to
/// wrapped upstream errors. Retry decisions classify by kind first and
/// fall back to message matching only for opaque third-party errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Per-attempt deadline elapsed
    Timeout,
    /// Connection reset, refused or dropped
    Connection,
    /// Upstream rejected the call due to rate limiting
    RateLimited,
    /// Upstream temporarily unavailable (503, overloaded)
    Unavailable,
    /// Response failed structural or caller-supplied validation
    Validation,
    /// Call was short-circuited by an open breaker
    CircuitOpen,
    /// Anything we could not classify
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Unavailable => write!(f, "unavailable"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::CircuitOpen => write!(f, "circuit_open"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

impl ErrorKind {
    /// Classify an opaque error message by well-known substrings and
    /// status markers. Case-insensitive.
    pub fn classify(message: &str) -> ErrorKind {
        let msg = message.to_lowercase();

        if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline") {
            ErrorKind::Timeout
        } else if msg.contains("econnreset")
            || msg.contains("econnrefused")
            || msg.contains("connection reset")
            || msg.contains("connection refused")
            || msg.contains("broken pipe")
        {
            ErrorKind::Connection
        } else if msg.contains("429")
            || msg.contains("rate limit")
            || msg.contains("too many requests")
        {
            ErrorKind::RateLimited
        } else if msg.contains("502")
            || msg.contains("503")
            || msg.contains("unavailable")
            || msg.contains("overloaded")
            || msg.contains("bad gateway")
        {
            ErrorKind::Unavailable
        } else {
            ErrorKind::Other
        }
    }

    /// Whether this kind is transient and worth retrying by default
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Connection
                | ErrorKind::RateLimited
                | ErrorKind::Unavailable
        )
    }
}

/// Resilience layer error types
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream error ({kind}): {message}")]
    Upstream { kind: ErrorKind, message: String },

    #[error("Operation cancelled by caller")]
    Cancelled,
}

impl ResilienceError {
    /// Wrap an upstream failure with an explicit kind
    pub fn upstream(kind: ErrorKind, message: impl Into<String>) -> Self {
        ResilienceError::Upstream {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an opaque upstream failure, classifying by message content
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        ResilienceError::Upstream {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    /// The kind of this error, used for retry classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::Timeout { .. } => ErrorKind::Timeout,
            ResilienceError::Validation(_) => ErrorKind::Validation,
            ResilienceError::Upstream { kind, .. } => *kind,
            ResilienceError::Cancelled => ErrorKind::Other,
        }
    }

    /// Whether this error was produced by an open breaker short-circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}
