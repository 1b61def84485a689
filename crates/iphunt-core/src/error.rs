//! Error types for the hunt engine
//!
//! This module defines all error types used throughout the crate, and the
//! retry classification the account worker uses to pick a cooldown.

use thiserror::Error;

/// Result type alias for hunt operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the hunt engine
#[derive(Error, Debug)]
pub enum Error {
    /// Provider-side limit reached (too many addresses, request throttling)
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network or other transient provider failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A provider call did not answer within the call timeout. The call
    /// may still have taken effect on the provider side.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Target resource or attachment point does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Binding an address to an attachment point failed
    #[error("Bind failed: {0}")]
    Bind(String),

    /// Capture ledger errors
    #[error("Capture ledger error: {0}")]
    Ledger(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The licensing gate refused access
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The licensing gate or configuration source could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// How the account worker reacts to a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Provider throttling: long cooldown, logged at warning level
    Throttled,
    /// Network or timeout: short cooldown, logged at error level
    Transport,
    /// Not retryable, the worker stops
    Fatal,
}

impl Error {
    /// Create a quota exceeded error
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a bind error
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    /// Create a ledger error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an access denied error
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    /// Create a service unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error for the worker's retry policy
    ///
    /// Only a missing target or attachment point ends a worker. Anything
    /// else a provider call returns, malformed responses included, gets the
    /// short transport cooldown.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::QuotaExceeded(_) => RetryClass::Throttled,
            Error::NotFound(_) => RetryClass::Fatal,
            Error::Transport(_)
            | Error::Timeout(_)
            | Error::Bind(_)
            | Error::Provider { .. }
            | Error::Unavailable(_)
            | Error::Io(_)
            | Error::Other(_)
            | Error::Config(_)
            | Error::AccessDenied(_)
            | Error::Ledger(_)
            | Error::Json(_) => RetryClass::Transport,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_throttled_and_not_found_is_fatal() {
        assert_eq!(
            Error::quota_exceeded("limit 5").retry_class(),
            RetryClass::Throttled
        );
        assert_eq!(Error::transport("reset").retry_class(), RetryClass::Transport);
        assert_eq!(
            Error::timeout("allocate after 5s").retry_class(),
            RetryClass::Transport
        );
        assert_eq!(
            Error::provider("sim", "boom").retry_class(),
            RetryClass::Transport
        );
        assert_eq!(Error::not_found("vm-1").retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn malformed_and_rejected_responses_are_retried() {
        let json = serde_json::from_str::<u8>("x").unwrap_err();
        assert_eq!(Error::from(json).retry_class(), RetryClass::Transport);
        assert_eq!(
            Error::access_denied("token expired").retry_class(),
            RetryClass::Transport
        );
        assert_eq!(
            Error::config("bad region").retry_class(),
            RetryClass::Transport
        );
        assert_eq!(Error::ledger("disk full").retry_class(), RetryClass::Transport);
    }

    #[test]
    fn display_includes_provider_name() {
        let err = Error::provider("sim", "bad gateway");
        assert_eq!(err.to_string(), "Provider error (sim): bad gateway");
    }
}
