//! Error types for the retry engine.
//!
//! Three layers, from the inside out:
//! - [`TokenError`]: why the bucket or the strategy refused to hand out a token.
//! - [`AttemptError`]: how one invocation of the caller's operation failed.
//! - [`RetryError`]: what [`Retryer::execute`](crate::retryer::Retryer::execute) returns.
//!
//! A rejected retry is never surfaced as its own error: once the strategy stops retrying, the
//! caller gets the operation's last failure back verbatim.
use crate::classifier::{ErrorCategory, ResponseMetadata};
use std::fmt;
use std::time::Duration;

/// Refusal to issue a retry token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The bucket lacks capacity and is in circuit-breaker mode.
    #[error("retry capacity exceeded (requested {requested}, available {available})")]
    CapacityExceeded { requested: u32, available: u32 },
    /// The retry policy set declined another attempt.
    #[error("retry rejected after attempt {attempt} ({category} error)")]
    RetryRejected { attempt: u32, category: ErrorCategory },
}

impl TokenError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    pub fn is_retry_rejected(&self) -> bool {
        matches!(self, Self::RetryRejected { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_capacity must be > 0")]
    ZeroMaxCapacity,
    #[error("jitter fraction must be within [0, 1] (got {0})")]
    JitterOutOfRange(f64),
    #[error("scale_factor must be a finite number > 1 (got {0})")]
    InvalidScaleFactor(f64),
    #[error("max_delay ({max:?}) must be >= initial_delay ({initial:?})")]
    MaxDelayBelowInitial { initial: Duration, max: Duration },
    #[error("max_attempts must be > 0")]
    ZeroMaxAttempts,
}

/// Failure of a single attempt of the caller's operation.
#[derive(Debug, Clone)]
pub enum AttemptError<E> {
    /// An HTTP-shaped failure. `response` is `None` when the exchange never produced a response
    /// (connection refused, reset before headers), which leaves it unclassifiable.
    Http { response: Option<ResponseMetadata>, source: E },
    /// A failure with no HTTP shape at all; never retried.
    Opaque(E),
}

impl<E> AttemptError<E> {
    /// HTTP failure that carries a response.
    pub fn http(response: ResponseMetadata, source: E) -> Self {
        Self::Http { response: Some(response), source }
    }

    /// HTTP failure where no response was received.
    pub fn no_response(source: E) -> Self {
        Self::Http { response: None, source }
    }

    pub fn opaque(source: E) -> Self {
        Self::Opaque(source)
    }

    pub fn response(&self) -> Option<&ResponseMetadata> {
        match self {
            Self::Http { response, .. } => response.as_ref(),
            Self::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn source_ref(&self) -> &E {
        match self {
            Self::Http { source, .. } | Self::Opaque(source) => source,
        }
    }

    pub fn into_source(self) -> E {
        match self {
            Self::Http { source, .. } | Self::Opaque(source) => source,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { response: Some(response), source } => {
                write!(f, "{} (HTTP {})", source, response.status.as_u16())
            }
            Self::Http { response: None, source } => write!(f, "{} (no response)", source),
            Self::Opaque(source) => write!(f, "{}", source),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source_ref())
    }
}

/// Terminal outcome of a retry sequence that did not succeed.
#[derive(Debug, Clone)]
pub enum RetryError<E> {
    /// The first token could not be acquired; the operation was never invoked.
    CapacityExceeded(TokenError),
    /// The operation's last failure, unchanged.
    Operation(AttemptError<E>),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded(e) => write!(f, "{}", e),
            Self::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CapacityExceeded(e) => Some(e),
            Self::Operation(e) => Some(e),
        }
    }
}

impl<E> From<AttemptError<E>> for RetryError<E> {
    fn from(e: AttemptError<E>) -> Self {
        Self::Operation(e)
    }
}

impl<E> RetryError<E> {
    /// Check if the retry budget refused the very first attempt.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded(_))
    }

    /// Borrow the operation's failure if there was one.
    pub fn as_operation(&self) -> Option<&AttemptError<E>> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CapacityExceeded(_) => None,
        }
    }

    pub fn into_operation(self) -> Option<AttemptError<E>> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CapacityExceeded(_) => None,
        }
    }

    /// Unwrap down to the caller's own error type, if the operation ever ran.
    pub fn into_source(self) -> Option<E> {
        self.into_operation().map(AttemptError::into_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{0}")]
    struct DummyError(&'static str);

    #[test]
    fn capacity_exceeded_display() {
        let err = TokenError::CapacityExceeded { requested: 5, available: 2 };
        let msg = err.to_string();
        assert!(msg.contains("capacity exceeded"));
        assert!(msg.contains('5') && msg.contains('2'));
        assert!(err.is_capacity_exceeded());
        assert!(!err.is_retry_rejected());
    }

    #[test]
    fn retry_rejected_display_names_category() {
        let err = TokenError::RetryRejected { attempt: 2, category: ErrorCategory::Client };
        assert!(err.to_string().contains("client"));
        assert!(err.is_retry_rejected());
    }

    #[test]
    fn attempt_error_display_includes_status() {
        let response = ResponseMetadata::new(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new());
        let err = AttemptError::http(response, DummyError("unavailable"));
        assert_eq!(err.to_string(), "unavailable (HTTP 503)");
        assert_eq!(err.response().map(|r| r.status), Some(StatusCode::SERVICE_UNAVAILABLE));

        let err = AttemptError::no_response(DummyError("reset"));
        assert_eq!(err.to_string(), "reset (no response)");
        assert!(err.response().is_none());
    }

    #[test]
    fn retry_error_exposes_operation_source() {
        let err: RetryError<DummyError> = AttemptError::opaque(DummyError("boom")).into();
        assert!(!err.is_capacity_exceeded());
        assert!(err.as_operation().is_some_and(AttemptError::is_opaque));
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
        assert_eq!(err.into_source(), Some(DummyError("boom")));
    }

    #[test]
    fn capacity_error_has_no_operation() {
        let denied = TokenError::CapacityExceeded { requested: 1, available: 0 };
        let err: RetryError<DummyError> = RetryError::CapacityExceeded(denied);
        assert!(err.is_capacity_exceeded());
        assert!(err.as_operation().is_none());
        assert!(err.into_source().is_none());
    }
}
