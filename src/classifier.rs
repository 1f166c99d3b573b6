//! Error classification for HTTP-shaped failures.
//!
//! Maps a response to one of four [`ErrorCategory`] values and pulls out any delay the server
//! asked for. Classification is a pure lookup; what to *do* with a category is decided by the
//! policy set.

use http::header::{HeaderMap, HeaderName, RETRY_AFTER};
use http::StatusCode;
use std::fmt;
use std::time::Duration;

/// Non-standard header carrying a retry delay in whole milliseconds.
pub const X_AMZ_RETRY_AFTER: HeaderName = HeaderName::from_static("x-amz-retry-after");

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorCategory {
    /// Connection-level or gateway hiccup (500, 502, 503, 504).
    Transient,
    /// The server explicitly asked us to slow down (429).
    Throttling,
    /// Any other 5xx.
    Server,
    /// Everything else.
    Client,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 4] =
        [Self::Transient, Self::Throttling, Self::Server, Self::Client];

    /// Transient and throttling failures are retried by the standard policy set.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, Self::Transient | Self::Throttling)
    }

    /// Categories that cost `timeout_retry_cost` instead of `standard_retry_cost` to retry.
    pub fn is_timeout_like(self) -> bool {
        matches!(self, Self::Transient | Self::Throttling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Throttling => "throttling",
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status line and headers of a failed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseMetadata {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// Metadata with a status and no headers.
    pub fn status(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new() }
    }
}

impl<B> From<&http::Response<B>> for ResponseMetadata {
    fn from(response: &http::Response<B>) -> Self {
        Self { status: response.status(), headers: response.headers().clone() }
    }
}

/// Outcome of classifying one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    /// Delay the server asked for, if any.
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory) -> Self {
        Self { category, retry_after: None }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// Turns response metadata into a classification.
///
/// Returning `None` means "cannot tell"; the retryer propagates the original error without any
/// retry accounting.
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, response: Option<&ResponseMetadata>) -> Option<ClassifiedError>;
}

/// Status-code classifier:
///
/// | status                  | category     |
/// |-------------------------|--------------|
/// | 429                     | `Throttling` |
/// | 500, 502, 503, 504      | `Transient`  |
/// | other 5xx               | `Server`     |
/// | anything else           | `Client`     |
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusClassifier;

impl HttpStatusClassifier {
    pub fn category_for(status: StatusCode) -> ErrorCategory {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ErrorCategory::Throttling,
            StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => ErrorCategory::Transient,
            status if status.is_server_error() => ErrorCategory::Server,
            _ => ErrorCategory::Client,
        }
    }
}

impl ErrorClassifier for HttpStatusClassifier {
    fn classify(&self, response: Option<&ResponseMetadata>) -> Option<ClassifiedError> {
        let response = response?;
        Some(ClassifiedError {
            category: Self::category_for(response.status),
            retry_after: retry_after(&response.headers),
        })
    }
}

/// Server-requested delay. `x-amz-retry-after` (milliseconds) wins over `Retry-After`
/// (delta-seconds). HTTP-date forms and malformed values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let millis = headers
        .get(X_AMZ_RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis);
    if millis.is_some() {
        return millis;
    }

    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
