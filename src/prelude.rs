//! Convenient re-exports for common Stormguard types.
pub use crate::{
    backoff::{BackoffConfig, BackoffStrategy, ExponentialBackoff},
    bucket::{BucketConfig, RetryToken, TokenBucket},
    classifier::{ClassifiedError, ErrorCategory, ErrorClassifier, ResponseMetadata},
    config::RetryConfig,
    error::{AttemptError, RetryError, TokenError},
    jitter::Jitter,
    policy::{PolicySet, RetryPolicy},
    registry::PartitionScope,
    retryer::{AttemptContext, RetryLayer, Retryer},
    strategy::{RetryStrategy, StandardRetryStrategy},
};
