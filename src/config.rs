//! Aggregate configuration and presets.
//!
//! [`RetryConfig`] gathers every knob of the engine with its documented default:
//!
//! | setting                     | default |
//! |-----------------------------|---------|
//! | bucket initial cost         | 0       |
//! | bucket success increment    | 1       |
//! | bucket max capacity         | 500     |
//! | standard retry cost         | 5       |
//! | timeout retry cost          | 10      |
//! | refill rate (per second)    | 10      |
//! | circuit breaker             | on      |
//! | backoff initial delay       | 10 ms   |
//! | jitter fraction             | 1.0     |
//! | max backoff                 | 20 s    |
//! | scale factor                | 1.5     |
//! | max attempts                | 3       |
//!
//! Configuration is programmatic; with the `serde` feature the structs can be deserialized from
//! whatever format the application already uses.

use crate::backoff::BackoffConfig;
use crate::bucket::BucketConfig;
use crate::error::ConfigError;
use crate::policy::DEFAULT_MAX_ATTEMPTS;
use crate::registry::PartitionScope;

/// Large enough that an unthrottled bucket is never the limiting factor.
const UNTHROTTLED_CAPACITY: u32 = u32::MAX;

/// Everything a [`Retryer`](crate::retryer::Retryer) needs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    pub bucket: BucketConfig,
    pub backoff: BackoffConfig,
    pub max_attempts: u32,
    pub scope: PartitionScope,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryConfig {
    /// Documented defaults, one bucket per partition.
    pub fn standard() -> Self {
        Self {
            bucket: BucketConfig::default(),
            backoff: BackoffConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scope: PartitionScope::PerPartition,
        }
    }

    /// Budget that never refills with time: only successes restore capacity.
    pub fn circuit_breaker_only() -> Self {
        Self { bucket: BucketConfig::default().with_refill_rate(0), ..Self::standard() }
    }

    /// Backoff and attempt limits without a retry budget.
    pub fn unthrottled() -> Self {
        let bucket = BucketConfig::default()
            .with_initial_cost(0)
            .with_standard_retry_cost(0)
            .with_timeout_retry_cost(0)
            .with_max_capacity(UNTHROTTLED_CAPACITY)
            .unwrap_or_default();
        Self { bucket, ..Self::standard() }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_scope(mut self, scope: PartitionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_bucket(mut self, bucket: BucketConfig) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Checks what the individual builders cannot see on their own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.bucket.max_capacity() == 0 {
            return Err(ConfigError::ZeroMaxCapacity);
        }
        BackoffConfig::builder()
            .initial_delay(self.backoff.initial_delay())
            .max_delay(self.backoff.max_delay())
            .scale_factor(self.backoff.scale_factor())
            .jitter(self.backoff.jitter())
            .build()
            .map(|_| ())
    }
}
