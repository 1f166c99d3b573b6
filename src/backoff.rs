//! Exponential backoff with multiplicative jitter.
//!
//! `backoff(attempt) = min(initial_delay × scale_factor^attempt, max_delay) × (1 − U[0, jitter])`
//!
//! Attempt semantics: attempt `0` is the first call of a retry sequence and still gets a (small)
//! delay; every retry increments the attempt by one. Attempts are `u32`, so a negative attempt is
//! unrepresentable. Products that overflow saturate to `max_delay`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use stormguard::{BackoffConfig, ExponentialBackoff, Jitter};
//!
//! let backoff = ExponentialBackoff::new(
//!     BackoffConfig::builder()
//!         .initial_delay(Duration::from_millis(10))
//!         .scale_factor(2.0)
//!         .max_delay(Duration::from_millis(100))
//!         .jitter(Jitter::none())
//!         .build()
//!         .unwrap(),
//! );
//! assert_eq!(backoff.backoff(0), Duration::from_millis(10));
//! assert_eq!(backoff.backoff(3), Duration::from_millis(80));
//! assert_eq!(backoff.backoff(9), Duration::from_millis(100)); // capped
//! ```

use crate::error::ConfigError;
use crate::jitter::Jitter;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20);
pub const DEFAULT_SCALE_FACTOR: f64 = 1.5;

/// Immutable backoff parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffConfig {
    initial_delay: Duration,
    jitter: Jitter,
    max_delay: Duration,
    scale_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            jitter: Jitter::full(),
            max_delay: DEFAULT_MAX_DELAY,
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

impl BackoffConfig {
    pub fn builder() -> BackoffConfigBuilder {
        BackoffConfigBuilder::default()
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(ConfigError::InvalidScaleFactor(self.scale_factor));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::MaxDelayBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }
}

/// Builder for [`BackoffConfig`]; starts from the defaults.
#[derive(Debug, Clone, Default)]
pub struct BackoffConfigBuilder {
    config: BackoffConfig,
}

impl BackoffConfigBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn scale_factor(mut self, factor: f64) -> Self {
        self.config.scale_factor = factor;
        self
    }

    /// Rejects `scale_factor <= 1` (or non-finite) and `max_delay < initial_delay`.
    pub fn build(self) -> Result<BackoffConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Anything that can turn an attempt index into a delay.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Jittered exponential backoff over a shared, immutable [`BackoffConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: Arc<BackoffConfig>,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before jitter: `min(initial × scale^attempt, max)`.
    pub fn unjittered(&self, attempt: u32) -> Duration {
        let max_nanos = self.config.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw =
            self.config.initial_delay.as_nanos() as f64 * self.config.scale_factor.powi(exponent);
        if !raw.is_finite() || raw >= max_nanos {
            return self.config.max_delay;
        }
        Duration::from_nanos(raw.round() as u64)
    }

    pub fn backoff_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.config.jitter.apply_with_rng(self.unjittered(attempt), rng)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn backoff(&self, attempt: u32) -> Duration {
        self.config.jitter.apply(self.unjittered(attempt))
    }
}

impl ExponentialBackoff {
    /// Inherent shorthand for [`BackoffStrategy::backoff`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        BackoffStrategy::backoff(self, attempt)
    }
}
