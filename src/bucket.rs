//! Token bucket that budgets retries.
//!
//! Every attempt of a retry sequence claims capacity from a bucket: the first attempt pays
//! `initial_cost`, each retry pays `standard_retry_cost` (or `timeout_retry_cost` for transient
//! and throttling failures), and a successful attempt credits its token's cost back. Capacity
//! refills at `refill_rate` units per second, truncated toward zero, up to `max_capacity`.
//!
//! When a deduction does not fit:
//! - circuit-breaker mode fails immediately with [`TokenError::CapacityExceeded`];
//! - otherwise the caller waits `ceil(deficit / refill_rate)` seconds, capacity is zeroed and the
//!   token is granted after the wait without re-checking capacity.
//!
//! A refill rate of zero always implies circuit-breaker mode; every way of installing a config
//! enforces that.
//!
//! Example
//! ```rust
//! use stormguard::{BucketConfig, ErrorCategory, TokenBucket};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = BucketConfig::default()
//!     .with_max_capacity(10)
//!     .unwrap()
//!     .with_initial_cost(5)
//!     .with_refill_rate(0);
//! let bucket = TokenBucket::new(config);
//!
//! let token = bucket.acquire_initial().await.unwrap();
//! assert_eq!(bucket.capacity(), 5);
//! bucket.release(&token);
//! assert_eq!(bucket.capacity(), 6);
//!
//! let retry = bucket.acquire_refresh(&token, ErrorCategory::Server).await.unwrap();
//! assert_eq!(retry.attempt(), 1);
//! assert_eq!(bucket.capacity(), 1);
//! # });
//! ```

use crate::classifier::ErrorCategory;
use crate::clock::{Clock, MonotonicClock};
use crate::dynamic::DynamicConfig;
use crate::error::{ConfigError, TokenError};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const DEFAULT_INITIAL_COST: u32 = 0;
pub const DEFAULT_INITIAL_SUCCESS_INCREMENT: u32 = 1;
pub const DEFAULT_MAX_CAPACITY: u32 = 500;
pub const DEFAULT_STANDARD_RETRY_COST: u32 = 5;
pub const DEFAULT_TIMEOUT_RETRY_COST: u32 = 10;
pub const DEFAULT_REFILL_RATE: u32 = 10;

/// One attempt's claim on bucket capacity.
///
/// Tokens are values: acquiring or refreshing always yields a new token, and the attempt counter
/// grows by exactly one per refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryToken {
    attempt: u32,
    cost: Option<u32>,
}

impl RetryToken {
    pub fn new(attempt: u32, cost: Option<u32>) -> Self {
        Self { attempt, cost }
    }

    /// Zero-based attempt index.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Capacity credited back when this attempt succeeds.
    pub fn cost(&self) -> Option<u32> {
        self.cost
    }
}

/// Bucket parameters. Use the `with_*` methods to derive variants; they keep the
/// "no refill implies circuit breaker" invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BucketConfig {
    initial_cost: u32,
    initial_success_increment: u32,
    max_capacity: u32,
    standard_retry_cost: u32,
    timeout_retry_cost: u32,
    refill_rate: u32,
    circuit_breaker: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            initial_cost: DEFAULT_INITIAL_COST,
            initial_success_increment: DEFAULT_INITIAL_SUCCESS_INCREMENT,
            max_capacity: DEFAULT_MAX_CAPACITY,
            standard_retry_cost: DEFAULT_STANDARD_RETRY_COST,
            timeout_retry_cost: DEFAULT_TIMEOUT_RETRY_COST,
            refill_rate: DEFAULT_REFILL_RATE,
            circuit_breaker: true,
        }
    }
}

impl BucketConfig {
    pub fn with_initial_cost(mut self, cost: u32) -> Self {
        self.initial_cost = cost;
        self
    }

    pub fn with_initial_success_increment(mut self, increment: u32) -> Self {
        self.initial_success_increment = increment;
        self
    }

    pub fn with_max_capacity(mut self, max: u32) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::ZeroMaxCapacity);
        }
        self.max_capacity = max;
        Ok(self)
    }

    pub fn with_standard_retry_cost(mut self, cost: u32) -> Self {
        self.standard_retry_cost = cost;
        self
    }

    pub fn with_timeout_retry_cost(mut self, cost: u32) -> Self {
        self.timeout_retry_cost = cost;
        self
    }

    /// Setting the rate to zero switches circuit-breaker mode on.
    pub fn with_refill_rate(mut self, per_second: u32) -> Self {
        self.refill_rate = per_second;
        self.normalized()
    }

    /// Turning circuit breaking off has no effect while the refill rate is zero.
    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = enabled;
        self.normalized()
    }

    pub fn initial_cost(&self) -> u32 {
        self.initial_cost
    }

    pub fn initial_success_increment(&self) -> u32 {
        self.initial_success_increment
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub fn standard_retry_cost(&self) -> u32 {
        self.standard_retry_cost
    }

    pub fn timeout_retry_cost(&self) -> u32 {
        self.timeout_retry_cost
    }

    pub fn refill_rate(&self) -> u32 {
        self.refill_rate
    }

    pub fn circuit_breaker(&self) -> bool {
        self.circuit_breaker
    }

    /// Cost of retrying after a failure of `category`.
    pub fn retry_cost(&self, category: ErrorCategory) -> u32 {
        if category.is_timeout_like() {
            self.timeout_retry_cost
        } else {
            self.standard_retry_cost
        }
    }

    // Configs can also arrive through serde, so the bucket re-applies this on install.
    fn normalized(mut self) -> Self {
        if self.refill_rate == 0 {
            self.circuit_breaker = true;
        }
        self.max_capacity = self.max_capacity.max(1);
        self
    }
}

#[derive(Debug)]
struct BucketState {
    capacity: u32,
    last_refill_millis: u64,
}

impl BucketState {
    fn refill(&mut self, config: &BucketConfig, now_millis: u64) {
        let elapsed = now_millis.saturating_sub(self.last_refill_millis);
        let added = u64::from(config.refill_rate).saturating_mul(elapsed) / 1000;
        let refilled = u64::from(self.capacity).saturating_add(added);
        let capped = refilled.min(u64::from(config.max_capacity));
        trace!(
            target: "stormguard::bucket",
            elapsed_ms = elapsed,
            added,
            capacity = capped,
            "refill"
        );
        self.capacity = capped as u32;
        self.last_refill_millis = now_millis;
    }
}

/// Outcome of a deduction, with the config it was checked against.
struct Grant {
    size: u32,
    delay: Option<Duration>,
    config: Arc<BucketConfig>,
}

/// Shared retry budget. All methods take `&self`; wrap in `Arc` to share across tasks.
#[derive(Debug)]
pub struct TokenBucket {
    config: DynamicConfig<BucketConfig>,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(BucketConfig::default())
    }
}

impl TokenBucket {
    /// Create a full bucket using the monotonic clock and tokio's timer.
    pub fn new(config: BucketConfig) -> Self {
        Self::with_parts(config, Arc::new(MonotonicClock::default()), Arc::new(TokioSleeper))
    }

    pub(crate) fn with_parts(
        config: BucketConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let config = config.normalized();
        let state =
            BucketState { capacity: config.max_capacity, last_refill_millis: clock.now_millis() };
        Self { config: DynamicConfig::new(config), state: Mutex::new(state), clock, sleeper }
    }

    /// Override the clock (useful for deterministic tests). Restarts the refill mark.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        let now = clock.now_millis();
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner).last_refill_millis = now;
        self.clock = Arc::new(clock);
        self
    }

    /// Override how capacity waits are slept.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Claim capacity for the first attempt of a sequence.
    pub async fn acquire_initial(&self) -> Result<RetryToken, TokenError> {
        let grant = self.deduct(|config| config.initial_cost)?;
        if let Some(delay) = grant.delay {
            self.sleeper.sleep(delay).await;
        }
        Ok(RetryToken { attempt: 0, cost: Some(grant.config.initial_success_increment) })
    }

    /// Claim capacity for the attempt after `previous` failed with `category`.
    pub async fn acquire_refresh(
        &self,
        previous: &RetryToken,
        category: ErrorCategory,
    ) -> Result<RetryToken, TokenError> {
        let grant = self.deduct(|config| config.retry_cost(category))?;
        let attempt = previous.attempt.saturating_add(1);
        let cost = match grant.delay {
            None => Some(grant.size),
            Some(delay) => {
                self.sleeper.sleep(delay).await;
                // Nothing was reserved for this token, so nothing is refunded on success.
                None
            }
        };
        Ok(RetryToken { attempt, cost })
    }

    /// Credit a token's cost back, capped at the maximum capacity.
    pub fn release(&self, token: &RetryToken) {
        let Some(cost) = token.cost else {
            return;
        };
        let mut state = self.lock_state();
        let config = self.config.get();
        state.refill(&config, self.clock.now_millis());
        state.capacity = state.capacity.saturating_add(cost).min(config.max_capacity);
        debug!(
            target: "stormguard::bucket",
            attempt = token.attempt,
            credited = cost,
            capacity = state.capacity,
            "capacity released"
        );
    }

    /// Apply any refill owed for elapsed time.
    pub fn refill(&self) {
        let mut state = self.lock_state();
        let config = self.config.get();
        state.refill(&config, self.clock.now_millis());
    }

    /// Capacity as of the last refill or deduction. Does not refill.
    pub fn capacity(&self) -> u32 {
        self.lock_state().capacity
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Arc<BucketConfig> {
        self.config.get()
    }

    /// Install a new configuration, clamping current capacity to the new maximum.
    pub fn reconfigure(&self, config: BucketConfig) {
        self.update_config(|_| config.clone());
    }

    /// Derive and install a new configuration from the current one.
    ///
    /// The swap and the clamp happen under the state lock, so no acquire or release ever pairs
    /// capacity with a config it was not checked against.
    pub fn update_config<F>(&self, mut f: F) -> Arc<BucketConfig>
    where
        F: FnMut(&BucketConfig) -> BucketConfig,
    {
        let mut state = self.lock_state();
        let installed = self.config.update(|current| f(current).normalized());
        state.capacity = state.capacity.min(installed.max_capacity);
        debug!(
            target: "stormguard::bucket",
            max_capacity = installed.max_capacity,
            refill_rate = installed.refill_rate,
            circuit_breaker = installed.circuit_breaker,
            capacity = state.capacity,
            "bucket reconfigured"
        );
        installed
    }

    /// Refill, then deduct the size `size_of` picks from the active config, in one critical
    /// section. Carries the wait owed when the bucket is short and circuit breaking is off; the
    /// caller sleeps after the lock is released.
    fn deduct<F>(&self, size_of: F) -> Result<Grant, TokenError>
    where
        F: FnOnce(&BucketConfig) -> u32,
    {
        let mut state = self.lock_state();
        let config = self.config.get();
        let size = size_of(&config);
        state.refill(&config, self.clock.now_millis());

        if size <= state.capacity {
            state.capacity -= size;
            debug!(
                target: "stormguard::bucket",
                deducted = size,
                capacity = state.capacity,
                "capacity acquired"
            );
            return Ok(Grant { size, delay: None, config });
        }

        if config.circuit_breaker || config.refill_rate == 0 {
            warn!(
                target: "stormguard::bucket",
                requested = size,
                available = state.capacity,
                "retry capacity exceeded"
            );
            return Err(TokenError::CapacityExceeded { requested: size, available: state.capacity });
        }

        let deficit = u64::from(size - state.capacity);
        let rate = u64::from(config.refill_rate);
        let delay = Duration::from_secs((deficit + rate - 1) / rate);
        state.capacity = 0;
        debug!(
            target: "stormguard::bucket",
            requested = size,
            delay_ms = delay.as_millis() as u64,
            "capacity short; delaying"
        );
        Ok(Grant { size, delay: Some(delay), config })
    }

    /// Capacity and maximum read in one critical section.
    #[cfg(test)]
    fn bounds(&self) -> (u32, u32) {
        let state = self.lock_state();
        (state.capacity, self.config.get().max_capacity)
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
