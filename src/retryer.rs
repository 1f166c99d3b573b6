//! The retry loop.
//!
//! Semantics:
//! - One initial token is acquired and the attempt-0 backoff is waited once before the first
//!   call.
//! - On success the strategy is credited and the value returned.
//! - `AttemptError::Opaque` failures, and HTTP failures the classifier cannot place, are returned
//!   immediately with no retry accounting.
//! - Otherwise the strategy is asked for a refreshed token. If it refuses (policy or capacity),
//!   the failure that triggered the refresh is returned, not the refusal.
//! - Before the next attempt the loop waits `max(backoff(attempt), retry_after)`.
//!
//! Invariants:
//! - Attempts are strictly sequential; attempt N+1 starts only after attempt N's outcome is
//!   resolved and its delay has elapsed.
//! - Only the first token acquisition can surface as [`RetryError::CapacityExceeded`].
//!
//! Example
//! ```rust
//! use stormguard::{AttemptError, ResponseMetadata, Retryer, RetryError};
//! use http::StatusCode;
//!
//! #[derive(Debug)]
//! struct MyErr;
//! impl std::fmt::Display for MyErr {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "oops")
//!     }
//! }
//! impl std::error::Error for MyErr {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let retryer = Retryer::builder().max_attempts(3).build().unwrap();
//! let result: Result<(), RetryError<MyErr>> = retryer
//!     .execute("inventory", |ctx| async move {
//!         assert!(ctx.attempt < ctx.max_attempts);
//!         Err(AttemptError::http(ResponseMetadata::status(StatusCode::BAD_REQUEST), MyErr))
//!     })
//!     .await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::backoff::{BackoffStrategy, ExponentialBackoff};
use crate::classifier::{ErrorClassifier, HttpStatusClassifier};
use crate::clock::{Clock, MonotonicClock};
use crate::config::RetryConfig;
use crate::error::{AttemptError, ConfigError, RetryError};
use crate::policy::PolicySet;
use crate::registry::TokenBucketRegistry;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::strategy::{RetryStrategy, StandardRetryStrategy};
use futures::future::{poll_fn, BoxFuture};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

/// What the operation is told about the attempt it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// Zero-based attempt index.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Runs an operation under a retry strategy, backoff and classifier.
#[derive(Clone)]
pub struct Retryer {
    strategy: Arc<dyn RetryStrategy>,
    backoff: Arc<dyn BackoffStrategy>,
    classifier: Arc<dyn ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for Retryer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryer")
            .field("strategy", &self.strategy)
            .field("backoff", &self.backoff)
            .field("classifier", &self.classifier)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Retryer {
    pub fn builder() -> RetryerBuilder {
        RetryerBuilder::new()
    }

    /// Production retryer (monotonic clock, tokio timer) from a config.
    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        Self::builder().config(config.clone()).build()
    }

    pub fn strategy(&self) -> &Arc<dyn RetryStrategy> {
        &self.strategy
    }

    /// Run `operation` against `partition`'s retry budget until it succeeds or retrying stops.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        partition: &str,
        mut operation: Op,
    ) -> Result<T, RetryError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, AttemptError<E>>> + Send,
        Op: FnMut(AttemptContext) -> Fut + Send,
    {
        let max_attempts = self.strategy.max_attempts();
        let mut token = self
            .strategy
            .acquire_initial_token(partition)
            .await
            .map_err(RetryError::CapacityExceeded)?;

        self.sleeper.sleep(self.backoff.backoff(token.attempt())).await;

        loop {
            let context = AttemptContext { attempt: token.attempt(), max_attempts };
            let error = match operation(context).await {
                Ok(value) => {
                    self.strategy.record_success(partition, &token);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.is_opaque() {
                debug!(
                    target: "stormguard::retryer",
                    partition,
                    attempt = context.attempt,
                    "opaque failure; not retried"
                );
                return Err(RetryError::Operation(error));
            }
            let Some(classified) = self.classifier.classify(error.response()) else {
                debug!(
                    target: "stormguard::retryer",
                    partition,
                    attempt = context.attempt,
                    "unclassified failure; not retried"
                );
                return Err(RetryError::Operation(error));
            };

            token = match self.strategy.refresh_retry_token(partition, &token, &classified).await {
                Ok(next) => next,
                Err(reason) => {
                    debug!(
                        target: "stormguard::retryer",
                        partition,
                        attempt = context.attempt,
                        reason = %reason,
                        "retrying stopped; returning last failure"
                    );
                    return Err(RetryError::Operation(error));
                }
            };

            let backoff = self.backoff.backoff(token.attempt());
            let delay = classified.retry_after.map_or(backoff, |hint| hint.max(backoff));
            debug!(
                target: "stormguard::retryer",
                partition,
                attempt = token.attempt(),
                category = %classified.category,
                delay_ms = delay.as_millis() as u64,
                "retrying"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`Retryer`].
///
/// Without an explicit [`strategy`](Self::strategy), `build` creates a [`StandardRetryStrategy`]
/// from the config, with buckets that read the builder's clock and wait through its sleeper.
pub struct RetryerBuilder {
    config: RetryConfig,
    strategy: Option<Arc<dyn RetryStrategy>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    classifier: Arc<dyn ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl RetryerBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::standard(),
            strategy: None,
            backoff: None,
            classifier: Arc::new(HttpStatusClassifier),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Replace all config-driven settings.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Total attempts, the first included. Ignored when a custom strategy is supplied.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn strategy<S: RetryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    pub fn backoff<B: BackoffStrategy + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn classifier<C: ErrorClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Sleeper for backoff waits and for capacity waits of config-built buckets.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Clock for config-built buckets.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<Retryer, ConfigError> {
        self.config.validate()?;
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => {
                let registry = TokenBucketRegistry::with_parts(
                    self.config.scope,
                    self.config.bucket.clone(),
                    self.clock.clone(),
                    self.sleeper.clone(),
                );
                Arc::new(StandardRetryStrategy::new(
                    Arc::new(registry),
                    PolicySet::standard(self.config.max_attempts),
                ))
            }
        };
        let backoff = self
            .backoff
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::new(self.config.backoff.clone())));
        Ok(Retryer { strategy, backoff, classifier: self.classifier, sleeper: self.sleeper })
    }
}

impl Default for RetryerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tower layer running every request of the wrapped service through a [`Retryer`].
///
/// Requests must be `Clone` so they can be replayed; all requests share one partition.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    retryer: Retryer,
    partition: Arc<str>,
}

impl RetryLayer {
    pub fn new(retryer: Retryer, partition: impl Into<Arc<str>>) -> Self {
        Self { retryer, partition: partition.into() }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, retryer: self.retryer.clone(), partition: self.partition.clone() }
    }
}

/// Retry service produced by [`RetryLayer`].
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    retryer: Retryer,
    partition: Arc<str>,
}

impl<S, E, Request> Service<Request> for RetryService<S>
where
    Request: Clone + Send + 'static,
    S: Service<Request, Error = AttemptError<E>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = RetryError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RetryError::Operation)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let retryer = self.retryer.clone();
        let partition = self.partition.clone();
        Box::pin(async move {
            retryer
                .execute(&partition, move |_context| {
                    let mut svc = inner.clone();
                    let req = req.clone();
                    async move {
                        poll_fn(|cx| svc.poll_ready(cx)).await?;
                        svc.call(req).await
                    }
                })
                .await
        })
    }
}
