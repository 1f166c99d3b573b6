//! Retry strategy: the lifecycle of a token across one retry sequence.
//!
//! ```text
//! Fresh --acquire_initial_token--> Attempting --record_success--> Succeeded
//!                                      |
//!                                      +--refresh_retry_token--> Attempting (attempt + 1)
//!                                      |
//!                                      +--refresh_retry_token--> Rejected
//! ```
//!
//! Two different refusals come out of [`RetryStrategy::refresh_retry_token`]:
//! [`TokenError::RetryRejected`] when the policy set declines, and
//! [`TokenError::CapacityExceeded`] when the partition's bucket is out of budget.

use crate::bucket::{BucketConfig, RetryToken};
use crate::classifier::ClassifiedError;
use crate::error::TokenError;
use crate::policy::PolicySet;
use crate::registry::{PartitionScope, TokenBucketRegistry};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns retry tokens on behalf of the retryer.
#[async_trait]
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// Total attempts allowed per sequence, the first included.
    fn max_attempts(&self) -> u32;

    /// Token for the first attempt against `partition`.
    async fn acquire_initial_token(&self, partition: &str) -> Result<RetryToken, TokenError>;

    /// Token for the next attempt after `token`'s attempt failed as `error`.
    async fn refresh_retry_token(
        &self,
        partition: &str,
        token: &RetryToken,
        error: &ClassifiedError,
    ) -> Result<RetryToken, TokenError>;

    /// The attempt holding `token` succeeded.
    fn record_success(&self, partition: &str, token: &RetryToken);
}

/// Policy set in front of partitioned token buckets.
#[derive(Debug, Clone)]
pub struct StandardRetryStrategy {
    registry: Arc<TokenBucketRegistry>,
    policies: PolicySet,
}

impl Default for StandardRetryStrategy {
    fn default() -> Self {
        Self::new(Arc::new(TokenBucketRegistry::default()), PolicySet::default())
    }
}

impl StandardRetryStrategy {
    pub fn new(registry: Arc<TokenBucketRegistry>, policies: PolicySet) -> Self {
        Self { registry, policies }
    }

    /// Per-partition buckets built from `config`.
    pub fn with_bucket_config(config: BucketConfig, policies: PolicySet) -> Self {
        let registry = TokenBucketRegistry::new(PartitionScope::PerPartition, config);
        Self::new(Arc::new(registry), policies)
    }

    pub fn registry(&self) -> &Arc<TokenBucketRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }
}

#[async_trait]
impl RetryStrategy for StandardRetryStrategy {
    fn max_attempts(&self) -> u32 {
        self.policies.max_attempts()
    }

    async fn acquire_initial_token(&self, partition: &str) -> Result<RetryToken, TokenError> {
        let token = self.registry.bucket(partition).acquire_initial().await?;
        debug!(target: "stormguard::strategy", partition, "initial token acquired");
        Ok(token)
    }

    async fn refresh_retry_token(
        &self,
        partition: &str,
        token: &RetryToken,
        error: &ClassifiedError,
    ) -> Result<RetryToken, TokenError> {
        if !self.policies.should_retry(token, error) {
            warn!(
                target: "stormguard::strategy",
                partition,
                attempt = token.attempt(),
                category = %error.category,
                "retry rejected by policy"
            );
            return Err(TokenError::RetryRejected {
                attempt: token.attempt(),
                category: error.category,
            });
        }

        let bucket = self.registry.bucket(partition);
        let refreshed = bucket.acquire_refresh(token, error.category).await?;
        debug!(
            target: "stormguard::strategy",
            partition,
            attempt = refreshed.attempt(),
            category = %error.category,
            "retry approved"
        );
        Ok(refreshed)
    }

    fn record_success(&self, partition: &str, token: &RetryToken) {
        self.registry.bucket(partition).release(token);
    }
}
