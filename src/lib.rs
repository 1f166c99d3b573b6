#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Stormguard
//!
//! Client-side retry orchestration: how many times, how long to wait, and whether the process
//! can still afford another retry.
//!
//! ## Features
//!
//! - **Token-bucket retry budget** per partition, refilled over time and by successes
//! - **Exponential backoff** with bounded jitter and a hard ceiling
//! - **HTTP error classification** into transient, throttling, server and client failures
//! - **Retry-After support** for `Retry-After` and `x-amz-retry-after` headers
//! - **Composable policies** combined with OR under a hard attempt limit
//! - **Tower integration** through [`RetryLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use stormguard::{AttemptError, ResponseMetadata, RetryConfig, Retryer};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() {
//!     let retryer = Retryer::from_config(&RetryConfig::standard()).unwrap();
//!
//!     let result = retryer
//!         .execute("orders", |ctx| async move {
//!             if ctx.attempt == 0 {
//!                 let busy = ResponseMetadata::status(StatusCode::SERVICE_UNAVAILABLE);
//!                 let source = std::io::Error::new(std::io::ErrorKind::Other, "busy");
//!                 return Err(AttemptError::http(busy, source));
//!             }
//!             Ok("placed")
//!         })
//!         .await;
//!
//!     assert_eq!(result.unwrap(), "placed");
//! }
//! ```

pub mod backoff;
pub mod bucket;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod jitter;
pub mod policy;
pub mod prelude;
pub mod registry;
pub mod retryer;
pub mod sleeper;
pub mod strategy;

// Re-exports
pub use backoff::{BackoffConfig, BackoffConfigBuilder, BackoffStrategy, ExponentialBackoff};
pub use bucket::{BucketConfig, RetryToken, TokenBucket};
pub use classifier::{
    ClassifiedError, ErrorCategory, ErrorClassifier, HttpStatusClassifier, ResponseMetadata,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::RetryConfig;
pub use dynamic::DynamicConfig;
pub use error::{AttemptError, ConfigError, RetryError, TokenError};
pub use jitter::Jitter;
pub use policy::{MaxAttempts, PolicySet, RetryPolicy, RetryableCategories};
pub use registry::{PartitionScope, TokenBucketRegistry};
pub use retryer::{AttemptContext, RetryLayer, RetryService, Retryer, RetryerBuilder};
pub use sleeper::{ClockSleeper, InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use strategy::{RetryStrategy, StandardRetryStrategy};
