//! Retry policies: which failures earn another attempt.
//!
//! A [`PolicySet`] answers one question per failed attempt. Two things must hold for a retry:
//! - the attempt limit leaves room for another attempt, and
//! - at least one approving policy says yes.
//!
//! Approving policies are combined with OR. Every policy in the list is evaluated, in order, on
//! every decision; there is no short-circuit, so order never changes the outcome and a policy
//! cannot veto one that came before it. To restrict retries further, lower the attempt limit or
//! narrow the policies themselves.
//!
//! ```rust
//! use stormguard::{ClassifiedError, ErrorCategory, PolicySet, RetryToken};
//!
//! let policies = PolicySet::standard(3);
//! let throttled = ClassifiedError::new(ErrorCategory::Throttling);
//! assert!(policies.should_retry(&RetryToken::new(1, None), &throttled));
//! assert!(!policies.should_retry(&RetryToken::new(3, None), &throttled));
//! ```

use crate::bucket::RetryToken;
use crate::classifier::{ClassifiedError, ErrorCategory};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One independent retry predicate.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, token: &RetryToken, error: &ClassifiedError) -> bool;
}

impl<F> RetryPolicy for F
where
    F: Fn(&RetryToken, &ClassifiedError) -> bool + Send + Sync,
{
    fn should_retry(&self, token: &RetryToken, error: &ClassifiedError) -> bool {
        self(token, error)
    }
}

/// Approves categories in an allow-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableCategories {
    categories: BTreeSet<ErrorCategory>,
}

impl RetryableCategories {
    pub fn new(categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        Self { categories: categories.into_iter().collect() }
    }

    pub fn contains(&self, category: ErrorCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Categories that are retryable by default: transient and throttling.
impl Default for RetryableCategories {
    fn default() -> Self {
        Self::new(ErrorCategory::ALL.into_iter().filter(|c| c.is_retryable_by_default()))
    }
}

impl RetryPolicy for RetryableCategories {
    fn should_retry(&self, _token: &RetryToken, error: &ClassifiedError) -> bool {
        self.contains(error.category)
    }
}

/// Approves while the attempts made so far (`token.attempt() + 1`) stay under `max`.
///
/// `max` counts total attempts, the first one included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAttempts {
    max: u32,
}

impl MaxAttempts {
    pub fn new(max: u32) -> Self {
        Self { max }
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl RetryPolicy for MaxAttempts {
    fn should_retry(&self, token: &RetryToken, _error: &ClassifiedError) -> bool {
        u64::from(token.attempt()) + 1 < u64::from(self.max)
    }
}

/// Attempt limit plus an OR-combined list of approving policies.
#[derive(Clone)]
pub struct PolicySet {
    limit: MaxAttempts,
    policies: Vec<Arc<dyn RetryPolicy>>,
}

impl fmt::Debug for PolicySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySet")
            .field("max_attempts", &self.limit.max)
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::standard(DEFAULT_MAX_ATTEMPTS)
    }
}

impl PolicySet {
    /// Attempt limit with no approving policies: never retries until one is added.
    pub fn new(max_attempts: u32) -> Self {
        Self { limit: MaxAttempts::new(max_attempts), policies: Vec::new() }
    }

    /// `max_attempts` total attempts; retry transient and throttling failures.
    pub fn standard(max_attempts: u32) -> Self {
        Self::new(max_attempts).with_policy(RetryableCategories::default())
    }

    /// Append an approving policy.
    pub fn with_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.limit.max
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn should_retry(&self, token: &RetryToken, error: &ClassifiedError) -> bool {
        if !self.limit.should_retry(token, error) {
            return false;
        }
        self.policies
            .iter()
            .fold(false, |approved, policy| policy.should_retry(token, error) | approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn token(attempt: u32) -> RetryToken {
        RetryToken::new(attempt, None)
    }

    fn error(category: ErrorCategory) -> ClassifiedError {
        ClassifiedError::new(category)
    }

    #[test]
    fn standard_set_decisions() {
        let policies = PolicySet::standard(3);
        assert!(!policies.should_retry(&token(3), &error(ErrorCategory::Transient)));
        assert!(!policies.should_retry(&token(1), &error(ErrorCategory::Client)));
        assert!(policies.should_retry(&token(1), &error(ErrorCategory::Throttling)));
        assert!(policies.should_retry(&token(0), &error(ErrorCategory::Transient)));
        assert!(
            !policies.should_retry(&token(2), &error(ErrorCategory::Transient)),
            "the third attempt is the last"
        );
        assert!(!policies.should_retry(&token(0), &error(ErrorCategory::Server)));
    }

    #[test]
    fn any_approving_policy_authorizes() {
        let policies = PolicySet::standard(5)
            .with_policy(|_: &RetryToken, e: &ClassifiedError| e.category == ErrorCategory::Server);
        assert!(policies.should_retry(&token(0), &error(ErrorCategory::Server)));
        assert!(policies.should_retry(&token(0), &error(ErrorCategory::Transient)));
        assert!(!policies.should_retry(&token(0), &error(ErrorCategory::Client)));
    }

    #[test]
    fn order_does_not_matter() {
        let server = |_: &RetryToken, e: &ClassifiedError| e.category == ErrorCategory::Server;
        let a = PolicySet::new(4).with_policy(RetryableCategories::default()).with_policy(server);
        let b = PolicySet::new(4).with_policy(server).with_policy(RetryableCategories::default());
        for category in [
            ErrorCategory::Transient,
            ErrorCategory::Throttling,
            ErrorCategory::Server,
            ErrorCategory::Client,
        ] {
            for attempt in 0..6 {
                assert_eq!(
                    a.should_retry(&token(attempt), &error(category)),
                    b.should_retry(&token(attempt), &error(category)),
                );
            }
        }
    }

    #[test]
    fn every_policy_is_consulted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = {
            let calls = calls.clone();
            move |_: &RetryToken, _: &ClassifiedError| {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            }
        };
        let policies = PolicySet::standard(3).with_policy(counting);
        assert!(policies.should_retry(&token(0), &error(ErrorCategory::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no short-circuit after an approval");
    }

    #[test]
    fn empty_set_never_retries() {
        let policies = PolicySet::new(10);
        assert!(policies.is_empty());
        assert!(!policies.should_retry(&token(0), &error(ErrorCategory::Transient)));
    }

    #[test]
    fn max_attempts_counts_total_attempts() {
        let limit = MaxAttempts::new(1);
        assert!(!limit.should_retry(&token(0), &error(ErrorCategory::Transient)));
        let limit = MaxAttempts::new(u32::MAX);
        assert!(!limit.should_retry(&token(u32::MAX - 1), &error(ErrorCategory::Transient)));
        assert!(limit.should_retry(&token(u32::MAX - 2), &error(ErrorCategory::Transient)));
    }

    #[test]
    fn default_categories_are_transient_and_throttling() {
        let defaults = RetryableCategories::default();
        assert_eq!(
            defaults,
            RetryableCategories::new([ErrorCategory::Throttling, ErrorCategory::Transient])
        );
        assert!(!defaults.contains(ErrorCategory::Server));
    }

    #[test]
    fn custom_category_set() {
        let only_server = RetryableCategories::new([ErrorCategory::Server]);
        assert!(only_server.contains(ErrorCategory::Server));
        assert!(!only_server.contains(ErrorCategory::Throttling));
    }
}
