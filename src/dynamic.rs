//! Live-updatable configuration handles.
//!
//! Token buckets keep their [`BucketConfig`](crate::bucket::BucketConfig) in a
//! [`DynamicConfig`] so the retry budget of a running service can be retuned without rebuilding
//! the bucket. Reads are lock-free through `ArcSwap`; the `dynamic-rwlock` feature swaps the
//! backend for a `RwLock`.

use std::sync::Arc;

#[cfg(feature = "dynamic-rwlock")]
use std::sync::{PoisonError, RwLock};

#[cfg(not(feature = "dynamic-rwlock"))]
use arc_swap::ArcSwap;

/// Shared, swappable configuration value. Clones observe the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "dynamic-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "dynamic-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "dynamic-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "dynamic-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        #[cfg(not(feature = "dynamic-rwlock"))]
        {
            self.inner.load_full()
        }
        #[cfg(feature = "dynamic-rwlock")]
        {
            self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "dynamic-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "dynamic-rwlock")]
        {
            *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
        }
    }

    /// Derive the next value from the current one and install it, returning what was installed.
    ///
    /// Concurrent updates never lose each other's changes: under `ArcSwap` the closure may run
    /// more than once if another writer wins the race, so it must be side-effect free.
    pub fn update<F>(&self, mut f: F) -> Arc<T>
    where
        F: FnMut(&T) -> T,
    {
        #[cfg(not(feature = "dynamic-rwlock"))]
        {
            let mut installed = None;
            self.inner.rcu(|current| {
                let next = Arc::new(f(current));
                installed = Some(next.clone());
                next
            });
            installed.unwrap_or_else(|| self.inner.load_full())
        }
        #[cfg(feature = "dynamic-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let next = Arc::new(f(&guard));
            *guard = next.clone();
            next
        }
    }
}
