//! Registry mapping partitions to token buckets.
//!
//! A partition is a caller-chosen key (a backend, an endpoint group) that scopes a retry budget.
//! With [`PartitionScope::Shared`] every partition draws from one process-wide bucket; with
//! [`PartitionScope::PerPartition`] each key lazily gets its own bucket built from a template
//! config.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::bucket::{BucketConfig, TokenBucket};
use crate::clock::{Clock, MonotonicClock};
use crate::sleeper::{Sleeper, TokioSleeper};
use tracing::{debug, warn};

/// How partitions map onto buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionScope {
    /// One bucket per partition key.
    #[default]
    PerPartition,
    /// Every partition shares a single bucket.
    Shared,
}

/// Partition-keyed token buckets.
#[derive(Debug)]
pub struct TokenBucketRegistry {
    scope: PartitionScope,
    template: BucketConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    /// Only built in `Shared` scope.
    shared: Option<Arc<TokenBucket>>,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl Default for TokenBucketRegistry {
    fn default() -> Self {
        Self::new(PartitionScope::default(), BucketConfig::default())
    }
}

impl TokenBucketRegistry {
    pub fn new(scope: PartitionScope, template: BucketConfig) -> Self {
        Self::with_parts(
            scope,
            template,
            Arc::new(MonotonicClock::default()),
            Arc::new(TokioSleeper),
        )
    }

    /// Registry whose buckets read `clock` and wait through `sleeper`.
    pub fn with_parts(
        scope: PartitionScope,
        template: BucketConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let shared = (scope == PartitionScope::Shared).then(|| {
            Arc::new(TokenBucket::with_parts(template.clone(), clock.clone(), sleeper.clone()))
        });
        Self { scope, template, clock, sleeper, shared, buckets: RwLock::new(HashMap::new()) }
    }

    pub fn scope(&self) -> PartitionScope {
        self.scope
    }

    /// Config used for buckets created on demand.
    pub fn template(&self) -> &BucketConfig {
        &self.template
    }

    /// Bucket for `partition`, creating it on first use.
    ///
    /// Explicitly registered buckets win over the scope: a partition registered with
    /// [`register`](Self::register) keeps its own bucket even in `Shared` scope.
    pub fn bucket(&self, partition: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.get(partition) {
            return bucket;
        }
        if let Some(shared) = &self.shared {
            return shared.clone();
        }

        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another task may have created it between the read and write locks.
        map.entry(partition.to_string())
            .or_insert_with(|| {
                debug!(target: "stormguard::registry", partition, "creating token bucket");
                Arc::new(TokenBucket::with_parts(
                    self.template.clone(),
                    self.clock.clone(),
                    self.sleeper.clone(),
                ))
            })
            .clone()
    }

    /// Register a bucket for `partition`, replacing any existing one.
    pub fn register(&self, partition: impl Into<String>, bucket: Arc<TokenBucket>) {
        let partition = partition.into();
        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&partition) {
            warn!(
                target: "stormguard::registry",
                partition = %partition,
                "token bucket replaced; last registration wins"
            );
        }
        map.insert(partition, bucket);
    }

    /// Bucket already bound to `partition`, without creating one.
    pub fn get(&self, partition: &str) -> Option<Arc<TokenBucket>> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        map.get(partition).cloned()
    }

    /// Current capacity per partition, sorted by key. The shared bucket is not listed.
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, u32)> =
            map.iter().map(|(k, v)| (k.clone(), v.capacity())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn per_partition_scope_isolates_buckets() {
        let registry =
            TokenBucketRegistry::new(PartitionScope::PerPartition, BucketConfig::default());
        let a = registry.bucket("a");
        let b = registry.bucket("b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &registry.bucket("a")), "lookups are stable");
        assert!(registry.shared.is_none(), "no shared bucket outside shared scope");

        let names: Vec<_> = registry.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn shared_scope_hands_out_one_bucket() {
        let registry = TokenBucketRegistry::new(PartitionScope::Shared, BucketConfig::default());
        assert!(Arc::ptr_eq(&registry.bucket("a"), &registry.bucket("b")));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn registered_bucket_overrides_scope() {
        let registry = TokenBucketRegistry::new(PartitionScope::Shared, BucketConfig::default());
        let custom =
            Arc::new(TokenBucket::new(BucketConfig::default().with_max_capacity(7).unwrap()));
        registry.register("special", custom.clone());
        assert!(Arc::ptr_eq(&registry.bucket("special"), &custom));
        assert!(!Arc::ptr_eq(&registry.bucket("other"), &custom));
        assert_eq!(registry.snapshot(), vec![("special".to_string(), 7)]);
    }

    #[test]
    fn concurrent_creation_yields_single_bucket() {
        let registry = Arc::new(TokenBucketRegistry::default());
        let buckets: Vec<Arc<TokenBucket>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    scope.spawn(move || registry.bucket("hot"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(buckets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn register_warns_and_replaces_duplicates() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = TokenBucketRegistry::default();
        let first = Arc::new(TokenBucket::default());
        let second = Arc::new(TokenBucket::default());
        registry.register("svc", first);
        registry.register("svc", second.clone());

        assert!(Arc::ptr_eq(&registry.get("svc").expect("registered"), &second));

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("token bucket replaced"), "got logs: {logs}");
    }
}
