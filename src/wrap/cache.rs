//! Time-bounded memoization of successful results.

use std::hash::Hash;
use std::time::Duration;

use moka::sync::Cache;

use super::{AsyncOperation, Metadata, Named, Operation};

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const MAX_ENTRIES: u64 = 10_000;

/// Wrapper produced by [`super::OperationExt::cached`].
///
/// Results are keyed by the full argument value. Errors are never cached,
/// so a failed call is retried on the next invocation.
#[derive(Clone)]
pub struct Cached<O, K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: O,
    cache: Cache<K, V>,
}

impl<O, K, V> Cached<O, K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(inner: O, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    /// Drops every cached result.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }
}

impl<O, K, V> Named for Cached<O, K, V>
where
    O: Named,
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<O, K, V> Operation<K> for Cached<O, K, V>
where
    O: Operation<K, Output = V>,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Output = V;
    type Error = O::Error;

    fn call(&self, args: K) -> Result<V, Self::Error> {
        if let Some(hit) = self.cache.get(&args) {
            tracing::debug!(operation = %self.name(), "Cache hit");
            return Ok(hit);
        }

        let value = self.inner.call(args.clone())?;
        self.cache.insert(args, value.clone());
        Ok(value)
    }
}

impl<O, K, V> AsyncOperation<K> for Cached<O, K, V>
where
    O: AsyncOperation<K, Output = V>,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Output = V;
    type Error = O::Error;

    async fn call_async(&self, args: K) -> Result<V, Self::Error> {
        if let Some(hit) = self.cache.get(&args) {
            tracing::debug!(operation = %self.name(), "Cache hit");
            return Ok(hit);
        }

        let value = self.inner.call_async(args.clone()).await?;
        self.cache.insert(args, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::wrap::{AsyncOp, Op, OperationExt};

    #[test]
    fn test_second_call_is_served_from_cache() {
        let calls = AtomicU32::new(0);
        let op = Op::new("square", |x: u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(x * x)
        })
        .cached::<u64, u64>(DEFAULT_TTL);

        assert_eq!(op.call(4), Ok(16));
        assert_eq!(op.call(4), Ok(16));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_args_are_cached_separately() {
        let calls = AtomicU32::new(0);
        let op = Op::new("square", |x: u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(x * x)
        })
        .cached::<u64, u64>(DEFAULT_TTL);

        assert_eq!(op.call(2), Ok(4));
        assert_eq!(op.call(3), Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let calls = AtomicU32::new(0);
        let op = Op::new("flaky", |_: u8| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err("cold start".to_string())
            } else {
                Ok(n)
            }
        })
        .cached::<u8, u32>(DEFAULT_TTL);

        assert!(op.call(1).is_err());
        assert_eq!(op.call(1), Ok(1));
        assert_eq!(op.call(1), Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_all_forces_recompute() {
        let calls = AtomicU32::new(0);
        let op = Op::new("id", |x: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(x)
        })
        .cached::<String, String>(DEFAULT_TTL);

        op.call("a".to_string()).unwrap();
        op.invalidate_all();
        op.call("a".to_string()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_entries_are_recomputed() {
        let calls = AtomicU32::new(0);
        let op = Op::new("id", |x: u8| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(x)
        })
        .cached::<u8, u8>(Duration::from_millis(20));

        op.call(1).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        op.call(1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_cache_hit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = AsyncOp::new("lookup", move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(key.len())
            }
        })
        .cached::<String, usize>(DEFAULT_TTL);

        assert_eq!(op.call_async("abc".to_string()).await, Ok(3));
        assert_eq!(op.call_async("abc".to_string()).await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
