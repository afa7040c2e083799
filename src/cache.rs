use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, OnceCell};

use crate::error::ApiError;

const DEFAULT_FRESH_FOR: Duration = Duration::from_secs(60);
const DEFAULT_RETAIN_FOR: Duration = Duration::from_secs(5 * 60);

/// Composite identity of a read: resource name plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    resource: String,
    params: String,
}

impl QueryKey {
    pub fn new(resource: &str, params: impl fmt::Display) -> Self {
        Self {
            resource: resource.to_string(),
            params: params.to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.params)
    }
}

struct Entry {
    /// Single-flight cell: concurrent readers of the same key join one
    /// initializer instead of issuing duplicate network calls.
    cell: Arc<OnceCell<serde_json::Value>>,
    inserted_at: Instant,
    /// Last resolved value carried over across invalidation/staleness, so
    /// a view can keep showing something while the re-fetch runs.
    previous: Option<serde_json::Value>,
}

impl Entry {
    fn empty(previous: Option<serde_json::Value>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            inserted_at: Instant::now(),
            previous,
        }
    }

    fn latest(&self) -> Option<serde_json::Value> {
        self.cell.get().cloned().or_else(|| self.previous.clone())
    }
}

/// Keyed request cache with time-based staleness and explicit
/// invalidation. There is deliberately no LRU/LFU-style eviction; entries
/// past the retention window are dropped on access.
///
/// Invalidated keys are emitted on a broadcast channel so views can
/// subscribe to exactly the keys they depend on and re-read when one
/// fires.
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    fresh_for: Duration,
    retain_for: Duration,
    events: broadcast::Sender<QueryKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_windows(DEFAULT_FRESH_FOR, DEFAULT_RETAIN_FOR)
    }

    pub fn with_windows(fresh_for: Duration, retain_for: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(HashMap::new()),
            fresh_for,
            retain_for,
            events,
        }
    }

    /// Read through the cache. A key that is fresh or already in flight
    /// reuses the existing result; anything else runs `fetch`, retrying
    /// once on failure before giving up.
    pub async fn get_with<F, Fut>(
        &self,
        key: QueryKey,
        fetch: F,
    ) -> Result<serde_json::Value, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, ApiError>>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry)
                    if !entry.cell.initialized()
                        || entry.inserted_at.elapsed() <= self.fresh_for =>
                {
                    entry.cell.clone()
                }
                Some(entry) if entry.inserted_at.elapsed() <= self.retain_for => {
                    // Stale but retained: re-fetch, keep the old value
                    // around for peek().
                    let replacement = Entry::empty(entry.latest());
                    let cell = replacement.cell.clone();
                    entries.insert(key.clone(), replacement);
                    cell
                }
                _ => {
                    let entry = Entry::empty(None);
                    let cell = entry.cell.clone();
                    entries.insert(key.clone(), entry);
                    cell
                }
            }
        };

        cell.get_or_try_init(|| async {
            match fetch().await {
                Ok(value) => Ok(value),
                Err(first) => {
                    tracing::warn!(key = %key, error = %first, "read failed, retrying once");
                    fetch().await
                }
            }
        })
        .await
        .cloned()
    }

    /// Last known value for a key, possibly stale, without fetching.
    pub fn peek(&self, key: &QueryKey) -> Option<serde_json::Value> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.retain_for {
            return None;
        }
        entry.latest()
    }

    /// Force the next read of `key` to re-fetch and notify subscribers.
    pub fn invalidate(&self, key: &QueryKey) {
        {
            let mut entries = self.entries.lock();
            let previous = entries.get(key).and_then(Entry::latest);
            entries.insert(key.clone(), Entry::empty(previous));
        }
        tracing::debug!(key = %key, "cache key invalidated");
        let _ = self.events.send(key.clone());
    }

    /// Invalidate every key under a resource name.
    pub fn invalidate_resource(&self, resource: &str) {
        let keys: Vec<QueryKey> = {
            let entries = self.entries.lock();
            entries
                .keys()
                .filter(|key| key.resource == resource)
                .cloned()
                .collect()
        };
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Subscribe to invalidation events. Receivers that lag simply miss
    /// old keys and re-read on the next event.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.events.subscribe()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<serde_json::Value, ApiError>> + Send>>
    {
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"ok": true}))
            })
        }
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        let cache = Arc::new(QueryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        let a = cache.get_with(key.clone(), counting_fetch(calls.clone()));
        let b = cache.get_with(key.clone(), counting_fetch(calls.clone()));
        let (a, b) = tokio::join!(a, b);

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_read_does_not_refetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_refetch_and_notifies() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");
        let mut events = cache.subscribe();

        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        cache.invalidate(&key);
        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(events.try_recv().unwrap(), key);
    }

    #[tokio::test]
    async fn repeated_invalidation_still_dedupes_inflight_reads() {
        let cache = Arc::new(QueryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        cache.invalidate(&key);
        cache.invalidate(&key);

        let a = cache.get_with(key.clone(), counting_fetch(calls.clone()));
        let b = cache.get_with(key.clone(), counting_fetch(calls.clone()));
        let _ = tokio::join!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entry_refetches_but_peek_keeps_old_value() {
        let cache = QueryCache::with_windows(Duration::from_millis(10), Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.peek(&key).is_some());
        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_read_retries_once() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        let calls_in = calls.clone();
        let result = cache
            .get_with(key, move || {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(ApiError::Api {
                            status: 500,
                            message: "boom".to_string(),
                        })
                    } else {
                        Ok(serde_json::json!({"ok": true}))
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entry_past_retention_is_dropped() {
        let cache = QueryCache::with_windows(Duration::from_millis(5), Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("topics", "cohort-1");

        cache
            .get_with(key.clone(), counting_fetch(calls.clone()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.peek(&key).is_none());
    }
}
