//! TTL cache for RPC-derived reads
//!
//! Every read the engine makes against the node goes through this store.
//! Each resource kind carries its own TTL; a fresh entry is served without
//! touching the node, concurrent callers for one key share a single fetch,
//! and a failed fetch is answered with the previous (stale) entry when one
//! exists, flagged as fallback data.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::gateway::RpcResponse;

/// Errors that can occur in the cache store
///
/// `E` is the error type of the fetch function that fed the store: RPC
/// errors for node reads, geolocation errors for IP lookups.
#[derive(Error, Debug)]
pub enum CacheError<E: std::error::Error + 'static> {
    /// Fetch failed and there was no stale entry to fall back on
    #[error("cache miss for '{key}' and fetch failed: {source}")]
    Miss {
        key: String,
        #[source]
        source: E,
    },

    /// Forced refresh failed; the stored entry was left untouched
    #[error("refresh of '{key}' failed: {source}")]
    RefreshFailed {
        key: String,
        #[source]
        source: E,
    },
}

/// A freshly fetched value and whether it is synthetic
#[derive(Debug, Clone)]
pub struct Fetched {
    pub value: Value,
    pub is_fallback: bool,
}

impl Fetched {
    pub fn live(value: Value) -> Self {
        Fetched {
            value,
            is_fallback: false,
        }
    }
}

impl From<RpcResponse> for Fetched {
    fn from(response: RpcResponse) -> Self {
        Fetched {
            value: response.value,
            is_fallback: response.is_fallback,
        }
    }
}

/// One cached value with its provenance
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Unix timestamp of when the value was fetched
    pub fetched_at: i64,
    pub ttl_seconds: i64,
    /// True when the value is stale-served or synthetic
    pub is_fallback: bool,
}

impl CacheEntry {
    /// An entry is fresh iff now − fetched_at < ttl
    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.fetched_at < self.ttl_seconds
    }

    /// Seconds since the value was fetched
    pub fn age_seconds(&self, now: i64) -> i64 {
        (now - self.fetched_at).max(0)
    }
}

/// How many TTLs past expiry an entry stays usable for stale-serving
/// before [`CacheStore::prune`] drops it
pub const PRUNE_GRACE_FACTOR: i64 = 4;

/// Per-key slot; the async mutex serializes fetches for one key
struct Slot {
    state: Mutex<Option<CacheEntry>>,
}

/// TTL-keyed store mediating all RPC-derived reads
///
/// Explicitly constructed and passed to every component that needs it; the
/// only shared mutable state in the engine core. Safe for concurrent use:
/// a fetch for one key is single-flight, and callers never observe a
/// partially written entry.
pub struct CacheStore {
    slots: StdMutex<HashMap<String, Arc<Slot>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        CacheStore {
            slots: StdMutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Slot {
                    state: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Return the cached value for `key`, fetching it if absent or expired
    ///
    /// Concurrent callers for the same key during an in-flight fetch wait on
    /// that fetch instead of duplicating it. On fetch failure a stale entry,
    /// when present, is returned with `is_fallback` set; with no stale entry
    /// the failure propagates as [`CacheError::Miss`].
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl_seconds: i64,
        fetch: F,
    ) -> Result<CacheEntry, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched, E>>,
        E: std::error::Error + 'static,
    {
        let slot = self.slot(key);
        let mut state = slot.state.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(entry) = state.as_ref() {
            if entry.is_fresh(now) {
                log::trace!("Cache hit for '{}' (age {}s)", key, entry.age_seconds(now));
                return Ok(entry.clone());
            }
        }

        match fetch().await {
            Ok(fetched) => {
                let entry = CacheEntry {
                    key: key.to_string(),
                    value: fetched.value,
                    fetched_at: now,
                    ttl_seconds,
                    is_fallback: fetched.is_fallback,
                };
                *state = Some(entry.clone());
                Ok(entry)
            }
            Err(e) => match state.as_ref() {
                Some(stale) => {
                    log::warn!(
                        "Fetch for '{}' failed ({}), serving stale entry (age {}s)",
                        key,
                        e,
                        stale.age_seconds(now)
                    );
                    let mut served = stale.clone();
                    served.is_fallback = true;
                    Ok(served)
                }
                None => Err(CacheError::Miss {
                    key: key.to_string(),
                    source: e,
                }),
            },
        }
    }

    /// Fetch unconditionally and replace the stored entry on success
    ///
    /// On failure the previous entry is left untouched and the error is
    /// returned; callers that can live with stale data should fall back to
    /// [`CacheStore::get_or_fetch`].
    pub async fn force_refresh<F, Fut, E>(
        &self,
        key: &str,
        ttl_seconds: i64,
        fetch: F,
    ) -> Result<CacheEntry, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched, E>>,
        E: std::error::Error + 'static,
    {
        let slot = self.slot(key);
        let mut state = slot.state.lock().await;
        let now = chrono::Utc::now().timestamp();

        match fetch().await {
            Ok(fetched) => {
                let entry = CacheEntry {
                    key: key.to_string(),
                    value: fetched.value,
                    fetched_at: now,
                    ttl_seconds,
                    is_fallback: fetched.is_fallback,
                };
                *state = Some(entry.clone());
                Ok(entry)
            }
            Err(e) => Err(CacheError::RefreshFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// Read a cached entry without fetching, fresh or not
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        let slot = {
            let slots = self.slots.lock().unwrap();
            slots.get(key).cloned()
        };
        match slot {
            Some(slot) => slot.state.lock().await.clone(),
            None => None,
        }
    }

    /// Drop a single entry
    pub async fn invalidate(&self, key: &str) {
        let slot = {
            let slots = self.slots.lock().unwrap();
            slots.get(key).cloned()
        };
        if let Some(slot) = slot {
            *slot.state.lock().await = None;
        }
    }

    /// Drop entries stale beyond the grace window, and empty slots
    ///
    /// An entry is kept while it can still stale-serve (within
    /// [`PRUNE_GRACE_FACTOR`] TTLs of its fetch); a slot with a fetch in
    /// flight is left alone. Returns the number of keys removed.
    pub fn prune(&self, now: i64) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| match slot.state.try_lock() {
            Ok(state) => match state.as_ref() {
                Some(entry) => {
                    now - entry.fetched_at < entry.ttl_seconds * PRUNE_GRACE_FACTOR
                }
                None => false,
            },
            Err(_) => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            log::debug!("Pruned {} stale cache entr(ies)", removed);
        }
        removed
    }

    /// Drop every entry; called on shutdown so no stale state survives
    pub fn flush(&self) {
        self.slots.lock().unwrap().clear();
    }

    /// Number of keys with a slot (fresh, stale, or in-flight)
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RpcError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok_response(v: Value) -> Result<Fetched, RpcError> {
        Ok(Fetched::live(v))
    }

    fn failed() -> Result<Fetched, RpcError> {
        Err(RpcError::ConnectionRefused("refused".to_string()))
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let entry = cache
                .get_or_fetch("peers", 300, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { ok_response(json!([1, 2, 3])) }
                })
                .await
                .unwrap();
            assert_eq!(entry.value, json!([1, 2, 3]));
            assert!(!entry.is_fallback);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(CacheStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            ok_response(json!("shared"))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", 300, || fetch(calls.clone())),
            cache.get_or_fetch("k", 300, || fetch(calls.clone())),
        );

        assert_eq!(a.unwrap().value, json!("shared"));
        assert_eq!(b.unwrap().value, json!("shared"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_served_on_fetch_failure() {
        let cache = CacheStore::new();

        // TTL of zero expires the entry immediately
        cache
            .get_or_fetch("k", 0, || async { ok_response(json!(42)) })
            .await
            .unwrap();

        let entry = cache
            .get_or_fetch("k", 0, || async { failed() })
            .await
            .unwrap();
        assert_eq!(entry.value, json!(42));
        assert!(entry.is_fallback);
    }

    #[tokio::test]
    async fn test_miss_with_no_stale_entry_propagates() {
        let cache = CacheStore::new();
        let result = cache.get_or_fetch("k", 300, || async { failed() }).await;
        assert!(matches!(result, Err(CacheError::Miss { .. })));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_freshness() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("k", 300, || async { ok_response(json!(1)) })
            .await
            .unwrap();

        let entry = cache
            .force_refresh("k", 300, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { ok_response(json!(2)) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.value, json!(2));
    }

    #[tokio::test]
    async fn test_force_refresh_failure_keeps_old_entry() {
        let cache = CacheStore::new();
        cache
            .get_or_fetch("k", 300, || async { ok_response(json!("old")) })
            .await
            .unwrap();

        let result = cache.force_refresh("k", 300, || async { failed() }).await;
        assert!(matches!(result, Err(CacheError::RefreshFailed { .. })));

        let kept = cache.peek("k").await.unwrap();
        assert_eq!(kept.value, json!("old"));
        assert!(!kept.is_fallback);
    }

    #[tokio::test]
    async fn test_invalidate_and_flush() {
        let cache = CacheStore::new();
        cache
            .get_or_fetch("a", 300, || async { ok_response(json!(1)) })
            .await
            .unwrap();
        cache
            .get_or_fetch("b", 300, || async { ok_response(json!(2)) })
            .await
            .unwrap();

        cache.invalidate("a").await;
        assert!(cache.peek("a").await.is_none());
        assert!(cache.peek("b").await.is_some());

        cache.flush();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_prune_drops_long_stale_keys_but_keeps_servable_ones() {
        let cache = CacheStore::new();
        let now = chrono::Utc::now().timestamp();

        for i in 0..100 {
            cache
                .get_or_fetch(&format!("geo:198.51.100.{}", i), 10, || async move {
                    ok_response(json!(i))
                })
                .await
                .unwrap();
        }
        cache
            .get_or_fetch("rpc:peerlist", 300, || async { ok_response(json!([])) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 101);

        // Inside the grace window nothing goes; past it the stale keys do
        assert_eq!(cache.prune(now), 0);
        assert_eq!(cache.prune(now + 10 * PRUNE_GRACE_FACTOR + 5), 100);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("rpc:peerlist").await.is_some());
    }

    #[tokio::test]
    async fn test_prune_drops_slots_left_by_failed_fetches() {
        let cache = CacheStore::new();
        let _ = cache.get_or_fetch("k", 300, || async { failed() }).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.prune(chrono::Utc::now().timestamp()), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_freshness_boundary() {
        let entry = CacheEntry {
            key: "k".to_string(),
            value: json!(null),
            fetched_at: 1000,
            ttl_seconds: 300,
            is_fallback: false,
        };
        assert!(entry.is_fresh(1000 + 299));
        assert!(!entry.is_fresh(1000 + 300));
    }
}
