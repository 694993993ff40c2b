//! # TTL Cache
//!
//! In-memory cache backed by Moka. Moka only bounds capacity here; expiry is tracked per
//! entry and checked on read, so an expired entry can still be served by
//! [`TtlCache::get_stale`] until it is overwritten or invalidated.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache as MokaCache;
use tracing::{debug, trace};

use crate::cache::types::{CacheEntry, CacheLookup, CacheStatus};

#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: MokaCache<K, Arc<CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + Clone + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_entries` entries.
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        let cache = MokaCache::builder().max_capacity(max_entries).build();

        debug!(
            max_entries = max_entries,
            default_ttl_secs = default_ttl.as_secs(),
            "TTL cache created"
        );

        Self { cache, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a value that has not expired yet.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.cache.get(key)?;
        if entry.is_expired() {
            trace!(key = ?key, "Cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    /// Get a value regardless of expiry.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.cache.get(key).map(|entry| entry.value.clone())
    }

    /// Get a value together with its freshness status.
    pub fn lookup(&self, key: &K) -> Option<CacheLookup<V>> {
        self.cache.get(key).map(|entry| CacheLookup {
            value: entry.value.clone(),
            status: if entry.is_expired() {
                CacheStatus::Expired
            } else {
                CacheStatus::Hit
            },
            stored_at: entry.stored_at,
            expires_at: entry.expires_at,
        })
    }

    /// Store a value, replacing any previous entry wholesale.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        trace!(key = ?key, ttl_secs = ttl.as_secs(), "Cache entry stored");
        self.cache.insert(key, Arc::new(CacheEntry::new(value, ttl)));
    }

    /// Store a value with the default TTL.
    pub fn set_default(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
        debug!(key = ?key, "Cache entry invalidated");
    }

    /// Invalidate every entry whose key matches `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        let keys: Vec<K> = self
            .cache
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| K::clone(&key))
            .collect();
        for key in keys {
            self.invalidate(&key);
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        debug!("TTL cache cleared");
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn cache() -> TtlCache<String, String> {
        TtlCache::new(100, Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_before_and_after_ttl() {
        let cache = cache();
        cache.set("k".into(), "v".into(), Duration::from_secs(10));

        assert_eq!(cache.get(&"k".to_string()).as_deref(), Some("v"));
        advance(Duration::from_secs(10)).await;
        // expiry is strict: the boundary instant is still valid
        assert_eq!(cache.get(&"k".to_string()).as_deref(), Some("v"));
        advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_stale_survives_expiry() {
        let cache = cache();
        cache.set("k".into(), "v".into(), Duration::from_secs(1));
        advance(Duration::from_secs(3600)).await;

        assert_eq!(cache.get(&"k".to_string()), None);
        assert_eq!(cache.get_stale(&"k".to_string()).as_deref(), Some("v"));
        assert!(cache.contains(&"k".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_reports_status() {
        let cache = cache();
        cache.set_default("k".into(), "v".into());
        let lookup = cache.lookup(&"k".to_string()).unwrap();
        assert_eq!(lookup.status, CacheStatus::Hit);

        advance(Duration::from_secs(301)).await;
        let lookup = cache.lookup(&"k".to_string()).unwrap();
        assert_eq!(lookup.status, CacheStatus::Expired);
        assert_eq!(lookup.value, "v");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_wholesale() {
        let cache = cache();
        cache.set("k".into(), "old".into(), Duration::from_secs(1));
        advance(Duration::from_secs(5)).await;
        cache.set("k".into(), "new".into(), Duration::from_secs(60));

        assert_eq!(cache.get(&"k".to_string()).as_deref(), Some("new"));
        assert_eq!(cache.get_stale(&"k".to_string()).as_deref(), Some("new"));
    }

    #[test]
    fn test_invalidate_removes_stale_copy_too() {
        let cache = cache();
        cache.set_default("k".into(), "v".into());
        cache.invalidate(&"k".to_string());
        assert_eq!(cache.get_stale(&"k".to_string()), None);
    }

    #[test]
    fn test_invalidate_where_matches_prefix() {
        let cache = cache();
        cache.set_default("agent-1:basic".into(), "a".into());
        cache.set_default("agent-1:reviews".into(), "b".into());
        cache.set_default("agent-2:basic".into(), "c".into());

        cache.invalidate_where(|key| key.starts_with("agent-1:"));

        assert_eq!(cache.get_stale(&"agent-1:basic".to_string()), None);
        assert_eq!(cache.get_stale(&"agent-1:reviews".to_string()), None);
        assert_eq!(cache.get_stale(&"agent-2:basic".to_string()).as_deref(), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let cache: TtlCache<String, u32> = TtlCache::new(16, Duration::MAX);
        cache.set_default("forever".to_string(), 7);
        cache.set("also".to_string(), 8, Duration::from_secs(u64::MAX));

        advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(cache.get(&"forever".to_string()), Some(7));
        assert_eq!(cache.get(&"also".to_string()), Some(8));
    }
}
