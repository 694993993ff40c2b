//! # Cache Types

use std::time::Duration;

use tokio::time::Instant;

/// Longest lifetime an entry can be given; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Status of a cached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Resource found in cache and is valid
    Hit,
    /// Resource found but has expired
    Expired,
}

/// A stored value together with its timestamps.
///
/// Owned by the cache; readers only ever receive clones of `value`.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        let stored_at = Instant::now();
        Self {
            value,
            stored_at,
            expires_at: stored_at + ttl.min(MAX_TTL),
        }
    }

    /// Entries are valid up to and including `expires_at`.
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }
}

/// Result of a cache lookup that also reports freshness
#[derive(Debug, Clone)]
pub struct CacheLookup<V> {
    pub value: V,
    pub status: CacheStatus,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheLookup<V> {
    pub fn is_hit(&self) -> bool {
        self.status == CacheStatus::Hit
    }
}
