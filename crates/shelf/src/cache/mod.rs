//! # Cache System
//!
//! Key/value storage with lazy TTL expiry. Expired entries stay resident so that a
//! stale read can stand in for the network when a refresh fails.

mod ttl;
mod types;

pub use ttl::TtlCache;
pub use types::{CacheEntry, CacheLookup, CacheStatus};
