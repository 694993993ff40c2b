//! # Record Fetcher
//!
//! Retrieves one product record by id. Reads go through the TTL cache first, then
//! through the request coalescer so that concurrent callers share a single network
//! round trip. When the network fails, a stale cached copy is served instead of an
//! error, unless the backend reported that the record no longer exists.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, trace, warn};

use crate::backend::{RecordQuery, RecordSource};
use crate::cache::TtlCache;
use crate::coalesce::RequestCoalescer;
use crate::record::{ProductRecord, normalize_record};
use crate::store::RecordStore;
use crate::{SyncConfig, SyncError};

/// Options for a single fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass the cache and send a cache-bust parameter
    pub skip_cache: bool,
    pub include_reviews: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reviews(mut self, include_reviews: bool) -> Self {
        self.include_reviews = include_reviews;
        self
    }

    pub fn skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    /// Cache and coalescing key for `id` under these options.
    pub fn cache_key(&self, id: &str) -> String {
        if self.include_reviews {
            format!("{id}:reviews")
        } else {
            format!("{id}:basic")
        }
    }
}

#[derive(Clone)]
pub struct RecordFetcher {
    source: Arc<dyn RecordSource>,
    cache: TtlCache<String, ProductRecord>,
    coalescer: RequestCoalescer<String, ProductRecord>,
    store: RecordStore,
    request_timeout: Duration,
}

impl RecordFetcher {
    pub fn new(config: &SyncConfig, source: Arc<dyn RecordSource>, store: RecordStore) -> Self {
        Self {
            source,
            cache: TtlCache::new(config.cache_max_entries, config.cache_ttl),
            coalescer: RequestCoalescer::new(),
            store,
            request_timeout: config.request_timeout,
        }
    }

    pub fn cache(&self) -> &TtlCache<String, ProductRecord> {
        &self.cache
    }

    pub fn coalescer(&self) -> &RequestCoalescer<String, ProductRecord> {
        &self.coalescer
    }

    /// Fetch with the first-load timeout.
    pub async fn fetch(&self, id: &str, options: FetchOptions) -> Result<ProductRecord, SyncError> {
        self.fetch_with_timeout(id, options, self.request_timeout)
            .await
    }

    /// Fetch a record, falling back to a stale cached copy when the network fails.
    ///
    /// The record is merged into the shared [`RecordStore`] on success.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_with_timeout(
        &self,
        id: &str,
        options: FetchOptions,
        timeout: Duration,
    ) -> Result<ProductRecord, SyncError> {
        let key = options.cache_key(id);

        match self.fetch_fresh(id, options, timeout).await {
            Ok(record) => {
                self.store.reconcile(&record);
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                // the entity is gone; a stale copy would only hide that
                self.invalidate(id);
                Err(e)
            }
            Err(e) => match self.cache.get_stale(&key) {
                Some(stale) => {
                    warn!(record_id = %id, cache_key = %key, error = %e, "Fetch failed, serving stale record");
                    if self.store.get(id).is_none() {
                        self.store.publish(stale.clone());
                    }
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Fetch a record without the stale fallback and without touching the store.
    ///
    /// A valid cache entry is still used unless `skip_cache` is set. Errors are always
    /// returned to the caller, which is what the reconciliation poller needs to count
    /// consecutive failures.
    pub async fn fetch_fresh(
        &self,
        id: &str,
        options: FetchOptions,
        timeout: Duration,
    ) -> Result<ProductRecord, SyncError> {
        let key = options.cache_key(id);

        if !options.skip_cache {
            if let Some(record) = self.cache.get(&key) {
                debug!(record_id = %id, cache_key = %key, "Cache hit");
                return Ok(record);
            }
            trace!(record_id = %id, cache_key = %key, "Cache miss");
        }

        let query = RecordQuery {
            include_reviews: options.include_reviews,
            cache_bust: options
                .skip_cache
                .then(|| Utc::now().timestamp_millis().max(0) as u64),
            timeout: Some(timeout),
        };

        let source = Arc::clone(&self.source);
        let cache = self.cache.clone();
        let record_id = id.to_string();
        let cache_key = key.clone();

        self.coalescer
            .get(key, move || async move {
                let raw = tokio::time::timeout(timeout, source.fetch_record(&record_id, query))
                    .await
                    .map_err(|_| SyncError::Timeout(timeout))??;

                let record = normalize_record(raw)?;
                if record.id != record_id {
                    return Err(SyncError::Validation(format!(
                        "requested record {record_id}, backend returned {}",
                        record.id
                    )));
                }
                cache.set_default(cache_key, record.clone());
                Ok(record)
            })
            .await
    }

    /// Drop every cached variant of `id`.
    pub fn invalidate(&self, id: &str) {
        let prefix = format!("{id}:");
        self.cache
            .invalidate_where(|key| key.strip_prefix(&prefix).is_some_and(|rest| !rest.contains(':')));
    }

    /// Clear the cache and forget every in-flight registration.
    pub fn reset(&self) {
        self.cache.clear();
        self.coalescer.reset();
    }
}
