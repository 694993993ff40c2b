//! # Sync Service
//!
//! The single entry point a front end talks to. Construct one per application and pass
//! clones around; all clones share the same cache, in-flight map, record store and
//! visibility flag.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{DownloadBackend, HttpBackend, RecordSource};
use crate::download::{DownloadHost, DownloadReport, DownloadResolver};
use crate::fetcher::{FetchOptions, RecordFetcher};
use crate::poller::{PollHandle, PollState, ReconciliationPoller, Visibility};
use crate::record::{DEFAULT_TITLE, ProductRecord, Review};
use crate::store::RecordStore;
use crate::{SyncConfig, SyncError};

struct Inner {
    config: SyncConfig,
    store: RecordStore,
    fetcher: RecordFetcher,
    poller: ReconciliationPoller,
    resolver: DownloadResolver,
    visibility: Visibility,
}

#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn RecordSource>,
        downloads: Arc<dyn DownloadBackend>,
    ) -> Self {
        let store = RecordStore::new();
        let visibility = Visibility::new();
        let fetcher = RecordFetcher::new(&config, source, store.clone());
        let poller =
            ReconciliationPoller::new(&config, fetcher.clone(), store.clone(), visibility.clone());
        let resolver = DownloadResolver::new(&config, downloads);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                fetcher,
                poller,
                resolver,
                visibility,
            }),
        }
    }

    /// Build a service over one backend that serves both records and downloads.
    pub fn with_backend<B>(config: SyncConfig, backend: Arc<B>) -> Self
    where
        B: RecordSource + DownloadBackend + 'static,
    {
        let source: Arc<dyn RecordSource> = backend.clone();
        let downloads: Arc<dyn DownloadBackend> = backend;
        Self::new(config, source, downloads)
    }

    /// Build a service talking to the REST backend described by `config`.
    pub fn http(config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let backend = Arc::new(HttpBackend::new(&config)?);
        info!(api_base = %config.api_base_url, "Sync service ready");
        Ok(Self::with_backend(config, backend))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    pub fn fetcher(&self) -> &RecordFetcher {
        &self.inner.fetcher
    }

    pub fn visibility(&self) -> &Visibility {
        &self.inner.visibility
    }

    pub async fn fetch_record(
        &self,
        id: &str,
        options: FetchOptions,
    ) -> Result<ProductRecord, SyncError> {
        self.inner.fetcher.fetch(id, options).await
    }

    /// Force a fresh copy of `id`. Shares the poller's cache key, so a refresh issued
    /// while a poll is running joins it.
    pub async fn refresh(&self, id: &str) -> Result<ProductRecord, SyncError> {
        let options = FetchOptions::new()
            .skip_cache(true)
            .with_reviews(self.inner.config.poll_include_reviews);
        self.inner.fetcher.fetch(id, options).await
    }

    /// Keep `id` fresh in the background until the subscription is dropped.
    pub fn subscribe_to_reconciliation<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn(&ProductRecord) + Send + Sync + 'static,
    {
        Subscription {
            handle: self.inner.poller.start_polling(id, callback),
        }
    }

    /// Download the file attached to `id` into `host`.
    pub async fn download(&self, id: &str, host: &dyn DownloadHost) -> DownloadReport {
        let title = self
            .inner
            .store
            .get(id)
            .map(|record| record.title)
            .filter(|title| title != DEFAULT_TITLE);

        let report = self.inner.resolver.download(id, title.as_deref(), host).await;
        if report.url.is_some() {
            // the backend counted this download
            self.inner.fetcher.invalidate(id);
        }
        report
    }

    /// Reflect a like or unlike immediately. Returns `false` when `id` is not loaded.
    pub fn like(&self, id: &str, liked: bool) -> bool {
        let applied = self.inner.store.apply_like(id, liked);
        self.inner.fetcher.invalidate(id);
        applied
    }

    /// Show a freshly posted review immediately. Returns `false` when `id` is not loaded.
    pub fn add_review(&self, id: &str, review: Review) -> bool {
        let applied = self.inner.store.apply_review(id, review);
        self.inner.fetcher.invalidate(id);
        applied
    }

    /// Drop cached records, in-flight registrations and displayed records.
    pub fn reset(&self) {
        self.inner.fetcher.reset();
        self.inner.store.clear();
        debug!("Sync service reset");
    }
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("api_base_url", &self.inner.config.api_base_url)
            .finish_non_exhaustive()
    }
}

/// A running reconciliation subscription. Dropping it stops polling.
#[derive(Debug)]
pub struct Subscription {
    handle: PollHandle,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.handle.stop();
    }

    pub fn handle(&self) -> &PollHandle {
        &self.handle
    }

    pub fn state(&self) -> PollState {
        self.handle.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBackend, RecordingHost, record_json};

    fn service() -> (SyncService, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 10));
        (SyncService::with_backend(SyncConfig::default(), backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_like_invalidates_cache() {
        let (service, backend) = service();
        service.fetch_record("agent-1", FetchOptions::new()).await.unwrap();

        assert!(service.like("agent-1", true));
        assert_eq!(service.store().get("agent-1").unwrap().likes_count, Some(11));

        backend.insert_record(record_json("agent-1", 11));
        service.fetch_record("agent-1", FetchOptions::new()).await.unwrap();
        assert_eq!(backend.record_calls("agent-1"), 2);
        let current = service.store().get("agent-1").unwrap();
        assert_eq!(current.likes_count, Some(11));
        assert_eq!(current.liked_by_viewer, Some(true));
    }

    #[tokio::test]
    async fn test_download_uses_displayed_title() {
        let (service, backend) = service();
        backend.set_download_url("https://cdn.example.net/files/bundle.zip");
        backend.set_proxy_available(false);
        service.fetch_record("agent-1", FetchOptions::new()).await.unwrap();

        let host = RecordingHost::desktop();
        let report = service.download("agent-1", &host).await;
        assert_eq!(report.filename.as_deref(), Some("web-scraper-pro-agent-1.zip"));
        assert!(!service.fetcher().cache().contains(&"agent-1:basic".to_string()));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (service, backend) = service();
        service.fetch_record("agent-1", FetchOptions::new()).await.unwrap();

        service.reset();
        assert!(service.store().get("agent-1").is_none());
        service.fetch_record("agent-1", FetchOptions::new()).await.unwrap();
        assert_eq!(backend.record_calls("agent-1"), 2);
    }
}
