//! # Reconciliation Poller
//!
//! Keeps a displayed record fresh at low frequency. Each poll runs as a tokio task owned
//! by a [`PollHandle`]; results are merged field by field into the [`RecordStore`] so
//! that partial responses and optimistic local edits survive.
//!
//! ```text
//! Idle -> Scheduled -> Fetching -> Merging -> Scheduled -> ...
//!             |                         ^
//!             v                         |
//!           Paused ---(visible/resumed)-+
//! ```
//!
//! Polling stops after `failure_threshold` consecutive failures, on the first
//! `NotFound`, or when the handle is stopped or dropped. Failures are never surfaced to
//! the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::SyncConfig;
use crate::fetcher::{FetchOptions, RecordFetcher};
use crate::record::ProductRecord;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The handle was stopped or dropped
    Cancelled,
    /// The record no longer exists
    NotFound,
    /// Too many consecutive failures
    FailureThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Scheduled,
    Fetching,
    Merging,
    Paused,
    Stopped(StopReason),
}

impl PollState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, PollState::Stopped(_))
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Idle => write!(f, "idle"),
            PollState::Scheduled => write!(f, "scheduled"),
            PollState::Fetching => write!(f, "fetching"),
            PollState::Merging => write!(f, "merging"),
            PollState::Paused => write!(f, "paused"),
            PollState::Stopped(reason) => write!(f, "stopped ({reason:?})"),
        }
    }
}

/// Whether the viewing surface is currently visible.
///
/// Cloning shares the same flag. Pollers check it before every tick and wait while it is
/// `false`.
#[derive(Clone)]
pub struct Visibility {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new()
    }
}

impl Visibility {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(true)),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
        if changed {
            debug!(visible = visible, "Visibility changed");
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy)]
struct PollSettings {
    interval: Duration,
    jitter: Duration,
    staleness_window: Duration,
    failure_threshold: u32,
    timeout: Duration,
    include_reviews: bool,
}

impl PollSettings {
    fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: config.poll_interval,
            jitter: config.poll_jitter.min(config.poll_interval),
            staleness_window: config.staleness_window,
            failure_threshold: config.failure_threshold.max(1),
            timeout: config.poll_timeout,
            include_reviews: config.poll_include_reviews,
        }
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let offset = rand::rng().random_range(0..=jitter_ms.saturating_mul(2));
        self.interval
            .saturating_add(Duration::from_millis(offset))
            .saturating_sub(self.jitter)
    }
}

#[derive(Clone)]
pub struct ReconciliationPoller {
    fetcher: RecordFetcher,
    store: RecordStore,
    visibility: Visibility,
    settings: PollSettings,
}

impl ReconciliationPoller {
    pub fn new(
        config: &SyncConfig,
        fetcher: RecordFetcher,
        store: RecordStore,
        visibility: Visibility,
    ) -> Self {
        Self {
            fetcher,
            store,
            visibility,
            settings: PollSettings::from_config(config),
        }
    }

    /// Override the poll interval, e.g. for a view that wants faster updates.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.settings.interval = interval;
        }
        self
    }

    /// Start polling `id` in the background.
    ///
    /// `callback` runs after every merge that changed the displayed record and receives
    /// the merged record. Must be called from within a tokio runtime.
    pub fn start_polling<F>(&self, id: impl Into<String>, callback: F) -> PollHandle
    where
        F: Fn(&ProductRecord) + Send + Sync + 'static,
    {
        let id = id.into();
        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);
        let state = Arc::new(watch::Sender::new(PollState::Idle));

        let task = PollTask {
            id: id.clone(),
            poller: self.clone(),
            callback: Arc::new(callback),
            cancel: cancel.clone(),
            paused: paused_rx,
            visible: self.visibility.subscribe(),
            state: Arc::clone(&state),
        };

        debug!(record_id = %id, interval_secs = self.settings.interval.as_secs(), "Starting reconciliation poller");
        let join = tokio::spawn(task.run());

        PollHandle {
            id,
            cancel,
            paused: paused_tx,
            state,
            task: join,
        }
    }
}

/// Owner of one running poll loop. Dropping the handle stops polling.
pub struct PollHandle {
    id: String,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    state: Arc<watch::Sender<PollState>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn record_id(&self) -> &str {
        &self.id
    }

    /// Suspend polling from the next tick on.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Resume polling. A poller waiting in `Paused` ticks immediately.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Stop polling. Takes effect synchronously: no further fetch is issued.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
        transition(&self.state, PollState::Stopped(StopReason::Cancelled));
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if !self.is_stopped() {
            trace!(record_id = %self.id, "Poll handle dropped");
        }
        self.stop();
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Move to `next` unless polling has already stopped.
fn transition(state: &watch::Sender<PollState>, next: PollState) {
    state.send_if_modified(|current| {
        if current.is_stopped() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

type Callback = Arc<dyn Fn(&ProductRecord) + Send + Sync>;

struct PollTask {
    id: String,
    poller: ReconciliationPoller,
    callback: Callback,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    visible: watch::Receiver<bool>,
    state: Arc<watch::Sender<PollState>>,
}

impl PollTask {
    async fn run(mut self) {
        let reason = self.poll_loop().await;
        match reason {
            StopReason::Cancelled => debug!(record_id = %self.id, "Reconciliation poller cancelled"),
            _ => info!(record_id = %self.id, reason = ?reason, "Reconciliation poller stopped"),
        }
        transition(&self.state, PollState::Stopped(reason));
    }

    async fn poll_loop(&mut self) -> StopReason {
        let settings = self.poller.settings;
        let mut failures = 0u32;
        // the view loaded the record right before polling started
        let mut last_success = Instant::now();

        loop {
            transition(&self.state, PollState::Scheduled);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StopReason::Cancelled,
                _ = tokio::time::sleep(settings.next_delay()) => {}
            }

            if !self.wait_until_active().await {
                return StopReason::Cancelled;
            }

            let skip_cache = last_success.elapsed() >= settings.staleness_window;
            let options = FetchOptions::new()
                .skip_cache(skip_cache)
                .with_reviews(settings.include_reviews);

            transition(&self.state, PollState::Fetching);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StopReason::Cancelled,
                result = self.poller.fetcher.fetch_fresh(&self.id, options, settings.timeout) => result,
            };

            match result {
                Ok(fresh) => {
                    failures = 0;
                    last_success = Instant::now();

                    transition(&self.state, PollState::Merging);
                    let outcome = self.poller.store.reconcile(&fresh);
                    if outcome.changed() {
                        debug!(record_id = %self.id, fields = ?outcome.changed_fields, "Merged fresh record");
                        if let Some(merged) = self.poller.store.get(&self.id) {
                            (self.callback)(&merged);
                        }
                    } else {
                        trace!(record_id = %self.id, "Poll found no changes");
                    }
                }
                Err(e) if e.is_not_found() => {
                    self.poller.fetcher.invalidate(&self.id);
                    return StopReason::NotFound;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        record_id = %self.id,
                        error = %e,
                        failures = failures,
                        threshold = settings.failure_threshold,
                        "Reconciliation poll failed"
                    );
                    if failures >= settings.failure_threshold {
                        return StopReason::FailureThreshold;
                    }
                }
            }
        }
    }

    /// Block while the surface is hidden or the handle is paused. Returns `false` when
    /// polling was cancelled while waiting.
    async fn wait_until_active(&mut self) -> bool {
        let mut announced = false;
        loop {
            let visible = *self.visible.borrow_and_update();
            let paused = *self.paused.borrow_and_update();
            if visible && !paused {
                if announced {
                    debug!(record_id = %self.id, "Reconciliation poller resumed");
                }
                return true;
            }
            if !announced {
                debug!(record_id = %self.id, visible = visible, paused = paused, "Reconciliation poller paused");
                transition(&self.state, PollState::Paused);
                announced = true;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = self.visible.changed() => if changed.is_err() { return false },
                changed = self.paused.changed() => if changed.is_err() { return false },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;
    use crate::backend::RecordSource;
    use crate::test_utils::{MockBackend, record_json};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(60);

    fn poller(backend: &Arc<MockBackend>) -> (ReconciliationPoller, RecordStore, Visibility) {
        let config = SyncConfig::builder()
            .with_poll_interval(INTERVAL)
            .with_staleness_window(Duration::from_secs(600))
            .with_cache_ttl(Duration::from_secs(1))
            .build()
            .unwrap();
        let store = RecordStore::new();
        let source: Arc<dyn RecordSource> = backend.clone();
        let fetcher = RecordFetcher::new(&config, source, store.clone());
        let visibility = Visibility::new();
        let poller = ReconciliationPoller::new(&config, fetcher, store.clone(), visibility.clone());
        (poller, store, visibility)
    }

    async fn wait_for_stop(handle: &PollHandle) -> PollState {
        let mut rx = handle.watch_state();
        *rx.wait_for(|state| state.is_stopped()).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_consecutive_failures() {
        let backend = Arc::new(MockBackend::new());
        backend.set_failure("agent-3", Some(SyncError::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("agent-3", |_| {});
        let state = wait_for_stop(&handle).await;
        assert_eq!(state, PollState::Stopped(StopReason::FailureThreshold));
        assert_eq!(backend.record_calls("agent-3"), 3);

        tokio::time::sleep(INTERVAL * 10).await;
        assert_eq!(backend.record_calls("agent-3"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_stops_immediately() {
        let backend = Arc::new(MockBackend::new());
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("gone", |_| {});
        assert_eq!(
            wait_for_stop(&handle).await,
            PollState::Stopped(StopReason::NotFound)
        );
        assert_eq!(backend.record_calls("gone"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 1));
        let err = || Err(SyncError::Status(StatusCode::BAD_GATEWAY));
        backend.script_record("agent-1", err());
        backend.script_record("agent-1", err());
        backend.script_record("agent-1", Ok(record_json("agent-1", 2)));
        backend.script_record("agent-1", err());
        backend.script_record("agent-1", err());
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("agent-1", |_| {});
        tokio::time::sleep(INTERVAL * 5 + Duration::from_secs(1)).await;
        assert!(!handle.is_stopped());
        assert_eq!(backend.record_calls("agent-1"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_receives_merged_record() {
        let backend = Arc::new(MockBackend::new());
        let mut fresh = record_json("agent-1", 8);
        fresh.as_object_mut().unwrap().remove("reviews");
        backend.insert_record(fresh);
        let (poller, store, _) = poller(&backend);

        let mut displayed = crate::record::normalize_record(record_json("agent-1", 5)).unwrap();
        displayed.liked_by_viewer = Some(true);
        let reviews_before = displayed.reviews.len();
        assert!(reviews_before > 0);
        store.publish(displayed);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = poller.start_polling("agent-1", move |record| {
            assert_eq!(record.likes_count, Some(8));
            assert_eq!(record.reviews.len(), reviews_before);
            assert_eq!(record.liked_by_viewer, Some(true));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
        // only the first merge changed anything
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_surface_pauses_polling() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 1));
        let (poller, _, visibility) = poller(&backend);

        visibility.set_visible(false);
        let handle = poller.start_polling("agent-1", |_| {});
        tokio::time::sleep(INTERVAL * 4).await;
        assert_eq!(handle.state(), PollState::Paused);
        assert_eq!(backend.record_calls("agent-1"), 0);

        visibility.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.record_calls("agent-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 1));
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("agent-1", |_| {});
        handle.pause();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(handle.state(), PollState::Paused);
        assert_eq!(backend.record_calls("agent-1"), 0);

        handle.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.record_calls("agent-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_synchronous_and_final() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 1));
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("agent-1", |_| {});
        handle.stop();
        assert_eq!(handle.state(), PollState::Stopped(StopReason::Cancelled));

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(backend.record_calls("agent-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_record(record_json("agent-1", 1));
        let (poller, _, _) = poller(&backend);

        let handle = poller.start_polling("agent-1", |_| {});
        let state = handle.watch_state();
        drop(handle);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(*state.borrow(), PollState::Stopped(StopReason::Cancelled));
        assert_eq!(backend.record_calls("agent-1"), 0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let settings = PollSettings {
            interval: Duration::from_secs(100),
            jitter: Duration::from_secs(10),
            staleness_window: Duration::from_secs(1),
            failure_threshold: 3,
            timeout: Duration::from_secs(1),
            include_reviews: true,
        };
        for _ in 0..100 {
            let delay = settings.next_delay();
            assert!(delay >= Duration::from_secs(90) && delay <= Duration::from_secs(110));
        }
    }

    #[test]
    fn test_oversized_jitter_is_clamped_to_interval() {
        let config = SyncConfig {
            poll_interval: Duration::from_secs(60),
            poll_jitter: Duration::MAX,
            ..SyncConfig::default()
        };
        let settings = PollSettings::from_config(&config);
        assert_eq!(settings.jitter, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(settings.next_delay() <= Duration::from_secs(120));
        }

        let unclamped = PollSettings {
            jitter: Duration::MAX,
            ..settings
        };
        for _ in 0..100 {
            unclamped.next_delay();
        }
    }
}
