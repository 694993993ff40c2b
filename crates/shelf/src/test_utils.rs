//! Test doubles shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::Notify;
use url::Url;

use crate::SyncError;
use crate::backend::{DownloadBackend, RecordQuery, RecordSource, SignedDownload};
use crate::download::{
    ChoicePrompt, DeviceInfo, DownloadHost, DownloadReport, DownloadTarget, MobileChoice,
};

/// Origin the mock backend pretends to be served from.
pub const MOCK_ORIGIN: &str = "https://shop.example.com/";

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        $crate::init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

// Re-export the macro
pub use crate::init_test_tracing;

/// A complete record payload as the backend would return it.
pub fn record_json(id: &str, likes: u64) -> Value {
    json!({
        "id": id,
        "title": "Web Scraper Pro",
        "description": "Collects structured data from web pages",
        "category": "automation",
        "tags": ["scraping", "data"],
        "price": 19.99,
        "currency": "USD",
        "imageUrl": format!("https://cdn.example.net/img/{id}.png"),
        "creator": { "id": "u-1", "name": "Ada" },
        "likesCount": likes,
        "downloadCount": 42,
        "reviewCount": 2,
        "rating": { "average": 4.5, "count": 2 },
        "reviews": [
            { "id": "r1", "userId": "u-2", "userName": "Grace", "rating": 5, "comment": "Works great" },
            { "id": "r2", "userId": "u-3", "userName": "Linus", "rating": 4, "comment": "Solid" }
        ],
        "updatedAt": "2026-01-15T10:00:00Z"
    })
}

/// Wrap a payload in the `{ "data": ... }` envelope.
pub fn enveloped(payload: Value) -> Value {
    json!({ "data": payload })
}

/// Scripted in-memory backend.
///
/// Record requests are answered from, in order: the per-id script queue, a persistent
/// per-id failure, the stored records, and finally `NotFound`.
#[derive(Default)]
pub struct MockBackend {
    records: Mutex<HashMap<String, Value>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, SyncError>>>>,
    failures: Mutex<HashMap<String, SyncError>>,
    record_calls: Mutex<HashMap<String, usize>>,
    queries: Mutex<Vec<(String, RecordQuery)>>,
    gate: Mutex<Option<Arc<Notify>>>,

    download: Mutex<Option<Result<SignedDownload, SyncError>>>,
    download_requests: AtomicUsize,
    proxy_unavailable: AtomicBool,
    direct_fetch_error: Mutex<Option<SyncError>>,
    probes: Mutex<Vec<Url>>,
    fetched: Mutex<Vec<Url>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record payload under its `id` field, looking inside a `data` envelope.
    pub fn insert_record(&self, payload: Value) {
        let id = payload["id"]
            .as_str()
            .or_else(|| payload["data"]["id"].as_str())
            .unwrap_or_default()
            .to_string();
        self.records.lock().insert(id, payload);
    }

    pub fn remove_record(&self, id: &str) {
        self.records.lock().remove(id);
    }

    /// Queue a one-shot response for the next request for `id`.
    pub fn script_record(&self, id: &str, response: Result<Value, SyncError>) {
        self.scripted
            .lock()
            .entry(id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make every request for `id` fail until cleared with `None`.
    pub fn set_failure(&self, id: &str, failure: Option<SyncError>) {
        let mut failures = self.failures.lock();
        match failure {
            Some(err) => failures.insert(id.to_string(), err),
            None => failures.remove(id),
        };
    }

    /// Hold every record request until [`release_requests`](Self::release_requests).
    pub fn hold_requests(&self) {
        self.gate.lock().get_or_insert_with(|| Arc::new(Notify::new()));
    }

    pub fn release_requests(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.notify_waiters();
        }
    }

    pub fn record_calls(&self, id: &str) -> usize {
        self.record_calls.lock().get(id).copied().unwrap_or(0)
    }

    pub fn total_record_calls(&self) -> usize {
        self.record_calls.lock().values().sum()
    }

    pub fn record_queries(&self) -> Vec<(String, RecordQuery)> {
        self.queries.lock().clone()
    }

    pub fn set_download_url(&self, url: &str) {
        let signed = Url::parse(url)
            .map(|url| SignedDownload { url, filename: None })
            .map_err(SyncError::from);
        *self.download.lock() = Some(signed);
    }

    pub fn set_download(&self, signed: SignedDownload) {
        *self.download.lock() = Some(Ok(signed));
    }

    pub fn set_download_error(&self, err: SyncError) {
        *self.download.lock() = Some(Err(err));
    }

    pub fn set_proxy_available(&self, available: bool) {
        self.proxy_unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_direct_fetch_error(&self, err: Option<SyncError>) {
        *self.direct_fetch_error.lock() = err;
    }

    pub fn download_requests(&self) -> usize {
        self.download_requests.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> Vec<Url> {
        self.probes.lock().clone()
    }

    pub fn fetched(&self) -> Vec<Url> {
        self.fetched.lock().clone()
    }

    fn respond(&self, id: &str) -> Result<Value, SyncError> {
        if let Some(response) = self.scripted.lock().get_mut(id).and_then(VecDeque::pop_front) {
            return response;
        }
        if let Some(err) = self.failures.lock().get(id) {
            return Err(err.clone());
        }
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl RecordSource for MockBackend {
    async fn fetch_record(&self, id: &str, query: RecordQuery) -> Result<Value, SyncError> {
        *self.record_calls.lock().entry(id.to_string()).or_default() += 1;
        self.queries.lock().push((id.to_string(), query));

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let notified = gate.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // released between the clone and `enable`
            if self.gate.lock().is_some() {
                notified.await;
            }
        }

        self.respond(id)
    }
}

#[async_trait]
impl DownloadBackend for MockBackend {
    async fn request_download_url(&self, id: &str) -> Result<SignedDownload, SyncError> {
        self.download_requests.fetch_add(1, Ordering::SeqCst);
        self.download.lock().clone().unwrap_or_else(|| {
            Err(SyncError::DownloadUrlUnavailable(format!(
                "no download configured for {id}"
            )))
        })
    }

    fn proxy_url(&self, id: &str, target: &Url) -> Result<Url, SyncError> {
        let mut url = Url::parse(MOCK_ORIGIN)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(MOCK_ORIGIN.to_string()))?
            .pop_if_empty()
            .extend(["api", "proxy-download", id]);
        url.query_pairs_mut().append_pair("url", target.as_str());
        Ok(url)
    }

    async fn probe(&self, url: &Url) -> Result<(), SyncError> {
        self.probes.lock().push(url.clone());
        if url.path().contains("/proxy-download/") && self.proxy_unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Status(StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, SyncError> {
        self.fetched.lock().push(url.clone());
        match self.direct_fetch_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(Bytes::from_static(b"PK\x03\x04mock archive")),
        }
    }

    fn origin(&self) -> Option<Url> {
        Url::parse(MOCK_ORIGIN).ok()
    }
}

/// Every interaction a [`RecordingHost`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Prompt(ChoicePrompt),
    Trigger(DownloadTarget),
    CreateObjectUrl(String),
    RevokeObjectUrl(String),
    OpenExternal(String),
    Clipboard(String),
    Notify(Box<DownloadReport>),
}

/// A [`DownloadHost`] that records everything and can be told to block operations.
pub struct RecordingHost {
    device: DeviceInfo,
    choice: MobileChoice,
    trigger_blocked: bool,
    popups_blocked: bool,
    clipboard_blocked: bool,
    next_object: AtomicUsize,
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    pub fn new(device: DeviceInfo, choice: MobileChoice) -> Self {
        Self {
            device,
            choice,
            trigger_blocked: false,
            popups_blocked: false,
            clipboard_blocked: false,
            next_object: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn desktop() -> Self {
        Self::new(DeviceInfo::desktop(), MobileChoice::Download)
    }

    /// A mobile device whose user answers the prompt with `choice`.
    pub fn mobile(choice: MobileChoice) -> Self {
        Self::new(DeviceInfo::mobile(), choice)
    }

    pub fn with_trigger_blocked(mut self) -> Self {
        self.trigger_blocked = true;
        self
    }

    pub fn with_popups_blocked(mut self) -> Self {
        self.popups_blocked = true;
        self
    }

    pub fn with_clipboard_blocked(mut self) -> Self {
        self.clipboard_blocked = true;
        self
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    pub fn triggered(&self) -> Vec<DownloadTarget> {
        self.filter(|e| match e {
            HostEvent::Trigger(target) => Some(target.clone()),
            _ => None,
        })
    }

    pub fn object_urls_created(&self) -> Vec<String> {
        self.filter(|e| match e {
            HostEvent::CreateObjectUrl(url) => Some(url.clone()),
            _ => None,
        })
    }

    pub fn object_urls_revoked(&self) -> Vec<String> {
        self.filter(|e| match e {
            HostEvent::RevokeObjectUrl(url) => Some(url.clone()),
            _ => None,
        })
    }

    pub fn notified(&self) -> Vec<DownloadReport> {
        self.filter(|e| match e {
            HostEvent::Notify(report) => Some(report.as_ref().clone()),
            _ => None,
        })
    }

    fn filter<T>(&self, f: impl Fn(&HostEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl DownloadHost for RecordingHost {
    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    async fn trigger_download(&self, target: &DownloadTarget) -> Result<(), SyncError> {
        if self.trigger_blocked {
            return Err(SyncError::Host("download blocked".into()));
        }
        self.record(HostEvent::Trigger(target.clone()));
        Ok(())
    }

    async fn create_object_url(&self, _bytes: Bytes, _filename: &str) -> Result<String, SyncError> {
        let n = self.next_object.fetch_add(1, Ordering::SeqCst);
        let url = format!("blob:{MOCK_ORIGIN}{n}");
        self.record(HostEvent::CreateObjectUrl(url.clone()));
        Ok(url)
    }

    fn revoke_object_url(&self, object_url: &str) {
        self.record(HostEvent::RevokeObjectUrl(object_url.to_string()));
    }

    async fn open_external(&self, url: &Url) -> Result<(), SyncError> {
        if self.popups_blocked {
            return Err(SyncError::Host("popup blocked".into()));
        }
        self.record(HostEvent::OpenExternal(url.to_string()));
        Ok(())
    }

    async fn copy_to_clipboard(&self, text: &str) -> Result<(), SyncError> {
        if self.clipboard_blocked {
            return Err(SyncError::Host("clipboard unavailable".into()));
        }
        self.record(HostEvent::Clipboard(text.to_string()));
        Ok(())
    }

    async fn prompt_mobile_choice(&self, prompt: &ChoicePrompt) -> MobileChoice {
        self.record(HostEvent::Prompt(prompt.clone()));
        self.choice
    }

    fn notify(&self, report: &DownloadReport) {
        self.record(HostEvent::Notify(Box::new(report.clone())));
    }
}
