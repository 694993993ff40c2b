//! The environment a download is delivered into.
//!
//! In a browser this is the DOM: anchor clicks, blob URLs, `window.open` and the
//! clipboard. The engine only sees this trait, so the same resolver drives a terminal
//! front end or a scripted host in tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::SyncError;
use crate::download::device::DeviceInfo;
use crate::download::report::DownloadReport;

/// A file handed to the host's "save" mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// An http(s) URL or an object URL previously created by the host
    pub url: String,
    pub filename: String,
}

/// What the user is asked on mobile before any transport is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoicePrompt {
    pub record_id: String,
    pub filename: String,
}

impl ChoicePrompt {
    pub fn message(&self) -> String {
        format!(
            "Your browser may display {} instead of saving it. Open it in the browser, or try to download it?",
            self.filename
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MobileChoice {
    OpenInBrowser,
    Download,
    Dismissed,
}

#[async_trait]
pub trait DownloadHost: Send + Sync {
    fn device_info(&self) -> DeviceInfo;

    /// Save `target` under its filename (the anchor-click equivalent).
    async fn trigger_download(&self, target: &DownloadTarget) -> Result<(), SyncError>;

    /// Materialize bytes as a host-local URL that [`trigger_download`](Self::trigger_download) accepts.
    async fn create_object_url(&self, bytes: Bytes, filename: &str) -> Result<String, SyncError>;

    fn revoke_object_url(&self, object_url: &str);

    /// Open `url` outside the current view. Fails when the host blocks it.
    async fn open_external(&self, url: &Url) -> Result<(), SyncError>;

    async fn copy_to_clipboard(&self, text: &str) -> Result<(), SyncError>;

    async fn prompt_mobile_choice(&self, prompt: &ChoicePrompt) -> MobileChoice;

    /// Show the terminal outcome of a download to the user.
    fn notify(&self, report: &DownloadReport);
}

/// Revokes an object URL when dropped, so the URL is released on every exit path.
pub(crate) struct ObjectUrlGuard<'a> {
    host: &'a dyn DownloadHost,
    url: String,
}

impl<'a> ObjectUrlGuard<'a> {
    pub(crate) fn new(host: &'a dyn DownloadHost, url: String) -> Self {
        Self { host, url }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for ObjectUrlGuard<'_> {
    fn drop(&mut self) {
        self.host.revoke_object_url(&self.url);
    }
}
