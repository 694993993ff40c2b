//! Delivery strategies and the plans that order them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::SyncError;
use crate::backend::DownloadBackend;
use crate::download::device::DeviceClass;
use crate::download::host::{DownloadHost, DownloadTarget, MobileChoice, ObjectUrlGuard};
use crate::download::report::DownloadOutcome;
use crate::download::url_kind::UrlKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    ProxyDownload,
    DirectFetchBlob,
    OpenInNewTab,
    ClipboardFallback,
}

impl StrategyKind {
    pub fn strategy(self) -> &'static dyn DeliveryStrategy {
        match self {
            StrategyKind::ProxyDownload => &ProxyDownload,
            StrategyKind::DirectFetchBlob => &DirectFetchBlob,
            StrategyKind::OpenInNewTab => &OpenInNewTab,
            StrategyKind::ClipboardFallback => &ClipboardFallback,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::ProxyDownload => "proxy-download",
            StrategyKind::DirectFetchBlob => "direct-fetch-blob",
            StrategyKind::OpenInNewTab => "open-in-new-tab",
            StrategyKind::ClipboardFallback => "clipboard-fallback",
        };
        f.write_str(name)
    }
}

/// Full chain used on desktop and when a mobile user asks for a download.
pub const DOWNLOAD_PLAN: &[StrategyKind] = &[
    StrategyKind::ProxyDownload,
    StrategyKind::DirectFetchBlob,
    StrategyKind::OpenInNewTab,
    StrategyKind::ClipboardFallback,
];

/// Chain used when a mobile user asks to open the file in the browser.
pub const OPEN_PLAN: &[StrategyKind] = &[StrategyKind::OpenInNewTab, StrategyKind::ClipboardFallback];

/// The strategy chain for a device and, on mobile, the user's answer to the prompt.
///
/// Returns `None` when there is nothing to attempt: a dismissed prompt, or a mobile
/// device that was not asked yet.
pub fn plan_for(device: DeviceClass, choice: Option<MobileChoice>) -> Option<&'static [StrategyKind]> {
    match (device, choice) {
        (DeviceClass::Desktop, _) => Some(DOWNLOAD_PLAN),
        (DeviceClass::Mobile, Some(MobileChoice::Download)) => Some(DOWNLOAD_PLAN),
        (DeviceClass::Mobile, Some(MobileChoice::OpenInBrowser)) => Some(OPEN_PLAN),
        (DeviceClass::Mobile, Some(MobileChoice::Dismissed) | None) => None,
    }
}

/// Everything a strategy needs for one download.
pub struct DownloadContext<'a> {
    pub record_id: &'a str,
    pub url: &'a Url,
    pub url_kind: UrlKind,
    pub filename: &'a str,
    pub backend: &'a dyn DownloadBackend,
    pub host: &'a dyn DownloadHost,
    pub proxy_enabled: bool,
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Cheap check whether [`attempt`](Self::attempt) can work at all.
    async fn probe(&self, ctx: &DownloadContext<'_>) -> Result<(), SyncError>;

    async fn attempt(&self, ctx: &DownloadContext<'_>) -> Result<DownloadOutcome, SyncError>;
}

/// Re-stream the file through the same-origin proxy, sidestepping CORS.
pub struct ProxyDownload;

#[async_trait]
impl DeliveryStrategy for ProxyDownload {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProxyDownload
    }

    async fn probe(&self, ctx: &DownloadContext<'_>) -> Result<(), SyncError> {
        if !ctx.proxy_enabled {
            return Err(SyncError::NotApplicable("proxy download disabled".into()));
        }
        let proxy = ctx.backend.proxy_url(ctx.record_id, ctx.url)?;
        ctx.backend.probe(&proxy).await
    }

    async fn attempt(&self, ctx: &DownloadContext<'_>) -> Result<DownloadOutcome, SyncError> {
        let proxy = ctx.backend.proxy_url(ctx.record_id, ctx.url)?;
        debug!(record_id = %ctx.record_id, proxy_url = %proxy, "Triggering proxied download");
        ctx.host
            .trigger_download(&DownloadTarget {
                url: proxy.to_string(),
                filename: ctx.filename.to_string(),
            })
            .await?;
        Ok(DownloadOutcome::Delivered)
    }
}

/// Fetch the bytes directly and save them through an object URL.
pub struct DirectFetchBlob;

#[async_trait]
impl DeliveryStrategy for DirectFetchBlob {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectFetchBlob
    }

    async fn probe(&self, ctx: &DownloadContext<'_>) -> Result<(), SyncError> {
        if ctx.url_kind.is_provider() {
            return Err(SyncError::NotApplicable(format!(
                "{} URLs cannot be read cross-origin",
                ctx.url_kind
            )));
        }
        Ok(())
    }

    async fn attempt(&self, ctx: &DownloadContext<'_>) -> Result<DownloadOutcome, SyncError> {
        let bytes = ctx.backend.fetch_bytes(ctx.url).await?;
        debug!(record_id = %ctx.record_id, size = bytes.len(), "Fetched file body");

        let object_url = ctx.host.create_object_url(bytes, ctx.filename).await?;
        let guard = ObjectUrlGuard::new(ctx.host, object_url);
        ctx.host
            .trigger_download(&DownloadTarget {
                url: guard.url().to_string(),
                filename: ctx.filename.to_string(),
            })
            .await?;
        Ok(DownloadOutcome::Delivered)
    }
}

/// Open the signed URL so the user can save it by hand.
pub struct OpenInNewTab;

#[async_trait]
impl DeliveryStrategy for OpenInNewTab {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OpenInNewTab
    }

    async fn probe(&self, _ctx: &DownloadContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    async fn attempt(&self, ctx: &DownloadContext<'_>) -> Result<DownloadOutcome, SyncError> {
        ctx.host.open_external(ctx.url).await?;
        Ok(DownloadOutcome::OpenedExternally)
    }
}

/// Copy the signed URL so the user can paste it somewhere that works.
pub struct ClipboardFallback;

#[async_trait]
impl DeliveryStrategy for ClipboardFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ClipboardFallback
    }

    async fn probe(&self, _ctx: &DownloadContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    async fn attempt(&self, ctx: &DownloadContext<'_>) -> Result<DownloadOutcome, SyncError> {
        ctx.host.copy_to_clipboard(ctx.url.as_str()).await?;
        Ok(DownloadOutcome::UrlCopiedToClipboard)
    }
}
