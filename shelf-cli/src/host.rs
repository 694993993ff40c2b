//! A [`DownloadHost`] backed by the local filesystem and the terminal.
//!
//! Saving a file writes it under the output directory. Opening a URL and copying to the
//! clipboard both print the URL, since a terminal has neither a browser tab nor a
//! clipboard it can rely on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use shelf_engine::download::ChoicePrompt;
use shelf_engine::download::filename::sanitize;
use shelf_engine::{
    DeviceInfo, DownloadHost, DownloadReport, DownloadTarget, MobileChoice, SyncError,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

const OBJECT_URL_PREFIX: &str = "blob:shelf/";

pub struct TerminalHost {
    client: Client,
    output_dir: PathBuf,
    device: DeviceInfo,
    choice: MobileChoice,
    objects: Mutex<HashMap<String, Bytes>>,
    next_object: AtomicUsize,
    saved: Mutex<Vec<PathBuf>>,
}

impl TerminalHost {
    pub fn new(
        client: Client,
        output_dir: impl Into<PathBuf>,
        device: DeviceInfo,
        choice: MobileChoice,
    ) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            device,
            choice,
            objects: Mutex::new(HashMap::new()),
            next_object: AtomicUsize::new(0),
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Files written so far.
    pub fn saved(&self) -> Vec<PathBuf> {
        self.saved.lock().clone()
    }

    fn destination(&self, filename: &str) -> PathBuf {
        let name = sanitize(filename);
        let name = if name.trim_matches('.').is_empty() {
            "download".to_string()
        } else {
            name
        };
        self.output_dir.join(name)
    }

    async fn save_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SyncError::Host(format!("create {}: {e}", self.output_dir.display())))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| SyncError::Host(format!("write {}: {e}", path.display())))
    }

    /// Stream `url` into a temporary file next to `path`, renaming it into place once the
    /// body is complete. A failed transfer leaves nothing behind.
    async fn save_remote(&self, url: &str, path: &Path) -> Result<u64, SyncError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status));
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SyncError::Host(format!("create {}: {e}", self.output_dir.display())))?;
        let (file, part_path) = tempfile::Builder::new()
            .prefix(".shelf-")
            .suffix(".part")
            .tempfile_in(&self.output_dir)
            .map_err(|e| SyncError::Host(format!("create in {}: {e}", self.output_dir.display())))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::Host(format!("write {}: {e}", part_path.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| SyncError::Host(format!("flush {}: {e}", part_path.display())))?;
        drop(file);

        part_path
            .persist(path)
            .map_err(|e| SyncError::Host(format!("rename to {}: {e}", path.display())))?;
        Ok(written)
    }
}

#[async_trait]
impl DownloadHost for TerminalHost {
    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    async fn trigger_download(&self, target: &DownloadTarget) -> Result<(), SyncError> {
        let path = self.destination(&target.filename);

        if target.url.starts_with(OBJECT_URL_PREFIX) {
            let bytes = self
                .objects
                .lock()
                .get(&target.url)
                .cloned()
                .ok_or_else(|| SyncError::Host(format!("unknown object URL {}", target.url)))?;
            self.save_bytes(&path, &bytes).await?;
            debug!(path = %path.display(), size = bytes.len(), "Saved object URL");
        } else {
            let size = self.save_remote(&target.url, &path).await?;
            debug!(path = %path.display(), size, "Saved remote file");
        }

        info!("Saved {}", path.display());
        self.saved.lock().push(path);
        Ok(())
    }

    async fn create_object_url(&self, bytes: Bytes, filename: &str) -> Result<String, SyncError> {
        let n = self.next_object.fetch_add(1, Ordering::Relaxed);
        let url = format!("{OBJECT_URL_PREFIX}{n}");
        debug!(%url, filename, size = bytes.len(), "Created object URL");
        self.objects.lock().insert(url.clone(), bytes);
        Ok(url)
    }

    fn revoke_object_url(&self, object_url: &str) {
        self.objects.lock().remove(object_url);
    }

    async fn open_external(&self, url: &Url) -> Result<(), SyncError> {
        println!("Open this link in your browser:\n  {url}");
        Ok(())
    }

    async fn copy_to_clipboard(&self, text: &str) -> Result<(), SyncError> {
        println!("{text}");
        Ok(())
    }

    async fn prompt_mobile_choice(&self, prompt: &ChoicePrompt) -> MobileChoice {
        info!("{}", prompt.message());
        info!("Answering with {:?}", self.choice);
        self.choice
    }

    fn notify(&self, report: &DownloadReport) {
        if report.outcome.is_success() {
            info!("{}: {}", report.record_id, report.outcome);
            return;
        }

        warn!("{}: {}", report.record_id, report.outcome);
        for attempt in &report.attempts {
            warn!(
                "  {} {:?}{}",
                attempt.strategy,
                attempt.status,
                attempt
                    .error
                    .as_deref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default()
            );
        }
        if let Some(step) = report.outcome.next_step() {
            warn!("Suggested next step: {step:?}");
        }
        if let Some(url) = &report.url {
            warn!("Direct link: {url}");
        }
    }
}
