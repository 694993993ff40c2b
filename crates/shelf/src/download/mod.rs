//! # Download Resolver
//!
//! Turns a "download this record" action into a delivered file. The backend hands out a
//! short-lived signed URL, usually on a storage provider that refuses cross-origin
//! reads, so delivery walks an ordered chain of strategies and stops at the first one
//! that works:
//!
//! 1. Request a signed URL (failure is terminal)
//! 2. Classify the device; on mobile, ask the user first
//! 3. Walk the plan: proxy download, direct blob fetch, open in a new tab, clipboard
//!
//! The report is always handed to the host, because the backend has already counted the
//! download once step 1 succeeded.

pub mod device;
pub mod filename;
pub mod host;
pub mod report;
pub mod strategy;
pub mod url_kind;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use device::{DeviceClass, DeviceInfo};
pub use filename::download_filename;
pub use host::{ChoicePrompt, DownloadHost, DownloadTarget, MobileChoice};
pub use report::{
    AttemptStatus, DownloadAttempt, DownloadOutcome, DownloadReport, FailureReason, NextStep,
};
pub use strategy::{DOWNLOAD_PLAN, DeliveryStrategy, DownloadContext, OPEN_PLAN, StrategyKind, plan_for};
pub use url_kind::UrlKind;

use crate::SyncConfig;
use crate::backend::DownloadBackend;

/// Drives one download per call. Holds no state between calls.
#[derive(Clone)]
pub struct DownloadResolver {
    backend: Arc<dyn DownloadBackend>,
    proxy_enabled: bool,
}

impl DownloadResolver {
    pub fn new(config: &SyncConfig, backend: Arc<dyn DownloadBackend>) -> Self {
        Self {
            backend,
            proxy_enabled: config.proxy_download_enabled,
        }
    }

    /// Download record `id` into `host`. `title` only feeds the generated filename.
    ///
    /// Never fails: every outcome, including failures, is reported to the host and
    /// returned.
    pub async fn download(
        &self,
        id: &str,
        title: Option<&str>,
        host: &dyn DownloadHost,
    ) -> DownloadReport {
        let report = self.resolve(id, title, host).await;

        match &report.outcome {
            DownloadOutcome::Failed(reason) => warn!(
                record_id = %id,
                reason = ?reason,
                attempts = ?report.attempted_strategies(),
                "Download failed"
            ),
            outcome => info!(
                record_id = %id,
                outcome = ?outcome,
                strategy = ?report.succeeded_with(),
                "Download finished"
            ),
        }

        host.notify(&report);
        report
    }

    async fn resolve(&self, id: &str, title: Option<&str>, host: &dyn DownloadHost) -> DownloadReport {
        let device = host.device_info().classify();
        let mut report = DownloadReport {
            record_id: id.to_string(),
            filename: None,
            device,
            url_kind: None,
            url: None,
            choice: None,
            outcome: DownloadOutcome::Failed(FailureReason::TransportExhausted),
            attempts: Vec::new(),
        };

        let signed = match self.backend.request_download_url(id).await {
            Ok(signed) => signed,
            Err(e) => {
                warn!(record_id = %id, error = %e, "Could not obtain a download URL");
                report.outcome = DownloadOutcome::Failed(FailureReason::NoUrl(e.to_string()));
                return report;
            }
        };

        let origin = self.backend.origin();
        let url_kind = UrlKind::classify(&signed.url, origin.as_ref());
        let filename = download_filename(id, title, signed.filename.as_deref(), &signed.url);
        debug!(record_id = %id, device = %device, url_kind = %url_kind, filename = %filename, "Resolving download");

        report.url_kind = Some(url_kind);
        report.url = Some(signed.url.to_string());
        report.filename = Some(filename.clone());

        if device.is_mobile() {
            let prompt = ChoicePrompt {
                record_id: id.to_string(),
                filename: filename.clone(),
            };
            let choice = host.prompt_mobile_choice(&prompt).await;
            debug!(record_id = %id, choice = ?choice, "Mobile choice");
            report.choice = Some(choice);
        }

        let Some(plan) = plan_for(device, report.choice) else {
            report.outcome = DownloadOutcome::Failed(FailureReason::Cancelled);
            return report;
        };

        let ctx = DownloadContext {
            record_id: id,
            url: &signed.url,
            url_kind,
            filename: &filename,
            backend: self.backend.as_ref(),
            host,
            proxy_enabled: self.proxy_enabled,
        };

        for &kind in plan {
            let strategy = kind.strategy();

            if let Err(e) = strategy.probe(&ctx).await {
                debug!(record_id = %id, strategy = %kind, url_kind = %url_kind, error = %e, "Strategy skipped");
                report.attempts.push(DownloadAttempt {
                    strategy: kind,
                    status: AttemptStatus::Skipped,
                    error: Some(e.to_string()),
                });
                continue;
            }

            match strategy.attempt(&ctx).await {
                Ok(outcome) => {
                    report.attempts.push(DownloadAttempt {
                        strategy: kind,
                        status: AttemptStatus::Succeeded,
                        error: None,
                    });
                    report.outcome = outcome;
                    return report;
                }
                Err(e) => {
                    warn!(record_id = %id, strategy = %kind, url_kind = %url_kind, error = %e, "Strategy failed");
                    report.attempts.push(DownloadAttempt {
                        strategy: kind,
                        status: AttemptStatus::Failed,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report.outcome = DownloadOutcome::Failed(FailureReason::TransportExhausted);
        report
    }
}
