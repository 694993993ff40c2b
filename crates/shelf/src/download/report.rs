use std::fmt;

use serde::{Deserialize, Serialize};

use crate::download::device::DeviceClass;
use crate::download::host::MobileChoice;
use crate::download::strategy::StrategyKind;
use crate::download::url_kind::UrlKind;

/// Terminal result of one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum DownloadOutcome {
    Delivered,
    OpenedExternally,
    UrlCopiedToClipboard,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The backend did not produce a download URL
    NoUrl(String),
    /// Every delivery strategy failed
    TransportExhausted,
    /// The user dismissed the mobile prompt
    Cancelled,
}

/// What the user can do after a failed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NextStep {
    Retry,
    OpenInTab,
    CopyUrl,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DownloadOutcome::Failed(_))
    }

    pub fn next_step(&self) -> Option<NextStep> {
        match self {
            DownloadOutcome::Failed(FailureReason::NoUrl(_)) => Some(NextStep::Retry),
            DownloadOutcome::Failed(FailureReason::Cancelled) => Some(NextStep::Retry),
            DownloadOutcome::Failed(FailureReason::TransportExhausted) => Some(NextStep::CopyUrl),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Delivered => write!(f, "file delivered"),
            DownloadOutcome::OpenedExternally => write!(f, "opened in a new tab"),
            DownloadOutcome::UrlCopiedToClipboard => {
                write!(f, "download link copied to the clipboard, paste it into your browser")
            }
            DownloadOutcome::Failed(FailureReason::NoUrl(msg)) => {
                write!(f, "no download link available ({msg})")
            }
            DownloadOutcome::Failed(FailureReason::TransportExhausted) => {
                write!(f, "the file could not be delivered")
            }
            DownloadOutcome::Failed(FailureReason::Cancelled) => write!(f, "download cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    /// The probe ruled the strategy out
    Skipped,
    Failed,
    Succeeded,
}

/// One step of the strategy chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadAttempt {
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
    pub error: Option<String>,
}

/// Everything that happened during one download, handed to the host at the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReport {
    pub record_id: String,
    pub filename: Option<String>,
    pub device: DeviceClass,
    pub url_kind: Option<UrlKind>,
    /// The signed URL, kept so a failed download can still offer it to the user
    pub url: Option<String>,
    pub choice: Option<MobileChoice>,
    pub outcome: DownloadOutcome,
    pub attempts: Vec<DownloadAttempt>,
}

impl DownloadReport {
    /// Strategies whose probe or attempt actually ran, in order.
    pub fn attempted_strategies(&self) -> Vec<StrategyKind> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }

    pub fn succeeded_with(&self) -> Option<StrategyKind> {
        self.attempts
            .iter()
            .find(|a| a.status == AttemptStatus::Succeeded)
            .map(|a| a.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_steps() {
        assert_eq!(DownloadOutcome::Delivered.next_step(), None);
        assert_eq!(
            DownloadOutcome::Failed(FailureReason::NoUrl("HTTP 500".into())).next_step(),
            Some(NextStep::Retry)
        );
        assert_eq!(
            DownloadOutcome::Failed(FailureReason::TransportExhausted).next_step(),
            Some(NextStep::CopyUrl)
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(DownloadOutcome::Failed(FailureReason::TransportExhausted)).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "transport-exhausted");
        let json = serde_json::to_value(DownloadOutcome::Delivered).unwrap();
        assert_eq!(json["status"], "delivered");
    }
}
