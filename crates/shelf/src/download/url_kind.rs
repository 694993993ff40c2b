use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Who serves a download URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlKind {
    GoogleStorage,
    FirebaseStorage,
    S3,
    /// Served by the storefront itself
    SameOrigin,
    Other,
}

impl UrlKind {
    /// Classify `url`, treating `origin` (when known) as the storefront's own origin.
    pub fn classify(url: &Url, origin: Option<&Url>) -> Self {
        let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
            return UrlKind::Other;
        };

        if host == "storage.googleapis.com"
            || host.ends_with(".storage.googleapis.com")
            || host == "storage.cloud.google.com"
        {
            return UrlKind::GoogleStorage;
        }
        if host == "firebasestorage.googleapis.com" || host.ends_with(".firebasestorage.app") {
            return UrlKind::FirebaseStorage;
        }
        if host.ends_with(".amazonaws.com") && host.contains("s3") {
            return UrlKind::S3;
        }
        let same_origin = origin.is_some_and(|origin| {
            origin.scheme() == url.scheme()
                && origin.host_str().is_some_and(|h| h.eq_ignore_ascii_case(&host))
                && origin.port_or_known_default() == url.port_or_known_default()
        });
        if same_origin {
            return UrlKind::SameOrigin;
        }
        UrlKind::Other
    }

    /// Storage providers sign their URLs and generally refuse cross-origin reads.
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            UrlKind::GoogleStorage | UrlKind::FirebaseStorage | UrlKind::S3
        )
    }
}

impl fmt::Display for UrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UrlKind::GoogleStorage => "google-storage",
            UrlKind::FirebaseStorage => "firebase-storage",
            UrlKind::S3 => "s3",
            UrlKind::SameOrigin => "same-origin",
            UrlKind::Other => "other",
        };
        f.write_str(name)
    }
}
