use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SyncError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Tunables for the sync engine.
///
/// Every knob that the storefront tunes per deployment lives here: cache TTL, poll
/// cadence, failure threshold and the request timeouts. Durations are stored as whole
/// seconds in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the REST API, e.g. `https://shop.example.com/api`
    pub api_base_url: String,

    /// Base URL of the same-origin download proxy; falls back to `api_base_url`
    pub proxy_base_url: Option<String>,

    /// TTL for cached product records
    #[serde(rename = "cache_ttl_secs", with = "secs")]
    pub cache_ttl: Duration,

    /// Upper bound on resident cache entries
    pub cache_max_entries: u64,

    /// Interval between reconciliation polls
    #[serde(rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,

    /// Maximum random delay added to each poll interval
    #[serde(rename = "poll_jitter_secs", with = "secs")]
    pub poll_jitter: Duration,

    /// A poll bypasses the cache once the last successful poll is older than this
    #[serde(rename = "staleness_window_secs", with = "secs")]
    pub staleness_window: Duration,

    /// Consecutive poll failures before polling stops
    pub failure_threshold: u32,

    /// Bounded wait for a foreground record fetch
    #[serde(rename = "request_timeout_secs", with = "secs")]
    pub request_timeout: Duration,

    /// Bounded wait for a background poll fetch
    #[serde(rename = "poll_timeout_secs", with = "secs")]
    pub poll_timeout: Duration,

    /// Bounded wait for file transfers (direct fetch)
    #[serde(rename = "download_timeout_secs", with = "secs")]
    pub download_timeout: Duration,

    /// Connection timeout for the HTTP client
    #[serde(rename = "connect_timeout_secs", with = "secs")]
    pub connect_timeout: Duration,

    /// Whether background polls ask for reviews
    pub poll_include_reviews: bool,

    /// Whether the same-origin proxy strategy is attempted
    pub proxy_download_enabled: bool,

    pub user_agent: String,

    /// Bearer token forwarded to the API
    pub auth_token: Option<String>,

    /// Outbound HTTP proxy for the client itself (not the download proxy endpoint)
    pub outbound_proxy: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_owned(),
            proxy_base_url: None,
            cache_ttl: Duration::from_secs(5 * 60),
            cache_max_entries: 1_000,
            poll_interval: Duration::from_secs(60 * 60),
            poll_jitter: Duration::ZERO,
            staleness_window: Duration::from_secs(60 * 60),
            failure_threshold: 3,
            request_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            poll_include_reviews: true,
            proxy_download_enabled: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            auth_token: None,
            outbound_proxy: None,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> crate::builder::SyncConfigBuilder {
        crate::builder::SyncConfigBuilder::new()
    }

    /// Base URL used for the proxy-download endpoint.
    pub fn proxy_base(&self) -> &str {
        self.proxy_base_url.as_deref().unwrap_or(&self.api_base_url)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), SyncError> {
        url::Url::parse(&self.api_base_url)
            .map_err(|e| SyncError::Config(format!("invalid api_base_url: {e}")))?;
        if let Some(proxy_base) = &self.proxy_base_url {
            url::Url::parse(proxy_base)
                .map_err(|e| SyncError::Config(format!("invalid proxy_base_url: {e}")))?;
        }
        if self.failure_threshold == 0 {
            return Err(SyncError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll_interval must be non-zero".to_string()));
        }
        if self.cache_max_entries == 0 {
            return Err(SyncError::Config(
                "cache_max_entries must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
