//! # Builder for SyncConfig
//!
//! Fluent construction of [`SyncConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use shelf_engine::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .with_api_base_url("https://shop.example.com/api")
//!     .with_cache_ttl(Duration::from_secs(120))
//!     .with_poll_interval(Duration::from_secs(15 * 60))
//!     .with_failure_threshold(5)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.failure_threshold, 5);
//! ```

use std::time::Duration;

use crate::{SyncConfig, SyncError};

/// Builder for creating SyncConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded from a file
    pub fn from_config(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn with_proxy_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_base_url = Some(url.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn with_cache_max_entries(mut self, entries: u64) -> Self {
        self.config.cache_max_entries = entries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_poll_jitter(mut self, jitter: Duration) -> Self {
        self.config.poll_jitter = jitter;
        self
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.config.staleness_window = window;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the bounded wait for foreground fetches
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the bounded wait for background polls
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_poll_include_reviews(mut self, include: bool) -> Self {
        self.config.poll_include_reviews = include;
        self
    }

    pub fn with_proxy_download(mut self, enabled: bool) -> Self {
        self.config.proxy_download_enabled = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn with_outbound_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.outbound_proxy = Some(proxy.into());
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
