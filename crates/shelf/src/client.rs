use std::sync::Arc;

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};

use crate::{SyncConfig, SyncError};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &SyncConfig) -> Result<Client, SyncError> {
    let provider = Arc::new(ring::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SyncError::Config(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| SyncError::Config(format!("TLS platform verifier: {e}")))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(default_headers())
        .use_preconfigured_tls(tls_config)
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_url) = &config.outbound_proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| SyncError::Config(format!("invalid outbound proxy URL: {e}")))?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_url, "Using explicitly configured outbound proxy");
    } else {
        debug!("Using system proxy settings");
    }

    client_builder.build().map_err(SyncError::from)
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*;q=0.8"));
    headers
}
