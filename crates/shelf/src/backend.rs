//! # Backend
//!
//! The REST endpoints the engine consumes, expressed as two traits so that the fetcher
//! and the download resolver can be driven by an in-memory backend in tests.
//!
//! - `GET  {api}/records/{id}?includeReviews={bool}&_t={cacheBust}`
//! - `GET  {api}/records/{id}/download`
//! - `HEAD {proxy}/proxy-download/{id}?url={encoded}`

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::{SyncConfig, SyncError, client::create_client};

/// Query options for a record request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub include_reviews: bool,
    /// Unix millis appended as `_t` to defeat intermediary caches
    pub cache_bust: Option<u64>,
    /// Time budget of the caller; the backend's own request timeout applies when unset
    pub timeout: Option<Duration>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the raw JSON for one record.
    async fn fetch_record(&self, id: &str, query: RecordQuery) -> Result<Value, SyncError>;
}

/// A freshly signed, time-limited download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDownload {
    pub url: Url,
    pub filename: Option<String>,
}

#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Ask the backend for a signed URL. The server counts a download when this succeeds.
    async fn request_download_url(&self, id: &str) -> Result<SignedDownload, SyncError>;

    /// The same-origin proxy URL that re-streams `target`.
    fn proxy_url(&self, id: &str, target: &Url) -> Result<Url, SyncError>;

    /// Issue a HEAD request and require a success status.
    async fn probe(&self, url: &Url) -> Result<(), SyncError>;

    /// Fetch the full body of `url`.
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, SyncError>;

    /// Origin of the storefront, used to recognise same-origin URLs.
    fn origin(&self) -> Option<Url> {
        None
    }
}

/// Wire shape of the download endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadTicket {
    #[serde(default)]
    success: Option<bool>,
    download_url: Option<String>,
    #[serde(alias = "fileName")]
    filename: Option<String>,
    #[serde(alias = "message")]
    error: Option<String>,
}

impl DownloadTicket {
    fn into_signed(self, id: &str) -> Result<SignedDownload, SyncError> {
        if self.success == Some(false) {
            return Err(SyncError::DownloadUrlUnavailable(
                self.error
                    .unwrap_or_else(|| format!("backend refused download for {id}")),
            ));
        }
        let raw = self
            .download_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                SyncError::DownloadUrlUnavailable(format!("no download URL returned for {id}"))
            })?;
        let url = Url::parse(raw.trim())
            .map_err(|e| SyncError::DownloadUrlUnavailable(format!("unparseable URL: {e}")))?;
        Ok(SignedDownload {
            url,
            filename: self.filename.filter(|f| !f.trim().is_empty()),
        })
    }
}

/// reqwest implementation of both backend traits.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    api_base: Url,
    proxy_base: Url,
    auth_token: Option<String>,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = create_client(config)?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            client,
            api_base: Url::parse(&config.api_base_url)?,
            proxy_base: Url::parse(config.proxy_base())?,
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout,
            download_timeout: config.download_timeout,
        })
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn record_url(&self, id: &str, query: RecordQuery) -> Result<Url, SyncError> {
        let mut url = Self::endpoint(&self.api_base, &["records", id])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("includeReviews", if query.include_reviews { "true" } else { "false" });
            if let Some(bust) = query.cache_bust {
                pairs.append_pair("_t", &bust.to_string());
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn check_status(response: Response, what: &str) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SyncError::from_status(status, what))
        }
    }
}

#[async_trait]
impl RecordSource for HttpBackend {
    async fn fetch_record(&self, id: &str, query: RecordQuery) -> Result<Value, SyncError> {
        let url = self.record_url(id, query)?;
        let budget = query.timeout.unwrap_or(self.request_timeout);
        trace!(url = %url, timeout_ms = budget.as_millis() as u64, "Fetching record");

        let response = self
            .authorize(self.client.get(url))
            .timeout(budget)
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(e, budget))?;
        let response = Self::check_status(response, id)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::from_reqwest(e, budget))?;

        serde_json::from_slice(&body).map_err(SyncError::from)
    }
}

#[async_trait]
impl DownloadBackend for HttpBackend {
    async fn request_download_url(&self, id: &str) -> Result<SignedDownload, SyncError> {
        let url = Self::endpoint(&self.api_base, &["records", id, "download"])?;
        let response = self
            .authorize(self.client.get(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SyncError::DownloadUrlUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(SyncError::DownloadUrlUnavailable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::DownloadUrlUnavailable(e.to_string()))?;
        let ticket: DownloadTicket = serde_json::from_slice(&body)
            .map_err(|e| SyncError::DownloadUrlUnavailable(format!("malformed response: {e}")))?;
        ticket.into_signed(id)
    }

    fn proxy_url(&self, id: &str, target: &Url) -> Result<Url, SyncError> {
        let mut url = Self::endpoint(&self.proxy_base, &["proxy-download", id])?;
        url.query_pairs_mut().append_pair("url", target.as_str());
        Ok(url)
    }

    async fn probe(&self, url: &Url) -> Result<(), SyncError> {
        let response = self
            .authorize(self.client.head(url.clone()))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(e, self.request_timeout))?;
        Self::check_status(response, url.as_str())?;
        debug!(url = %url, "Probe succeeded");
        Ok(())
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, SyncError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(e, self.download_timeout))?;
        let response = Self::check_status(response, url.as_str())?;
        response
            .bytes()
            .await
            .map_err(|e| SyncError::from_reqwest(e, self.download_timeout))
    }

    fn origin(&self) -> Option<Url> {
        let mut origin = self.proxy_base.clone();
        origin.set_path("/");
        origin.set_query(None);
        Some(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn backend(api: &str) -> HttpBackend {
        let config = SyncConfig {
            api_base_url: api.to_string(),
            ..Default::default()
        };
        HttpBackend::new(&config).unwrap()
    }

    /// Serve one canned response on a local port after `delay`.
    async fn slow_server(delay: Duration, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/api")
    }

    fn local_backend(api: &str, request_timeout: Duration) -> HttpBackend {
        let config = SyncConfig {
            api_base_url: api.to_string(),
            request_timeout,
            ..Default::default()
        };
        // bypass any system proxy for loopback requests
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpBackend::with_client(client, &config).unwrap()
    }

    #[tokio::test]
    async fn test_caller_budget_overrides_request_timeout() {
        let api = slow_server(Duration::from_millis(400), r#"{"id":"agent-1"}"#).await;
        let backend = local_backend(&api, Duration::from_millis(100));

        let query = RecordQuery {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let value = backend.fetch_record("agent-1", query).await.unwrap();
        assert_eq!(value["id"], "agent-1");
    }

    #[tokio::test]
    async fn test_timeout_reports_budget() {
        let api = slow_server(Duration::from_secs(2), r#"{"id":"agent-1"}"#).await;
        let backend = local_backend(&api, Duration::from_secs(30));

        let query = RecordQuery {
            timeout: Some(Duration::from_millis(150)),
            ..Default::default()
        };
        let err = backend.fetch_record("agent-1", query).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(budget) if budget == Duration::from_millis(150)));
    }

    #[test]
    fn test_record_url_with_and_without_trailing_slash() {
        for base in ["https://shop.example.com/api", "https://shop.example.com/api/"] {
            let url = backend(base)
                .record_url(
                    "agent-1",
                    RecordQuery {
                        include_reviews: true,
                        cache_bust: Some(1700000000000),
                        timeout: None,
                    },
                )
                .unwrap();
            assert_eq!(
                url.as_str(),
                "https://shop.example.com/api/records/agent-1?includeReviews=true&_t=1700000000000"
            );
        }
    }

    #[test]
    fn test_record_id_is_path_encoded() {
        let url = backend("https://shop.example.com/api")
            .record_url("a b/c", RecordQuery::default())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://shop.example.com/api/records/a%20b%2Fc?includeReviews=false"
        );
    }

    #[test]
    fn test_proxy_url_encodes_target() {
        let backend = backend("https://shop.example.com/api");
        let target = Url::parse("https://storage.googleapis.com/b/agent.zip?X-Goog-Signature=abc&x=1").unwrap();
        let proxy = backend.proxy_url("agent-1", &target).unwrap();

        assert_eq!(proxy.path(), "/api/proxy-download/agent-1");
        let (_, value) = proxy.query_pairs().next().unwrap();
        assert_eq!(value, target.as_str());
        assert_eq!(backend.origin().unwrap().as_str(), "https://shop.example.com/");
    }

    #[test]
    fn test_ticket_parsing() {
        let ticket: DownloadTicket = serde_json::from_str(
            r#"{"success": true, "downloadUrl": "https://storage.googleapis.com/b/a.zip", "filename": "a.zip"}"#,
        )
        .unwrap();
        let signed = ticket.into_signed("agent-1").unwrap();
        assert_eq!(signed.filename.as_deref(), Some("a.zip"));

        let ticket: DownloadTicket =
            serde_json::from_str(r#"{"success": false, "message": "quota"}"#).unwrap();
        assert!(matches!(
            ticket.into_signed("agent-1"),
            Err(SyncError::DownloadUrlUnavailable(msg)) if msg == "quota"
        ));

        let ticket: DownloadTicket = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(matches!(
            ticket.into_signed("agent-1"),
            Err(SyncError::DownloadUrlUnavailable(_))
        ));
    }
}
