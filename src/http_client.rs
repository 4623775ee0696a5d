//! HTTP client for pages and media.
//!
//! Features:
//! - HTTP/2 with fallback to HTTP/1.1 (negotiated, never assumed)
//! - TLS 1.3 via rustls
//! - Brotli, Zstd, Gzip compression for pages
//! - Connection pooling with keep-alive
//! - Realistic browser fingerprint shared by page and media requests
//! - Cookie jar, so consent cookies set by a page follow its media requests

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, REFERER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::fingerprint::{random_profile, BrowserProfile};

/// Headers observed by a metadata probe.
#[derive(Debug, Clone)]
pub struct Probe {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// HTTP client with a fixed browser fingerprint.
///
/// One client is shared by every request the process handles; it carries no
/// per-request state apart from the cookie jar.
pub struct MediaClient {
    client: Client,
    profile: BrowserProfile,
    page_timeout: Duration,
}

impl MediaClient {
    /// Create a client with a random browser profile.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Self::with_profile(random_profile(), config)
    }

    /// Create client with specific browser profile
    pub fn with_profile(profile: BrowserProfile, config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            // Let the server negotiate HTTP/2; media CDNs and test servers
            // alike still speak plain HTTP/1.1.
            .http2_adaptive_window(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            .connect_timeout(config.connect_timeout())
            // No client-wide timeout: a video transfer can legitimately take
            // minutes. Page fetches get a per-request timeout instead and the
            // transfer manager enforces its own wall-clock deadline.
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            profile,
            page_timeout: config.request_timeout(),
        })
    }

    /// Fetch an HTML page the way a browser navigation would.
    #[instrument(skip(self, referer), fields(url = %url))]
    pub async fn fetch_page(
        &self,
        url: &Url,
        referer: Option<&str>,
    ) -> reqwest::Result<Response> {
        debug!("Fetching page");
        let request = self
            .client
            .get(url.clone())
            .headers(self.profile.to_headers())
            .timeout(self.page_timeout);
        let response = with_referer(request, referer).send().await?;

        info!(
            status = %response.status(),
            version = ?response.version(),
            content_type = ?response.headers().get(CONTENT_TYPE),
            "Page response received"
        );

        Ok(response)
    }

    /// Learn a resource's type and size without downloading it.
    ///
    /// Sends `HEAD`; hosts that refuse `HEAD` get a one-byte ranged `GET`
    /// instead, whose `Content-Range` still carries the full size.
    #[instrument(skip(self, referer), fields(url = %url))]
    pub async fn probe(&self, url: &Url, referer: Option<&str>) -> reqwest::Result<Probe> {
        let request = self
            .client
            .head(url.clone())
            .headers(self.profile.media_headers())
            .timeout(self.page_timeout);
        let response = with_referer(request, referer).send().await?;

        if !matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED | StatusCode::FORBIDDEN
        ) {
            let probe = probe_from_headers(response.status(), response.headers());
            debug!(?probe, "HEAD probe");
            return Ok(probe);
        }

        debug!(status = %response.status(), "HEAD refused, retrying with ranged GET");
        let request = self
            .client
            .get(url.clone())
            .headers(self.profile.media_headers())
            .header(RANGE, "bytes=0-0")
            .timeout(self.page_timeout);
        let response = with_referer(request, referer).send().await?;
        let probe = probe_from_headers(response.status(), response.headers());
        debug!(?probe, "Ranged GET probe");
        Ok(probe)
    }

    /// Start building a media download request.
    ///
    /// No timeout is attached; the caller bounds the whole transfer.
    pub fn media_get(&self, url: &Url, referer: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .get(url.clone())
            .headers(self.profile.media_headers());
        with_referer(request, referer)
    }

    /// Start building a JSON API request.
    ///
    /// Only the page timeout is attached; API clients identify themselves
    /// with their own headers, not the browser fingerprint.
    pub fn api_post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).timeout(self.page_timeout)
    }

    /// Browser profile used for every request.
    #[must_use]
    pub fn profile(&self) -> &BrowserProfile {
        &self.profile
    }
}

fn with_referer(request: RequestBuilder, referer: Option<&str>) -> RequestBuilder {
    match referer {
        Some(referer) => request.header(REFERER, referer),
        None => request,
    }
}

/// Read a page body as text, keeping at most `limit` bytes.
///
/// The rest of the body is left unread. Invalid UTF-8 is replaced.
pub async fn read_page_text(response: Response, limit: usize) -> reqwest::Result<String> {
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = limit.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            debug!(limit, "Page body truncated");
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Parse a `Content-Length` header value.
#[must_use]
pub fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Parse a `Content-Type` header value.
#[must_use]
pub fn header_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)?
        .to_str()
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn probe_from_headers(status: StatusCode, headers: &HeaderMap) -> Probe {
    let content_length = if status == StatusCode::PARTIAL_CONTENT {
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse().ok())
    } else {
        header_content_length(headers)
    };

    Probe {
        status,
        content_type: header_content_type(headers),
        content_length,
    }
}
