//! Platform-agnostic extraction.
//!
//! First asks whether the URL already *is* a media file (a `HEAD` probe that
//! reports a media type, or an opaque binary type on a media file name).
//! Otherwise fetches the raw HTML, without rendering, and scans a bounded
//! prefix of it for media references. Progressive files are preferred over
//! HLS/DASH playlists wherever both are referenced.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{ExtractFailure, ExtractionResult, Extractor, StrategyKind};
use crate::http_client::{header_content_length, header_content_type, read_page_text, MediaClient};
use crate::media::{
    is_media_type, is_opaque_binary, is_textual, mime_essence, mime_from_url, prefer_progressive,
};
use crate::platform::PlatformProfile;
use crate::sanitize::{file_name_from_url, title_or_default};

/// Meta tags that carry a playable URL, most specific first.
const MEDIA_META: &[&str] = &[
    "og:video:secure_url",
    "og:video:url",
    "og:video",
    "twitter:player:stream",
];

/// Element/attribute pairs, in order of preference.
const MEDIA_ELEMENTS: &[(&str, &str)] = &[
    ("video[src]", "src"),
    ("video source[src]", "src"),
    ("audio[src]", "src"),
    ("audio source[src]", "src"),
    ("source[src]", "src"),
];

/// Most of a page that is read and scanned.
const MAX_PAGE_BYTES: usize = 4 * 1024 * 1024;

static QUOTED_MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["'](https?://[^"'\s<>]+?\.(?:mp4|webm|m3u8)(?:[?#][^"'\s<>]*)?)["']"#)
        .expect("media URL pattern is valid")
});

/// What a page scan found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageScan {
    pub media_url: Option<Url>,
    pub title: Option<String>,
}

fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    base.join(raw)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

fn meta_content(document: &Html, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{key}"], meta[name="{key}"]"#)).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(ToString::to_string)
}

fn page_title(document: &Html) -> Option<String> {
    meta_content(document, "og:title").or_else(|| {
        let selector = Selector::parse("title").ok()?;
        let text = document.select(&selector).next()?.text().collect::<String>();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

/// Scan raw HTML for a media reference, resolving it against `base`.
///
/// Candidates are considered in order (meta tags, media elements, quoted
/// URLs); the first progressive file wins, a playlist only when there is
/// nothing else.
#[must_use]
pub fn scan_html(html: &str, base: &Url) -> PageScan {
    let document = Html::parse_document(html);
    let unescaped = html.replace("\\/", "/");

    let from_meta = MEDIA_META
        .iter()
        .filter_map(|key| meta_content(&document, key))
        .filter_map(|raw| resolve(base, &raw));

    let from_elements = MEDIA_ELEMENTS.iter().flat_map(|(css, attr)| {
        let Ok(selector) = Selector::parse(css) else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .filter_map(|raw| resolve(base, raw))
            .collect()
    });

    let from_pattern = QUOTED_MEDIA_URL
        .captures_iter(&unescaped)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| resolve(base, &m.as_str().replace("&amp;", "&")));

    PageScan {
        media_url: prefer_progressive(from_meta.chain(from_elements).chain(from_pattern)),
        title: page_title(&document),
    }
}

/// Type of the resource when a response shows `url` itself is a media file.
///
/// CDNs label objects they know nothing about as `application/octet-stream`;
/// the file name decides then.
fn direct_media_type(url: &Url, content_type: Option<&str>) -> Option<String> {
    match content_type {
        Some(declared) if is_media_type(declared) => Some(mime_essence(declared)),
        Some(declared) if !is_opaque_binary(declared) => None,
        _ => mime_from_url(url).map(ToString::to_string),
    }
}

/// Whether a body of this type is worth scanning for media references.
fn is_scannable(content_type: Option<&str>) -> bool {
    content_type.map_or(true, |declared| {
        is_textual(declared) || mime_essence(declared).ends_with("xml")
    })
}

/// Last-resort extractor that works on any host.
pub struct GenericExtractor {
    client: Arc<MediaClient>,
}

impl GenericExtractor {
    #[must_use]
    pub fn new(client: Arc<MediaClient>) -> Self {
        Self { client }
    }

    fn direct_file(
        url: &Url,
        content_type: String,
        size: Option<u64>,
        profile: &PlatformProfile,
    ) -> ExtractionResult {
        debug!(%content_type, ?size, "URL is a media file");
        ExtractionResult {
            resource_url: url.clone(),
            title: file_name_from_url(url).unwrap_or_else(|| profile.default_title.clone()),
            approx_size_bytes: size,
            content_type_hint: content_type,
            referer: profile.referer.clone(),
        }
    }

    async fn run(
        &self,
        url: &Url,
        profile: &PlatformProfile,
    ) -> Result<ExtractionResult, ExtractFailure> {
        let referer = profile.referer.as_deref();

        match self.client.probe(url, referer).await {
            Ok(probe) if probe.status.is_success() => {
                if let Some(media_type) = direct_media_type(url, probe.content_type.as_deref()) {
                    return Ok(Self::direct_file(url, media_type, probe.content_length, profile));
                }
            }
            Ok(probe) if matches!(probe.status.as_u16(), 403 | 429) => {
                return Err(ExtractFailure::Blocked(probe.status.as_u16()));
            }
            Ok(probe) => debug!(status = %probe.status, "Probe unsuccessful, fetching page"),
            Err(e) => debug!(error = %e, "Probe failed, fetching page"),
        }

        let response = self
            .client
            .fetch_page(url, referer)
            .await
            .map_err(|e| ExtractFailure::from_http(&e))?;

        let status = response.status().as_u16();
        if matches!(status, 403 | 429) {
            return Err(ExtractFailure::Blocked(status));
        }
        if !response.status().is_success() {
            debug!(status, "Page fetch unsuccessful");
            return Err(ExtractFailure::NoMediaFound);
        }

        // A GET can disagree with a HEAD; trust the GET.
        let content_type = header_content_type(response.headers());
        if let Some(media_type) = direct_media_type(url, content_type.as_deref()) {
            let size = header_content_length(response.headers());
            return Ok(Self::direct_file(url, media_type, size, profile));
        }
        if !is_scannable(content_type.as_deref()) {
            debug!(?content_type, "Response is neither media nor a document");
            return Err(ExtractFailure::NoMediaFound);
        }

        let page_url = response.url().clone();
        let html = read_page_text(response, MAX_PAGE_BYTES)
            .await
            .map_err(|e| ExtractFailure::Network(e.to_string()))?;

        let scan = scan_html(&html, &page_url);
        let media_url = scan.media_url.ok_or(ExtractFailure::NoMediaFound)?;
        debug!(media_url = %media_url, "Found media reference in page");

        Ok(ExtractionResult {
            content_type_hint: mime_from_url(&media_url).unwrap_or_default().to_string(),
            title: title_or_default(scan.title.as_deref(), &profile.default_title),
            resource_url: media_url,
            approx_size_bytes: None,
            referer: Some(page_url.to_string()),
        })
    }
}

#[async_trait]
impl Extractor for GenericExtractor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Generic
    }

    #[instrument(skip(self, profile, cancel), fields(url = %url, platform = %profile.id))]
    async fn try_extract(
        &self,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExtractFailure::Cancelled),
            result = self.run(url, profile) => result,
        }
    }
}
