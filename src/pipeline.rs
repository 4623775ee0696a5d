//! Request pipeline: classify, extract, then describe or transfer.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::chain::{Resolution, StrategyChain};
use crate::config::{BrowserConfig, Config};
use crate::error::{Error, Result};
use crate::extract::{
    DirectExtractor, ExtractionAttempt, ExtractionResult, Extractor, GenericExtractor,
    StrategyKind,
};
use crate::http_client::MediaClient;
use crate::media::{extension_for_mime, mime_essence, mime_from_url, ContentKind};
use crate::platform::{PlatformProfile, PlatformRegistry};
use crate::sanitize::attachment_name;
use crate::transfer::{ProgressCallback, Transfer, TransferManager};

/// One caller invocation. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub request_id: Uuid,
    pub source_url: Url,
    pub metadata_only: bool,
    /// Verdict of the caller-side security check.
    pub proceed: bool,
}

impl ExtractionRequest {
    /// Validate a caller-supplied URL.
    pub fn parse(raw: &str, metadata_only: bool, proceed: bool) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("URL is required".to_string()));
        }
        let source_url =
            Url::parse(raw).map_err(|e| Error::InvalidInput(format!("malformed URL: {e}")))?;
        if !matches!(source_url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "unsupported URL scheme `{}` (only http and https)",
                source_url.scheme()
            )));
        }
        if source_url.host_str().map_or(true, str::is_empty) {
            return Err(Error::InvalidInput("URL has no host".to_string()));
        }
        Ok(Self {
            request_id: Uuid::new_v4(),
            source_url,
            metadata_only,
            proceed,
        })
    }
}

/// Metadata envelope describing a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub success: bool,
    /// Bytes, when the host disclosed it.
    pub size: Option<u64>,
    pub content_type: String,
    pub title: String,
    pub is_real_video: bool,
    pub platform: String,
    pub strategy: StrategyKind,
}

/// A download whose headers have been accepted and whose body is pending.
pub struct Download {
    pub info: MediaInfo,
    pub file_name: String,
    pub attempts: Vec<ExtractionAttempt>,
    pub transfer: Transfer,
}

/// Everything needed to serve requests; shared across them.
pub struct Pipeline {
    registry: PlatformRegistry,
    chain: StrategyChain,
    client: Arc<MediaClient>,
    transfers: TransferManager,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        registry: PlatformRegistry,
        chain: StrategyChain,
        client: Arc<MediaClient>,
        transfers: TransferManager,
    ) -> Self {
        Self {
            registry,
            chain,
            client,
            transfers,
        }
    }

    /// Assemble the full pipeline from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Arc::new(MediaClient::new(&config.network)?);
        let registry = PlatformRegistry::with_configured(&config.platforms)?;

        let mut chain = StrategyChain::new(
            Arc::new(GenericExtractor::new(Arc::clone(&client))),
            config.extraction.unknown_platform_policy,
        )
        .with_direct(Arc::new(DirectExtractor::innertube(Arc::clone(&client))));
        if let Some(browser) = browser_extractor(&config.browser) {
            chain = chain.with_browser(browser);
        }

        let transfers = TransferManager::new(Arc::clone(&client), &config.transfer);
        Ok(Self::new(registry, chain, client, transfers))
    }

    #[must_use]
    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    async fn resolve(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<(&PlatformProfile, Resolution)> {
        if !request.proceed {
            return Err(Error::NotCleared);
        }
        let profile = self.registry.classify(&request.source_url);
        info!(platform = %profile.id, "Classified");
        let resolution = self.chain.run(&request.source_url, profile, cancel).await?;
        Ok((profile, resolution))
    }

    /// Resolve the request and describe the resource without transferring it.
    #[instrument(skip_all, fields(request_id = %request.request_id, url = %request.source_url))]
    pub async fn metadata(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo> {
        let (profile, resolution) = self.resolve(request, cancel).await?;
        let strategy = successful_strategy(&resolution);
        let result = resolution.result;

        let mut size = result.approx_size_bytes;
        let mut content_type = non_empty(&result.content_type_hint);
        if size.is_none() || content_type.is_none() {
            match self
                .client
                .probe(&result.resource_url, result.referer.as_deref())
                .await
            {
                Ok(probe) if probe.status.is_success() => {
                    size = size.or(probe.content_length);
                    content_type =
                        content_type.or_else(|| probe.content_type.as_deref().map(mime_essence));
                }
                Ok(probe) => debug!(status = %probe.status, "Metadata probe unsuccessful"),
                Err(e) => debug!(error = %e, "Metadata probe failed"),
            }
        }

        let content_type =
            content_type.unwrap_or_else(|| profile.content_kind.default_mime().to_string());
        Ok(MediaInfo {
            success: true,
            size,
            is_real_video: is_real_video(&content_type),
            content_type,
            title: result.title,
            platform: profile.id.clone(),
            strategy,
        })
    }

    /// Resolve the request and open the media transfer.
    #[instrument(
        skip_all,
        fields(request_id = %request.request_id, url = %request.source_url)
    )]
    pub async fn download(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Download> {
        let (profile, resolution) = self.resolve(request, cancel).await?;
        let strategy = successful_strategy(&resolution);
        let Resolution { result, attempts } = resolution;

        let expected = expected_kind(&result, profile);
        let mut options = self
            .transfers
            .options(request.request_id, expected)
            .with_cancel(cancel.child_token());
        if let Some(progress) = progress {
            options = options.with_progress(progress);
        }

        let transfer = self
            .transfers
            .open(&result.resource_url, result.referer.as_deref(), options)
            .await?;

        let content_type = transfer.content_type().to_string();
        let file_name = attachment_name(&result.title, file_extension(&content_type, &result));
        info!(%file_name, %content_type, "Transfer accepted");

        Ok(Download {
            info: MediaInfo {
                success: true,
                size: transfer.content_length().or(result.approx_size_bytes),
                is_real_video: is_real_video(&content_type),
                content_type,
                title: result.title,
                platform: profile.id.clone(),
                strategy,
            },
            file_name,
            attempts,
            transfer,
        })
    }
}

#[cfg(feature = "browser")]
fn browser_extractor(config: &BrowserConfig) -> Option<Arc<dyn Extractor>> {
    use crate::extract::browser::chromium::ChromiumEngine;
    use crate::extract::BrowserExtractor;

    if !config.enabled {
        return None;
    }
    match ChromiumEngine::discover(config) {
        Some(engine) => Some(Arc::new(BrowserExtractor::new(Arc::new(engine), config))),
        None => {
            warn!("No Chrome/Chromium executable found; browser extraction disabled");
            None
        }
    }
}

#[cfg(not(feature = "browser"))]
fn browser_extractor(config: &BrowserConfig) -> Option<Arc<dyn Extractor>> {
    if config.enabled {
        debug!("Built without the `browser` feature; browser extraction disabled");
    }
    None
}

fn successful_strategy(resolution: &Resolution) -> StrategyKind {
    resolution
        .attempts
        .last()
        .map_or(StrategyKind::Generic, |a| a.strategy)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Whether a content type is audiovisual media (images are not).
fn is_real_video(content_type: &str) -> bool {
    matches!(
        ContentKind::from_mime(content_type),
        ContentKind::Video | ContentKind::Audio
    )
}

/// What the transfer should be validated against.
fn expected_kind(result: &ExtractionResult, profile: &PlatformProfile) -> ContentKind {
    if result.content_type_hint.is_empty() {
        profile.content_kind
    } else {
        ContentKind::from_mime(&result.content_type_hint)
    }
}

fn file_extension(content_type: &str, result: &ExtractionResult) -> &'static str {
    match extension_for_mime(content_type) {
        "bin" => mime_from_url(&result.resource_url).map_or("bin", extension_for_mime),
        ext => ext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::Scripted;
    use crate::chain::UnknownPlatformPolicy;
    use crate::config::{NetworkConfig, TransferConfig};
    use crate::extract::direct::tests::{playable_fixture, FixedPlayer};
    use crate::extract::ExtractFailure;

    fn pipeline(chain: StrategyChain) -> Pipeline {
        let client = Arc::new(MediaClient::new(&NetworkConfig::default()).unwrap());
        let transfers = TransferManager::new(Arc::clone(&client), &TransferConfig::default());
        Pipeline::new(PlatformRegistry::builtin(), chain, client, transfers)
    }

    #[test]
    fn request_validation() {
        assert!(matches!(
            ExtractionRequest::parse("   ", false, true),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ExtractionRequest::parse("not a url", false, true),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ExtractionRequest::parse("ftp://files.example/a.mp4", false, true),
            Err(Error::InvalidInput(_))
        ));
        let request = ExtractionRequest::parse(" https://youtu.be/dQw4w9WgXcQ ", true, true).unwrap();
        assert_eq!(request.source_url.as_str(), "https://youtu.be/dQw4w9WgXcQ");
        assert!(request.metadata_only);
    }

    #[tokio::test]
    async fn youtube_metadata_from_direct_extractor() {
        let direct = DirectExtractor::new(Arc::new(FixedPlayer(playable_fixture())));
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic.clone(), UnknownPlatformPolicy::GenericOnly)
            .with_direct(Arc::new(direct));
        let pipeline = pipeline(chain);

        let request = ExtractionRequest::parse(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            true,
            true,
        )
        .unwrap();
        let info = pipeline
            .metadata(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(info.success);
        assert_eq!(info.content_type, "video/mp4");
        assert_eq!(info.title, "Rick Astley - Never Gonna Give You Up Official Vid");
        assert_eq!(info.size, Some(13_456_789));
        assert!(info.is_real_video);
        assert_eq!(info.platform, "youtube");
        assert_eq!(info.strategy, StrategyKind::Direct);
        assert_eq!(generic.calls(), 0);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["contentType"], "video/mp4");
        assert_eq!(json["isRealVideo"], true);
    }

    #[tokio::test]
    async fn blocked_youtube_lists_every_attempt() {
        let direct = Scripted::fail(
            StrategyKind::Direct,
            ExtractFailure::ResolutionBlocked("Sign in to confirm you're not a bot".into()),
        );
        let browser = Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound);
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::Blocked(429));
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly)
            .with_direct(direct)
            .with_browser(browser);
        let pipeline = pipeline(chain);

        let request =
            ExtractionRequest::parse("https://youtu.be/dQw4w9WgXcQ", true, true).unwrap();
        let err = pipeline
            .metadata(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PlatformBlocked { .. }));
        assert_eq!(err.status_class().http_status(), 429);
        let reasons: Vec<String> = err
            .attempts()
            .iter()
            .filter_map(|a| a.failure().map(ToString::to_string))
            .collect();
        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].contains("not a bot"));
        assert_eq!(reasons[1], "no media found");
        assert!(!err.alternatives().is_empty());
    }

    #[tokio::test]
    async fn playlist_is_not_reported_as_real_video() {
        let generic = Arc::new(Scripted {
            kind: StrategyKind::Generic,
            outcome: Ok(ExtractionResult {
                resource_url: Url::parse("https://cdn.example/live/master.m3u8").unwrap(),
                title: "Live".into(),
                approx_size_bytes: Some(4_096),
                content_type_hint: "application/vnd.apple.mpegurl".into(),
                referer: None,
            }),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let pipeline = pipeline(StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly));

        let request =
            ExtractionRequest::parse("https://cdn.example/watch/live", true, true).unwrap();
        let info = pipeline
            .metadata(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(info.content_type, "application/vnd.apple.mpegurl");
        assert!(!info.is_real_video);
    }

    #[test]
    fn playlist_is_validated_as_a_manifest() {
        let registry = PlatformRegistry::builtin();
        let profile = registry.classify(&Url::parse("https://cdn.example/watch/live").unwrap());
        let result = ExtractionResult {
            resource_url: Url::parse("https://cdn.example/live/master.m3u8").unwrap(),
            title: "Live".into(),
            approx_size_bytes: None,
            content_type_hint: "application/x-mpegURL".into(),
            referer: None,
        };
        assert_eq!(expected_kind(&result, profile), ContentKind::Manifest);
    }

    #[tokio::test]
    async fn uncleared_requests_never_extract() {
        let generic = Scripted::ok(StrategyKind::Generic, "https://cdn.example/file.mp4");
        let pipeline = pipeline(StrategyChain::new(
            generic.clone(),
            UnknownPlatformPolicy::GenericOnly,
        ));
        let request =
            ExtractionRequest::parse("https://cdn.example/file.mp4", true, false).unwrap();
        let err = pipeline
            .metadata(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotCleared));
        assert_eq!(generic.calls(), 0);
    }

    #[test]
    fn extension_falls_back_to_url() {
        let result = ExtractionResult {
            resource_url: Url::parse("https://cdn.example/a/clip.webm?x=1").unwrap(),
            title: "Clip".into(),
            approx_size_bytes: None,
            content_type_hint: String::new(),
            referer: None,
        };
        assert_eq!(file_extension("application/octet-stream", &result), "webm");
        assert_eq!(file_extension("video/mp4", &result), "mp4");
        assert!(!is_real_video("image/png"));
        assert!(is_real_video("audio/mpeg"));
    }
}
