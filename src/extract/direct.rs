//! Direct extraction through a platform's player API.
//!
//! YouTube only: the `youtubei/v1/player` endpoint, queried with the ANDROID
//! client context, returns renditions with plain (non-ciphered) URLs.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ExtractFailure, ExtractionResult, Extractor, StrategyKind};
use crate::http_client::MediaClient;
use crate::media::mime_essence;
use crate::platform::{DirectKind, PlatformProfile};
use crate::sanitize::title_or_default;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";
const ANDROID_CLIENT_VERSION: &str = "20.10.38";
const ANDROID_SDK_VERSION: u32 = 30;
const YOUTUBE_REFERER: &str = "https://www.youtube.com/";

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id pattern is valid")
});

/// Player API response, reduced to what rendition selection needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerResponse {
    pub playability_status: PlayabilityStatus,
    pub video_details: Option<VideoDetails>,
    pub streaming_data: Option<StreamingData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayabilityStatus {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoDetails {
    pub video_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingData {
    pub formats: Vec<Rendition>,
    pub adaptive_formats: Vec<Rendition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rendition {
    pub itag: u32,
    pub url: Option<String>,
    pub signature_cipher: Option<String>,
    pub mime_type: String,
    pub bitrate: Option<u64>,
    pub height: Option<u32>,
    /// Decimal string in the API.
    pub content_length: Option<String>,
    pub quality_label: Option<String>,
    pub audio_quality: Option<String>,
}

impl Rendition {
    fn has_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    fn has_audio(&self) -> bool {
        // Muxed renditions carry both codecs: `video/mp4; codecs="avc1..., mp4a..."`
        self.audio_quality.is_some()
            || self
                .mime_type
                .split_once("codecs=")
                .is_some_and(|(_, codecs)| codecs.contains(','))
    }

    fn quality_rank(&self) -> (u32, u64) {
        (self.height.unwrap_or(0), self.bitrate.unwrap_or(0))
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length.as_deref()?.parse().ok()
    }
}

/// Where player responses come from.
#[async_trait]
pub trait PlayerSource: Send + Sync {
    async fn player(&self, video_id: &str) -> Result<PlayerResponse, ExtractFailure>;
}

/// The InnerTube player endpoint, ANDROID client.
pub struct InnerTubeSource {
    client: Arc<MediaClient>,
}

impl InnerTubeSource {
    #[must_use]
    pub fn new(client: Arc<MediaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlayerSource for InnerTubeSource {
    #[instrument(skip(self))]
    async fn player(&self, video_id: &str) -> Result<PlayerResponse, ExtractFailure> {
        let body = json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": ANDROID_CLIENT_VERSION,
                    "androidSdkVersion": ANDROID_SDK_VERSION,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "videoId": video_id,
            "contentCheckOk": true,
            "racyCheckOk": true,
        });

        let user_agent = format!(
            "com.google.android.youtube/{ANDROID_CLIENT_VERSION} (Linux; U; Android 11) gzip"
        );
        let response = self
            .client
            .api_post(PLAYER_ENDPOINT)
            .header("User-Agent", user_agent)
            .header("X-YouTube-Client-Name", "3")
            .header("X-YouTube-Client-Version", ANDROID_CLIENT_VERSION)
            .header("Origin", "https://www.youtube.com")
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractFailure::Network(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 403 | 429) {
            return Err(ExtractFailure::ResolutionBlocked(format!(
                "player API answered HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(ExtractFailure::Network(format!(
                "player API answered HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json::<PlayerResponse>()
            .await
            .map_err(|e| ExtractFailure::Network(format!("invalid player response: {e}")))
    }
}

/// Extract the 11-character video id from any common YouTube URL form.
#[must_use]
pub fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let candidate = if host == "youtu.be" || host.ends_with(".youtu.be") {
        segments.next().map(ToString::to_string)
    } else {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts" | "embed" | "live" | "v") => segments.next().map(ToString::to_string),
            _ => None,
        }
    }?;

    VIDEO_ID.is_match(&candidate).then_some(candidate)
}

/// Map a playability status onto a failure, if it is not playable.
fn check_playability(status: &PlayabilityStatus) -> Result<(), ExtractFailure> {
    let reason = status.reason.clone().unwrap_or_default();
    let lowered = reason.to_ascii_lowercase();
    match status.status.as_str() {
        "OK" | "" => Ok(()),
        "LOGIN_REQUIRED" => Err(ExtractFailure::ResolutionBlocked(if reason.is_empty() {
            "login required".to_string()
        } else {
            reason
        })),
        _ if lowered.contains("bot") || lowered.contains("sign in") => {
            Err(ExtractFailure::ResolutionBlocked(reason))
        }
        other => Err(ExtractFailure::NoQualifyingRendition(if reason.is_empty() {
            other.to_ascii_lowercase()
        } else {
            reason
        })),
    }
}

/// Highest-quality rendition with both tracks and a direct URL.
///
/// Ties keep the first-listed rendition.
#[must_use]
pub fn select_rendition(data: &StreamingData) -> Option<&Rendition> {
    data.formats
        .iter()
        .chain(&data.adaptive_formats)
        .filter(|r| r.url.is_some() && r.has_video() && r.has_audio())
        .fold(None, |best: Option<&Rendition>, r| match best {
            Some(b) if r.quality_rank() <= b.quality_rank() => Some(b),
            _ => Some(r),
        })
}

/// Resolves media through a platform's player API.
pub struct DirectExtractor {
    source: Arc<dyn PlayerSource>,
}

impl DirectExtractor {
    #[must_use]
    pub fn new(source: Arc<dyn PlayerSource>) -> Self {
        Self { source }
    }

    /// Extractor backed by the live InnerTube endpoint.
    #[must_use]
    pub fn innertube(client: Arc<MediaClient>) -> Self {
        Self::new(Arc::new(InnerTubeSource::new(client)))
    }

    async fn resolve_youtube(
        &self,
        url: &Url,
        profile: &PlatformProfile,
    ) -> Result<ExtractionResult, ExtractFailure> {
        let video_id = youtube_video_id(url)
            .ok_or_else(|| ExtractFailure::InvalidUrlFormat(profile.display_name.clone()))?;
        debug!(%video_id, "Querying player API");

        let player = self.source.player(&video_id).await?;
        check_playability(&player.playability_status)?;

        let data = player.streaming_data.as_ref().ok_or_else(|| {
            ExtractFailure::NoQualifyingRendition("no streaming data".to_string())
        })?;
        let rendition = select_rendition(data).ok_or_else(|| {
            let ciphered = data
                .formats
                .iter()
                .filter(|r| r.signature_cipher.is_some())
                .count();
            if ciphered > 0 {
                warn!(ciphered, "Only ciphered renditions offered");
            }
            ExtractFailure::NoQualifyingRendition(
                "no muxed rendition with a direct URL".to_string(),
            )
        })?;

        let resource_url = rendition
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .ok_or_else(|| {
                ExtractFailure::NoQualifyingRendition("rendition URL is malformed".to_string())
            })?;

        let title = title_or_default(
            player.video_details.as_ref().and_then(|d| d.title.as_deref()),
            &profile.default_title,
        );
        info!(
            itag = rendition.itag,
            quality = rendition.quality_label.as_deref().unwrap_or("?"),
            "Selected rendition"
        );

        Ok(ExtractionResult {
            resource_url,
            title,
            approx_size_bytes: rendition.content_length(),
            content_type_hint: mime_essence(&rendition.mime_type),
            referer: Some(
                profile
                    .referer
                    .clone()
                    .unwrap_or_else(|| YOUTUBE_REFERER.to_string()),
            ),
        })
    }
}

#[async_trait]
impl Extractor for DirectExtractor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    #[instrument(skip(self, profile, cancel), fields(url = %url, platform = %profile.id))]
    async fn try_extract(
        &self,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure> {
        let Some(kind) = profile.direct else {
            return Err(ExtractFailure::InvalidUrlFormat(profile.display_name.clone()));
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExtractFailure::Cancelled),
            result = async {
                match kind {
                    DirectKind::YouTube => self.resolve_youtube(url, profile).await,
                }
            } => result,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::PlatformRegistry;

    /// Player source answering from a fixed JSON document.
    pub(crate) struct FixedPlayer(pub serde_json::Value);

    #[async_trait]
    impl PlayerSource for FixedPlayer {
        async fn player(&self, _video_id: &str) -> Result<PlayerResponse, ExtractFailure> {
            Ok(serde_json::from_value(self.0.clone()).unwrap())
        }
    }

    pub(crate) fn playable_fixture() -> serde_json::Value {
        json!({
            "playabilityStatus": { "status": "OK" },
            "videoDetails": {
                "videoId": "dQw4w9WgXcQ",
                "title": "Rick Astley - Never Gonna Give You Up (Official Video)"
            },
            "streamingData": {
                "formats": [
                    {
                        "itag": 18,
                        "url": "https://rr1.googlevideo.com/videoplayback?itag=18",
                        "mimeType": "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"",
                        "bitrate": 503_000,
                        "height": 360,
                        "contentLength": "13456789",
                        "qualityLabel": "360p",
                        "audioQuality": "AUDIO_QUALITY_LOW"
                    },
                    {
                        "itag": 22,
                        "signatureCipher": "s=abc&url=https%3A%2F%2Fexample",
                        "mimeType": "video/mp4; codecs=\"avc1.64001F, mp4a.40.2\"",
                        "height": 720,
                        "qualityLabel": "720p",
                        "audioQuality": "AUDIO_QUALITY_MEDIUM"
                    }
                ],
                "adaptiveFormats": [
                    {
                        "itag": 137,
                        "url": "https://rr1.googlevideo.com/videoplayback?itag=137",
                        "mimeType": "video/mp4; codecs=\"avc1.640028\"",
                        "height": 1080
                    }
                ]
            }
        })
    }

    fn youtube_profile() -> PlatformProfile {
        let registry = PlatformRegistry::builtin();
        registry
            .classify(&Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap())
            .clone()
    }

    #[test]
    fn video_ids_from_url_forms() {
        let id = |s: &str| youtube_video_id(&Url::parse(s).unwrap());
        let expected = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"), expected);
        assert_eq!(id("https://youtu.be/dQw4w9WgXcQ?si=x"), expected);
        assert_eq!(id("https://www.youtube.com/shorts/dQw4w9WgXcQ"), expected);
        assert_eq!(id("https://www.youtube.com/embed/dQw4w9WgXcQ"), expected);
        assert_eq!(id("https://www.youtube.com/live/dQw4w9WgXcQ"), expected);
        assert_eq!(id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(id("https://www.youtube.com/channel/UC123"), None);
        assert_eq!(id("https://www.youtube.com/watch?v=dQw4w9WgXc!"), None);
    }

    #[test]
    fn selects_muxed_direct_rendition() {
        let player: PlayerResponse = serde_json::from_value(playable_fixture()).unwrap();
        let data = player.streaming_data.unwrap();
        // 720p is ciphered and 1080p is video-only, so 360p wins.
        assert_eq!(select_rendition(&data).unwrap().itag, 18);
    }

    #[test]
    fn ties_keep_first_listed() {
        let muxed = |itag| Rendition {
            itag,
            url: Some(format!("https://a.example/{itag}")),
            mime_type: "video/mp4; codecs=\"avc1, mp4a\"".into(),
            height: Some(360),
            bitrate: Some(100),
            ..Rendition::default()
        };
        let data = StreamingData {
            formats: vec![muxed(18), muxed(43)],
            adaptive_formats: vec![],
        };
        assert_eq!(select_rendition(&data).unwrap().itag, 18);
    }

    #[test]
    fn playability_mapping() {
        let status = |s: &str, r: Option<&str>| PlayabilityStatus {
            status: s.into(),
            reason: r.map(Into::into),
        };
        assert!(check_playability(&status("OK", None)).is_ok());
        assert!(matches!(
            check_playability(&status("LOGIN_REQUIRED", Some("Sign in to confirm you're not a bot"))),
            Err(ExtractFailure::ResolutionBlocked(_))
        ));
        assert!(matches!(
            check_playability(&status("UNPLAYABLE", Some("Video unavailable"))),
            Err(ExtractFailure::NoQualifyingRendition(r)) if r == "Video unavailable"
        ));
        assert!(matches!(
            check_playability(&status("ERROR", None)),
            Err(ExtractFailure::NoQualifyingRendition(_))
        ));
    }

    #[tokio::test]
    async fn extracts_metadata_from_player_response() {
        let extractor = DirectExtractor::new(Arc::new(FixedPlayer(playable_fixture())));
        let url = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        let result = extractor
            .try_extract(&url, &youtube_profile(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.content_type_hint, "video/mp4");
        assert_eq!(result.approx_size_bytes, Some(13_456_789));
        assert_eq!(result.title, "Rick Astley - Never Gonna Give You Up Official Vid");
        assert_eq!(result.referer.as_deref(), Some("https://www.youtube.com/"));
        assert!(result.resource_url.as_str().contains("itag=18"));
    }

    #[tokio::test]
    async fn malformed_address_fails_fast() {
        let extractor = DirectExtractor::new(Arc::new(FixedPlayer(playable_fixture())));
        let url = Url::parse("https://www.youtube.com/feed/trending").unwrap();
        let err = extractor
            .try_extract(&url, &youtube_profile(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractFailure::InvalidUrlFormat(_)));
    }

    #[tokio::test]
    async fn login_wall_is_blocking() {
        let fixture = json!({
            "playabilityStatus": {
                "status": "LOGIN_REQUIRED",
                "reason": "Sign in to confirm you're not a bot"
            }
        });
        let extractor = DirectExtractor::new(Arc::new(FixedPlayer(fixture)));
        let url = Url::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let err = extractor
            .try_extract(&url, &youtube_profile(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_blocking());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let extractor = DirectExtractor::new(Arc::new(FixedPlayer(playable_fixture())));
        let url = Url::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = extractor
            .try_extract(&url, &youtube_profile(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ExtractFailure::Cancelled);
    }
}
