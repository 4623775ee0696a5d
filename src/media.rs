//! Media content kinds and MIME helpers.
//!
//! A [`ContentKind`] is what the caller expects to receive. It decides which
//! declared `Content-Type` values are rejected up front, the minimum payload
//! size a transfer must reach, and the typical size used to estimate progress
//! when the server does not send `Content-Length`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad class of media a transfer is expected to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Audio,
    Image,
    /// HLS or DASH playlist: a small document that points at media segments.
    Manifest,
    /// Anything binary; no type-based rejection and a 1-byte floor.
    Any,
}

impl ContentKind {
    /// Classify a MIME type (parameters are ignored).
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime_essence(mime);
        if is_stream_manifest(&essence) {
            Self::Manifest
        } else if essence.starts_with("video/") {
            Self::Video
        } else if essence.starts_with("audio/") {
            Self::Audio
        } else if essence.starts_with("image/") {
            Self::Image
        } else {
            Self::Any
        }
    }

    /// Whether this kind names real media (as opposed to [`ContentKind::Any`]).
    #[must_use]
    pub fn is_media(self) -> bool {
        !matches!(self, Self::Any)
    }

    /// Whether a declared `Content-Type` shows the host sent something else.
    #[must_use]
    pub fn rejects(self, mime: &str) -> bool {
        match self {
            Self::Any => false,
            // Playlists are commonly served as text/plain.
            Self::Manifest => is_document(mime),
            Self::Video | Self::Audio | Self::Image => is_textual(mime),
        }
    }

    /// Smallest payload that is plausibly real media of this kind.
    ///
    /// A "video" of a few kilobytes is an error page or a consent wall.
    #[must_use]
    pub fn min_payload_bytes(self) -> u64 {
        match self {
            Self::Video => 100_000,
            Self::Audio => 16 * 1024,
            Self::Image => 512,
            Self::Manifest => 16,
            Self::Any => 1,
        }
    }

    /// Size used for progress estimation when the total is unknown.
    #[must_use]
    pub fn typical_size_bytes(self) -> u64 {
        match self {
            Self::Video => 50 * 1024 * 1024,
            Self::Audio => 5 * 1024 * 1024,
            Self::Image => 512 * 1024,
            Self::Manifest => 16 * 1024,
            Self::Any => 10 * 1024 * 1024,
        }
    }

    /// MIME type to advertise when nothing better is known.
    #[must_use]
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Video => "video/mp4",
            Self::Audio => "audio/mpeg",
            Self::Image => "image/jpeg",
            Self::Manifest => "application/vnd.apple.mpegurl",
            Self::Any => "application/octet-stream",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Manifest => "stream manifest",
            Self::Any => "binary",
        };
        f.write_str(name)
    }
}

/// Lowercased MIME type without parameters (`video/mp4; codecs=...` -> `video/mp4`).
#[must_use]
pub fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// True for types that are documents rather than media: `text/*`, HTML, JSON.
///
/// Getting one of these back from a media URL is the usual sign that the
/// host answered with a block page or an error instead of the file.
#[must_use]
pub fn is_textual(mime: &str) -> bool {
    mime_essence(mime).starts_with("text/") || is_document(mime)
}

/// HTML, XHTML or JSON.
#[must_use]
pub fn is_document(mime: &str) -> bool {
    let essence = mime_essence(mime);
    essence.ends_with("/html")
        || essence.ends_with("+html")
        || essence.ends_with("/xhtml+xml")
        || essence == "application/json"
}

/// Generic binary types CDNs send when they do not know better.
#[must_use]
pub fn is_opaque_binary(mime: &str) -> bool {
    matches!(
        mime_essence(mime).as_str(),
        "application/octet-stream"
            | "binary/octet-stream"
            | "application/binary"
            | "application/x-download"
            | "application/force-download"
    )
}

/// True for `video/`, `audio/` and `image/` types plus HLS/DASH manifests.
#[must_use]
pub fn is_media_type(mime: &str) -> bool {
    let essence = mime_essence(mime);
    essence.starts_with("video/")
        || essence.starts_with("audio/")
        || essence.starts_with("image/")
        || is_stream_manifest(&essence)
}

fn is_stream_manifest(essence: &str) -> bool {
    matches!(
        essence,
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "application/dash+xml"
    )
}

/// MIME type for a file extension, `application/octet-stream` when unknown.
#[must_use]
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m3u8" => "application/vnd.apple.mpegurl",
        "mpd" => "application/dash+xml",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// File extension for a MIME type, `bin` when unknown.
#[must_use]
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime_essence(mime).as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/x-ms-wmv" => "wmv",
        "video/x-flv" => "flv",
        "video/x-matroska" => "mkv",
        "video/3gpp" => "3gp",
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" => "m3u8",
        "application/dash+xml" => "mpd",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/webm" => "weba",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/flac" => "flac",
        "audio/aac" => "aac",
        "audio/ogg" => "ogg",
        "audio/opus" => "opus",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Whether `url` names an HLS/DASH playlist rather than a progressive file.
#[must_use]
pub fn is_manifest_url(url: &url::Url) -> bool {
    mime_from_url(url).is_some_and(is_stream_manifest)
}

/// First candidate that is a progressive file, else the first playlist.
pub fn prefer_progressive<I>(candidates: I) -> Option<url::Url>
where
    I: IntoIterator<Item = url::Url>,
{
    let mut manifest = None;
    for url in candidates {
        if !is_manifest_url(&url) {
            return Some(url);
        }
        manifest.get_or_insert(url);
    }
    manifest
}

/// Guess a MIME type from the extension of a URL path.
#[must_use]
pub fn mime_from_url(url: &url::Url) -> Option<&'static str> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    match mime_for_extension(ext) {
        "application/octet-stream" => None,
        mime => Some(mime),
    }
}
