//! Error types for snag.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::extract::ExtractionAttempt;
use crate::media::ContentKind;

/// Result type alias for snag operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a request.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("request was not cleared to proceed")]
    NotCleared,

    #[error("no extraction strategy found a media URL ({} attempts)", .attempts.len())]
    ExtractionExhausted { attempts: Vec<ExtractionAttempt> },

    #[error("{platform} is blocking automated access")]
    PlatformBlocked {
        platform: String,
        attempts: Vec<ExtractionAttempt>,
    },

    #[error("unsupported content type `{content_type}` (expected {expected})")]
    UnsupportedContentType {
        content_type: String,
        expected: ContentKind,
    },

    #[error("payload of {received} bytes is too small for {kind} (minimum {minimum})")]
    SuspiciouslySmallPayload {
        received: u64,
        minimum: u64,
        kind: ContentKind,
    },

    #[error("transfer timed out after {0:?}")]
    TransferTimeout(Duration),

    #[error("rendering session unavailable: {reason}")]
    SessionLaunchFailed {
        reason: String,
        attempts: Vec<ExtractionAttempt>,
    },

    #[error("upstream answered HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error class, mapped onto an HTTP status by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Forbidden,
    Blocked,
    BadGateway,
    Timeout,
    Internal,
    Unavailable,
}

impl StatusClass {
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::Blocked => 429,
            Self::BadGateway => 502,
            Self::Timeout => 504,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }
}

/// A third-party service to suggest when a platform blocks us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Alternative {
    pub name: &'static str,
    pub url: &'static str,
}

/// Suggested alternatives for blocked platforms.
pub const ALTERNATIVES: &[Alternative] = &[
    Alternative {
        name: "SaveFrom.net",
        url: "https://savefrom.net",
    },
    Alternative {
        name: "Y2Mate",
        url: "https://y2mate.com",
    },
    Alternative {
        name: "SnapInsta",
        url: "https://snapinsta.app",
    },
];

impl Error {
    #[must_use]
    pub fn status_class(&self) -> StatusClass {
        match self {
            // Nothing found is treated as an unsupported URL, not a server fault.
            Self::InvalidInput(_)
            | Self::UnsupportedContentType { .. }
            | Self::ExtractionExhausted { .. } => StatusClass::BadRequest,
            Self::NotCleared => StatusClass::Forbidden,
            Self::PlatformBlocked { .. } => StatusClass::Blocked,
            Self::UpstreamStatus { status } if matches!(*status, 403 | 429) => StatusClass::Blocked,
            Self::SuspiciouslySmallPayload { .. } | Self::UpstreamStatus { .. } => {
                StatusClass::BadGateway
            }
            Self::TransferTimeout(_) => StatusClass::Timeout,
            Self::SessionLaunchFailed { .. } => StatusClass::Unavailable,
            Self::Http(e) if e.is_timeout() => StatusClass::Timeout,
            Self::Http(_) => StatusClass::BadGateway,
            Self::Cancelled | Self::Config(_) | Self::Io(_) => StatusClass::Internal,
        }
    }

    /// Whether the failure is the platform refusing automated access.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status_class() == StatusClass::Blocked
    }

    /// Alternatives worth suggesting for this error.
    #[must_use]
    pub fn alternatives(&self) -> &'static [Alternative] {
        if self.is_blocked() {
            ALTERNATIVES
        } else {
            &[]
        }
    }

    /// Every extraction attempt behind this error, when there were any.
    #[must_use]
    pub fn attempts(&self) -> &[ExtractionAttempt] {
        match self {
            Self::ExtractionExhausted { attempts }
            | Self::PlatformBlocked { attempts, .. }
            | Self::SessionLaunchFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Message that tells an end user what happened and what to do next.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(reason) => format!("Invalid request: {reason}"),
            Self::NotCleared => {
                "The request did not pass the security check. Confirm the risk and try again."
                    .to_string()
            }
            Self::ExtractionExhausted { .. } => {
                "No downloadable media was found at this URL. Make sure the link points at a \
                 public video page or a media file."
                    .to_string()
            }
            Self::PlatformBlocked { platform, .. } => format!(
                "{platform} is blocking automated downloads right now. Try again later or use \
                 one of the suggested alternatives."
            ),
            Self::UpstreamStatus { status: 403 | 429 } => {
                "The media host refused the download. Try again later or use one of the \
                 suggested alternatives."
                    .to_string()
            }
            Self::UnsupportedContentType { content_type, .. } => format!(
                "The server returned {content_type} instead of a media file. The link may need \
                 a login or may have expired."
            ),
            Self::SuspiciouslySmallPayload { received, .. } => format!(
                "The download was only {received} bytes, which is too small to be real media. \
                 The link may have expired."
            ),
            Self::TransferTimeout(limit) => format!(
                "The download did not finish within {} seconds. Try again on a faster \
                 connection.",
                limit.as_secs()
            ),
            Self::SessionLaunchFailed { .. } => {
                "The page renderer is unavailable. Install Chromium or set CHROME_PATH.".to_string()
            }
            Self::UpstreamStatus { status } => {
                format!("The media host answered with HTTP {status}.")
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::Http(e) if e.is_timeout() => {
                "The media host took too long to respond. Try again later.".to_string()
            }
            Self::Http(_) => "Could not reach the media host.".to_string(),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Io(e) => format!("I/O error: {e}"),
        }
    }
}
