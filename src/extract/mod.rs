//! Media URL extraction strategies.
//!
//! Each strategy implements [`Extractor`]. The [`crate::chain`] module runs
//! them in order for a platform until one produces an [`ExtractionResult`].
//!
//! | Strategy | When | How |
//! |----------|------|-----|
//! | [`DirectExtractor`] | platform has a public player API | API call, no rendering |
//! | [`BrowserExtractor`] | any platform (unknown ones only by policy) | headless session + request interception |
//! | [`GenericExtractor`] | always last | `HEAD` probe, then HTML scan |

pub mod browser;
pub mod direct;
pub mod generic;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::platform::PlatformProfile;

pub use browser::BrowserExtractor;
pub use direct::DirectExtractor;
pub use generic::GenericExtractor;

/// Which strategy produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Direct,
    Browser,
    Generic,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Browser => "browser",
            Self::Generic => "generic",
        })
    }
}

/// A resolved media resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub resource_url: Url,
    /// Already sanitized.
    pub title: String,
    pub approx_size_bytes: Option<u64>,
    /// MIME type without parameters; may be empty when nothing hinted at one.
    pub content_type_hint: String,
    /// Referer the media host expects.
    pub referer: Option<String>,
}

/// Why one strategy failed. Recovered by the chain, which moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractFailure {
    #[error("URL is not a recognised {0} media address")]
    InvalidUrlFormat(String),

    #[error("resolution blocked: {0}")]
    ResolutionBlocked(String),

    #[error("no qualifying rendition: {0}")]
    NoQualifyingRendition(String),

    #[error("browser session failed to launch: {0}")]
    SessionLaunchFailed(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("no media found")]
    NoMediaFound,

    #[error("blocked by host (HTTP {0})")]
    Blocked(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,
}

impl ExtractFailure {
    /// Whether the failure means the platform is refusing automated access.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::ResolutionBlocked(_) | Self::Blocked(_))
    }

    /// Classify an HTTP client error.
    #[must_use]
    pub fn from_http(err: &reqwest::Error) -> Self {
        match err.status().map(|s| s.as_u16()) {
            Some(status @ (403 | 429)) => Self::Blocked(status),
            _ => Self::Network(err.to_string()),
        }
    }
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(ExtractionResult),
    Failure(ExtractFailure),
}

/// Record of one strategy invocation.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

impl ExtractionAttempt {
    #[must_use]
    pub fn failure(&self) -> Option<&ExtractFailure> {
        match &self.outcome {
            AttemptOutcome::Failure(failure) => Some(failure),
            AttemptOutcome::Success(_) => None,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success(_))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttemptSummary {
    strategy: StrategyKind,
    started_at: DateTime<Utc>,
    elapsed_ms: u128,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Serialize for ExtractionAttempt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AttemptSummary {
            strategy: self.strategy,
            started_at: self.started_at,
            elapsed_ms: self.elapsed.as_millis(),
            success: self.succeeded(),
            reason: self.failure().map(ToString::to_string),
        }
        .serialize(serializer)
    }
}

/// One way of turning a page URL into a media URL.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Resolve `url` using the hints in `profile`.
    ///
    /// Implementations return [`ExtractFailure::Cancelled`] promptly once
    /// `cancel` fires and release anything they acquired first.
    async fn try_extract(
        &self,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure>;
}
