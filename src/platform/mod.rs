//! Platform profiles.
//!
//! A [`PlatformProfile`] is the data that drives extraction for one site:
//! which URLs belong to it, whether a direct API client exists, which
//! outgoing browser requests carry its media, and which patterns recover a
//! media URL from rendered page content. Supporting a new site is a matter of
//! adding a profile (built in, or via `[[platforms]]` in the config file).
//!
//! # Example
//!
//! ```rust
//! use snag::platform::PlatformRegistry;
//! use url::Url;
//!
//! let registry = PlatformRegistry::builtin();
//! let url = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
//! assert_eq!(registry.classify(&url).id, "youtube");
//!
//! let url = Url::parse("https://cdn.example/file.mp4").unwrap();
//! assert!(registry.classify(&url).is_generic());
//! ```

mod builtin;

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use url::Url;

use crate::config::{ConfigError, PlatformConfig};
use crate::media::ContentKind;

pub use builtin::GENERIC_ID;

static BUILTIN_PROFILES: LazyLock<Vec<PlatformProfile>> = LazyLock::new(builtin::profiles);
static GENERIC_PROFILE: LazyLock<PlatformProfile> = LazyLock::new(builtin::generic);

/// Protocol-level client available for a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectKind {
    /// YouTube's player API.
    YouTube,
}

/// Resource type a browser declares for an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Media,
    Xhr,
    Fetch,
    Script,
    Image,
    Other,
}

/// Predicate over an intercepted request's URL and resource kind.
#[derive(Debug, Clone)]
pub struct InterceptionFilter {
    pattern: Regex,
    /// Empty means any kind.
    kinds: Vec<ResourceKind>,
}

impl InterceptionFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: case_insensitive(pattern)?,
            kinds: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: &[ResourceKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    #[must_use]
    pub fn matches(&self, url: &str, kind: ResourceKind) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&kind)) && self.pattern.is_match(url)
    }
}

/// Pattern search over page content; the first capture group is the media URL.
#[derive(Debug, Clone)]
pub struct PageRule {
    pattern: Regex,
}

impl PageRule {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: case_insensitive(pattern)?,
        })
    }

    /// First structural match in `content`, with JS/HTML escapes undone.
    #[must_use]
    pub fn apply(&self, content: &str) -> Option<String> {
        self.pattern
            .captures_iter(content)
            .filter_map(|caps| caps.get(1))
            .map(|m| unescape_embedded_url(m.as_str()))
            .find(|candidate| !candidate.is_empty())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Undo the escaping URLs pick up when embedded in JSON, JS strings or HTML
/// attributes (`&`, `\/`, `&amp;`).
#[must_use]
pub fn unescape_embedded_url(raw: &str) -> String {
    raw.replace("\\u0026", "&")
        .replace("\\u003d", "=")
        .replace("\\u003D", "=")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("\\/", "/")
        .replace("&amp;", "&")
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Extraction hints for one platform.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub id: String,
    pub display_name: String,
    patterns: Vec<Regex>,
    pub direct: Option<DirectKind>,
    pub interception_filters: Vec<InterceptionFilter>,
    /// Substrings identifying the platform's media CDN. Empty accepts any
    /// intercepted URL that passed the filters.
    pub media_hosts: Vec<String>,
    pub page_rules: Vec<PageRule>,
    /// Referer the platform's media hosts expect.
    pub referer: Option<String>,
    pub default_title: String,
    pub content_kind: ContentKind,
}

impl PlatformProfile {
    /// Build a profile from a config entry.
    pub fn from_config(config: &PlatformConfig) -> Result<Self, ConfigError> {
        if config.patterns.is_empty() {
            return Err(ConfigError::NoPatterns(config.id.clone()));
        }
        let invalid = |pattern: &String| {
            let platform = config.id.clone();
            let pattern = pattern.clone();
            move |source| ConfigError::InvalidPattern {
                platform,
                pattern,
                source,
            }
        };

        let patterns = config
            .patterns
            .iter()
            .map(|p| case_insensitive(p).map_err(invalid(p)))
            .collect::<Result<Vec<_>, _>>()?;
        let interception_filters = config
            .intercept
            .iter()
            .map(|p| InterceptionFilter::new(p).map_err(invalid(p)))
            .collect::<Result<Vec<_>, _>>()?;
        let page_rules = config
            .page_rules
            .iter()
            .map(|p| PageRule::new(p).map_err(invalid(p)))
            .collect::<Result<Vec<_>, _>>()?;

        let display_name = config.name.clone().unwrap_or_else(|| config.id.clone());
        let default_title = config
            .default_title
            .clone()
            .unwrap_or_else(|| format!("{display_name}-Video"));

        Ok(Self {
            id: config.id.clone(),
            display_name,
            patterns,
            direct: None,
            interception_filters,
            media_hosts: config.media_hosts.clone(),
            page_rules,
            referer: config.referer.clone(),
            default_title,
            content_kind: config.kind,
        })
    }

    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.patterns.iter().any(|p| p.is_match(url))
    }

    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.id == GENERIC_ID
    }

    #[must_use]
    pub fn supports_direct(&self) -> bool {
        self.direct.is_some()
    }

    /// Whether an intercepted request passes any of this platform's filters.
    #[must_use]
    pub fn intercepts(&self, url: &str, kind: ResourceKind) -> bool {
        self.interception_filters
            .iter()
            .any(|f| f.matches(url, kind))
    }

    /// Whether `url` points at this platform's media CDN.
    #[must_use]
    pub fn is_media_host(&self, url: &str) -> bool {
        self.media_hosts.is_empty() || self.media_hosts.iter().any(|h| url.contains(h.as_str()))
    }

    /// URL patterns, for display.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }
}

/// Ordered set of platform profiles; first match wins.
#[derive(Debug, Clone)]
pub struct PlatformRegistry {
    profiles: Vec<PlatformProfile>,
    generic: PlatformProfile,
}

impl PlatformRegistry {
    /// Registry with the built-in profiles only.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            profiles: BUILTIN_PROFILES.clone(),
            generic: GENERIC_PROFILE.clone(),
        }
    }

    /// Registry with configured profiles ahead of the built-in ones.
    pub fn with_configured(configs: &[PlatformConfig]) -> Result<Self, ConfigError> {
        let mut profiles = configs
            .iter()
            .map(PlatformProfile::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        profiles.extend(BUILTIN_PROFILES.iter().cloned());
        Ok(Self {
            profiles,
            generic: GENERIC_PROFILE.clone(),
        })
    }

    /// Profile for `url`, or the generic profile when nothing matches.
    #[must_use]
    pub fn classify(&self, url: &Url) -> &PlatformProfile {
        self.profiles
            .iter()
            .find(|p| p.matches(url))
            .unwrap_or(&self.generic)
    }

    /// Platform-specific profiles in match order (generic excluded).
    #[must_use]
    pub fn profiles(&self) -> &[PlatformProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn generic(&self) -> &PlatformProfile {
        &self.generic
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
