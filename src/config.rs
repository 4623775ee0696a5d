//! Configuration loaded from `~/.config/snag/config.toml`.
//!
//! Every key is optional; a missing file means defaults. `SNAG_CONFIG`
//! points at an alternative file.
//!
//! ```toml
//! [browser]
//! max_sessions = 1
//! executable = "/usr/bin/chromium"
//!
//! [extraction]
//! unknown_platform_policy = "render-then-generic"
//!
//! [[platforms]]
//! id = "streamable"
//! patterns = ["streamable\\.com/"]
//! media_hosts = ["cdn-cf-east.streamable.com"]
//! page_rules = ['"url":\s*"(https?:[^"]+\.mp4[^"]*)"']
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::chain::UnknownPlatformPolicy;
use crate::media::ContentKind;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "SNAG_CONFIG";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("platform `{platform}` has an invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        platform: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("platform `{0}` declares no URL patterns")]
    NoPatterns(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub browser: BrowserConfig,
    pub transfer: TransferConfig,
    pub extraction: ExtractionConfig,
    pub server: ServerConfig,
    /// Extra platform profiles, consulted before the built-in ones.
    pub platforms: Vec<PlatformConfig>,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    /// Timeout for page fetches, probes and API calls (not media transfers).
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 15,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Headless browser settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    /// Chrome/Chromium binary; discovered from `CHROME_PATH` or `PATH` when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Maximum rendering sessions alive at once across all requests.
    pub max_sessions: usize,
    pub navigation_timeout_secs: u64,
    /// Grace period after navigation for script-driven media loading.
    pub settle_delay_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: None,
            headless: true,
            max_sessions: 2,
            navigation_timeout_secs: 30,
            settle_delay_ms: 3000,
        }
    }
}

impl BrowserConfig {
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Byte transfer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Wall-clock bound on a whole transfer, connection setup included.
    pub timeout_secs: u64,
    /// Minimum spacing between progress updates.
    pub progress_interval_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            progress_interval_ms: 250,
        }
    }
}

impl TransferConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Strategy chain settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub unknown_platform_policy: UnknownPlatformPolicy,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

/// A user-defined platform profile.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub id: String,
    /// Human-readable name; defaults to `id`.
    pub name: Option<String>,
    /// URL regexes (case-insensitive).
    pub patterns: Vec<String>,
    /// Regexes over intercepted request URLs.
    #[serde(default)]
    pub intercept: Vec<String>,
    /// Substrings identifying the platform's media CDN.
    #[serde(default)]
    pub media_hosts: Vec<String>,
    /// Regexes with one capture group, applied to rendered page content.
    #[serde(default)]
    pub page_rules: Vec<String>,
    pub referer: Option<String>,
    pub default_title: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: ContentKind,
}

fn default_kind() -> ContentKind {
    ContentKind::Video
}

impl Config {
    /// Load configuration from `SNAG_CONFIG` or the default location.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Return the path to the default config file.
#[must_use]
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snag")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert!(config.platforms.is_empty());
        assert_eq!(config.transfer.timeout(), Duration::from_secs(300));
        assert_eq!(config.browser.max_sessions, 2);
        assert_eq!(
            config.extraction.unknown_platform_policy,
            UnknownPlatformPolicy::GenericOnly
        );
    }

    #[test]
    fn parse_partial_sections() {
        let config = Config::parse(
            r#"
[browser]
max_sessions = 1
settle_delay_ms = 500

[extraction]
unknown_platform_policy = "render-then-generic"
"#,
        )
        .unwrap();
        assert_eq!(config.browser.max_sessions, 1);
        assert_eq!(config.browser.settle_delay(), Duration::from_millis(500));
        assert!(config.browser.enabled);
        assert_eq!(
            config.extraction.unknown_platform_policy,
            UnknownPlatformPolicy::RenderThenGeneric
        );
    }

    #[test]
    fn parse_platform_entries() {
        let config = Config::parse(
            r#"
[[platforms]]
id = "streamable"
patterns = ["streamable\\.com/"]
media_hosts = ["streamable.com"]
kind = "video"

[[platforms]]
id = "podhost"
patterns = ["pods\\.example/"]
kind = "audio"
"#,
        )
        .unwrap();
        assert_eq!(config.platforms.len(), 2);
        assert_eq!(config.platforms[0].patterns, vec!["streamable\\.com/"]);
        assert_eq!(config.platforms[1].kind, ContentKind::Audio);
        assert!(config.platforms[1].intercept.is_empty());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load_from(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(Config::parse("[browser\nmax_sessions = ").is_err());
    }
}
