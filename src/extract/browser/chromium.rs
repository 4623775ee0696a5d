//! Chromium rendering sessions over the DevTools protocol.
//!
//! Every session is its own browser process with a throwaway profile
//! directory, so cookies and storage never leak between requests.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{InterceptionSink, RenderEngine, RenderSession};
use crate::config::BrowserConfig;
use crate::fingerprint::chromium_user_agent;
use crate::platform::ResourceKind;

/// Environment variable naming a Chrome/Chromium binary.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

const CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const WINDOW: (u32, u32) = (1366, 768);

/// Find a browser binary: config, then `CHROME_PATH`, then `PATH`.
#[must_use]
pub fn discover_executable(config: &BrowserConfig) -> Option<PathBuf> {
    config
        .executable
        .clone()
        .or_else(|| std::env::var_os(CHROME_PATH_ENV).map(PathBuf::from))
        .or_else(|| CANDIDATES.iter().find_map(|name| which::which(name).ok()))
}

fn resource_kind(kind: Option<&ResourceType>) -> ResourceKind {
    match kind {
        Some(ResourceType::Document) => ResourceKind::Document,
        Some(ResourceType::Media) => ResourceKind::Media,
        Some(ResourceType::Xhr) => ResourceKind::Xhr,
        Some(ResourceType::Fetch) => ResourceKind::Fetch,
        Some(ResourceType::Script) => ResourceKind::Script,
        Some(ResourceType::Image) => ResourceKind::Image,
        _ => ResourceKind::Other,
    }
}

/// Launches one Chromium process per session.
pub struct ChromiumEngine {
    executable: PathBuf,
    headless: bool,
}

impl ChromiumEngine {
    /// Engine for the discovered browser binary, if there is one.
    #[must_use]
    pub fn discover(config: &BrowserConfig) -> Option<Self> {
        let executable = discover_executable(config)?;
        debug!(executable = %executable.display(), "Using Chromium");
        Some(Self {
            executable,
            headless: config.headless,
        })
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self, sink: InterceptionSink) -> anyhow::Result<Box<dyn RenderSession>> {
        let profile_dir = std::env::temp_dir().join(format!("snag-{}", uuid::Uuid::new_v4()));

        let mut builder = LaunchConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(&profile_dir)
            .window_size(WINDOW.0, WINDOW.1)
            .arg(format!("--user-agent={}", chromium_user_agent()))
            .arg("--mute-audio")
            .arg("--autoplay-policy=no-user-gesture-required");
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow!(e))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let armed = async {
            let page = browser.new_page("about:blank").await?;
            page.execute(EnableParams::default()).await?;
            let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
            let observer = tokio::spawn(async move {
                while let Some(event) = requests.next().await {
                    sink.offer(&event.request.url, resource_kind(event.r#type.as_ref()));
                }
            });
            anyhow::Ok((page, observer))
        }
        .await;

        match armed {
            Ok((page, observer)) => Ok(Box::new(ChromiumSession {
                browser,
                page,
                handler_task,
                observer,
                profile_dir,
            })),
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                Err(e.context("failed to prepare Chromium page"))
            }
        }
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    observer: JoinHandle<()>,
    profile_dir: PathBuf,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn navigate(&mut self, url: &Url) -> anyhow::Result<()> {
        let params = NavigateParams::builder()
            .url(url.as_str())
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.goto(params).await?;
        Ok(())
    }

    async fn content(&mut self) -> anyhow::Result<String> {
        Ok(self.page.content().await?)
    }

    async fn title(&mut self) -> Option<String> {
        self.page.get_title().await.ok().flatten()
    }

    async fn close(self: Box<Self>) {
        let Self {
            mut browser,
            page,
            handler_task,
            observer,
            profile_dir,
        } = *self;

        observer.abort();
        let _ = page.close().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Chromium did not close cleanly");
        }
        let _ = browser.wait().await;
        handler_task.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&profile_dir).await {
            debug!(error = %e, dir = %profile_dir.display(), "Profile directory not removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_executable_wins() {
        let config = BrowserConfig {
            executable: Some(PathBuf::from("/opt/chrome/chrome")),
            ..BrowserConfig::default()
        };
        assert_eq!(
            discover_executable(&config),
            Some(PathBuf::from("/opt/chrome/chrome"))
        );
    }

    #[test]
    fn resource_types_map() {
        assert_eq!(resource_kind(Some(&ResourceType::Media)), ResourceKind::Media);
        assert_eq!(resource_kind(Some(&ResourceType::Xhr)), ResourceKind::Xhr);
        assert_eq!(resource_kind(Some(&ResourceType::Stylesheet)), ResourceKind::Other);
        assert_eq!(resource_kind(None), ResourceKind::Other);
    }
}
