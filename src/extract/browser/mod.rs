//! Browser-driven extraction.
//!
//! Renders the page in an isolated headless session, watches the requests the
//! page's player makes, and picks the one that goes to the platform's media
//! CDN, preferring progressive files over HLS/DASH playlists. When the player
//! fetched nothing recognisable, the platform's page rules are run over the
//! rendered content instead.
//!
//! Each session lives in a task of its own, so it is closed even when the
//! caller stops waiting for the result.
//!
//! The browser itself sits behind [`RenderEngine`] / [`RenderSession`]; the
//! Chromium implementation lives in [`chromium`] (feature `browser`).

#[cfg(feature = "browser")]
pub mod chromium;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};
use url::Url;

use super::{ExtractFailure, ExtractionResult, Extractor, StrategyKind};
use crate::config::BrowserConfig;
use crate::media::{mime_from_url, prefer_progressive};
use crate::platform::{InterceptionFilter, PlatformProfile, ResourceKind};
use crate::sanitize::title_or_default;

/// Upper bound on intercepted requests buffered per session.
const INTERCEPT_CAPACITY: usize = 256;

/// An outgoing request observed in a rendering session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub kind: ResourceKind,
}

/// Hands matching requests from a session's observer to the extractor.
///
/// [`offer`](Self::offer) never waits: when the buffer is full the request is
/// dropped and counted, so page loading is never held up.
#[derive(Clone)]
pub struct InterceptionSink {
    filters: Arc<[InterceptionFilter]>,
    tx: mpsc::Sender<InterceptedRequest>,
    dropped: Arc<AtomicUsize>,
}

impl InterceptionSink {
    fn channel(
        profile: &PlatformProfile,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<InterceptedRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            filters: profile.interception_filters.clone().into(),
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        (sink, rx)
    }

    /// Record `url` if it passes the platform's interception filters.
    pub fn offer(&self, url: &str, kind: ResourceKind) {
        if !self.filters.iter().any(|f| f.matches(url, kind)) {
            return;
        }
        let request = InterceptedRequest {
            url: url.to_string(),
            kind,
        };
        if self.tx.try_send(request).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Requests discarded because the buffer was full or closed.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Launches rendering sessions.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Start an isolated session whose request observer feeds `sink`.
    ///
    /// The observer must be armed before this returns.
    async fn launch(&self, sink: InterceptionSink) -> anyhow::Result<Box<dyn RenderSession>>;
}

/// One live rendering session.
#[async_trait]
pub trait RenderSession: Send {
    /// Load `url` and wait for the navigation to commit.
    async fn navigate(&mut self, url: &Url) -> anyhow::Result<()>;

    /// Rendered document markup.
    async fn content(&mut self) -> anyhow::Result<String>;

    /// Document title, if any.
    async fn title(&mut self) -> Option<String>;

    /// Tear the session down and release everything it holds.
    async fn close(self: Box<Self>);
}

/// Extractor driving a headless browser.
pub struct BrowserExtractor {
    renderer: Arc<Renderer>,
}

impl BrowserExtractor {
    #[must_use]
    pub fn new(engine: Arc<dyn RenderEngine>, config: &BrowserConfig) -> Self {
        Self {
            renderer: Arc::new(Renderer {
                engine,
                sessions: Semaphore::new(config.max_sessions.max(1)),
                navigation_timeout: config.navigation_timeout(),
                settle_delay: config.settle_delay(),
            }),
        }
    }
}

/// Shared by every session task.
struct Renderer {
    engine: Arc<dyn RenderEngine>,
    /// One permit per live session.
    sessions: Semaphore,
    navigation_timeout: Duration,
    settle_delay: Duration,
}

impl Renderer {
    /// Acquire a permit, launch, drive and close one session.
    async fn extract(
        self: Arc<Self>,
        url: Url,
        profile: PlatformProfile,
        cancel: CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure> {
        // Held until the session is closed.
        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExtractFailure::Cancelled),
            permit = self.sessions.acquire() => permit.map_err(|_| {
                ExtractFailure::SessionLaunchFailed("session pool closed".to_string())
            })?,
        };

        let (sink, mut observed) = InterceptionSink::channel(&profile, INTERCEPT_CAPACITY);
        let counter = sink.clone();
        // Not raced against cancellation: a half-launched browser cannot be
        // closed.
        let mut session = self.engine.launch(sink).await.map_err(|e| {
            warn!(error = %e, "Rendering session failed to launch");
            ExtractFailure::SessionLaunchFailed(e.to_string())
        })?;

        let outcome = if cancel.is_cancelled() {
            Err(ExtractFailure::Cancelled)
        } else {
            self.drive(session.as_mut(), &mut observed, &url, &profile, &cancel)
                .await
        };
        session.close().await;
        debug!("Rendering session closed");

        let dropped = counter.dropped();
        if dropped > 0 {
            warn!(dropped, "Intercepted requests dropped");
        }
        outcome
    }

    #[instrument(skip_all)]
    async fn drive(
        &self,
        session: &mut dyn RenderSession,
        observed: &mut mpsc::Receiver<InterceptedRequest>,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure> {
        let navigation = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExtractFailure::Cancelled),
            r = tokio::time::timeout(self.navigation_timeout, session.navigate(url)) => r,
        };
        match navigation {
            Err(_) => return Err(ExtractFailure::NavigationTimeout(self.navigation_timeout)),
            Ok(Err(e)) => return Err(ExtractFailure::Network(format!("navigation failed: {e}"))),
            Ok(Ok(())) => {}
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExtractFailure::Cancelled),
            () = tokio::time::sleep(self.settle_delay) => {}
        }

        let mut requests = Vec::new();
        while let Ok(request) = observed.try_recv() {
            requests.push(request);
        }
        debug!(observed = requests.len(), "Settled");

        let title = title_or_default(session.title().await.as_deref(), &profile.default_title);
        let referer = profile
            .referer
            .clone()
            .unwrap_or_else(|| url.to_string());

        let intercepted = prefer_progressive(
            requests
                .iter()
                .filter(|r| profile.is_media_host(&r.url))
                .filter_map(|r| Url::parse(&r.url).ok()),
        );
        if let Some(media_url) = intercepted {
            info!(media_url = %media_url, "Intercepted media request");
            return Ok(result(media_url, title, referer));
        }

        let content = session
            .content()
            .await
            .map_err(|e| ExtractFailure::Network(format!("failed to read page content: {e}")))?;
        let from_rules = prefer_progressive(
            profile
                .page_rules
                .iter()
                .filter_map(|rule| rule.apply(&content))
                .filter_map(|raw| url.join(&raw).ok())
                .filter(|u| matches!(u.scheme(), "http" | "https")),
        );
        match from_rules {
            Some(media_url) => {
                info!(media_url = %media_url, "Page rule matched");
                Ok(result(media_url, title, referer))
            }
            None => Err(ExtractFailure::NoMediaFound),
        }
    }
}

fn result(media_url: Url, title: String, referer: String) -> ExtractionResult {
    ExtractionResult {
        content_type_hint: mime_from_url(&media_url).unwrap_or_default().to_string(),
        resource_url: media_url,
        title,
        approx_size_bytes: None,
        referer: Some(referer),
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Browser
    }

    #[instrument(skip(self, profile, cancel), fields(url = %url, platform = %profile.id))]
    async fn try_extract(
        &self,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractFailure> {
        // Dropping this future cancels the session task, which then closes
        // the session on its own.
        let scope = cancel.child_token();
        let _abandon = scope.clone().drop_guard();
        let task = tokio::spawn(
            Arc::clone(&self.renderer)
                .extract(url.clone(), profile.clone(), scope)
                .in_current_span(),
        );
        task.await.unwrap_or_else(|e| {
            Err(ExtractFailure::SessionLaunchFailed(format!(
                "rendering task failed: {e}"
            )))
        })
    }
}
