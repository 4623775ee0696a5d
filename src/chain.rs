//! Strategy chain.
//!
//! Runs the applicable extractors for a platform strictly in order, stops at
//! the first success and records every attempt. Fixed order:
//! direct (when the platform has one) -> browser -> generic.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::extract::{
    AttemptOutcome, ExtractFailure, ExtractionAttempt, ExtractionResult, Extractor,
};
use crate::platform::PlatformProfile;

/// What to try for URLs no platform profile claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownPlatformPolicy {
    /// Only the generic extractor.
    #[default]
    GenericOnly,
    /// Render the page first, then fall back to the generic extractor.
    RenderThenGeneric,
}

/// Lifecycle of one chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    /// Running the strategy at this index.
    Running(usize),
    Succeeded,
    ExhaustedFailed,
}

/// A successful run: the result plus every attempt made to get it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ExtractionResult,
    pub attempts: Vec<ExtractionAttempt>,
}

/// The extractors a chain may draw on.
#[derive(Clone)]
pub struct StrategyChain {
    direct: Option<Arc<dyn Extractor>>,
    browser: Option<Arc<dyn Extractor>>,
    generic: Arc<dyn Extractor>,
    policy: UnknownPlatformPolicy,
}

impl StrategyChain {
    #[must_use]
    pub fn new(generic: Arc<dyn Extractor>, policy: UnknownPlatformPolicy) -> Self {
        Self {
            direct: None,
            browser: None,
            generic,
            policy,
        }
    }

    #[must_use]
    pub fn with_direct(mut self, direct: Arc<dyn Extractor>) -> Self {
        self.direct = Some(direct);
        self
    }

    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn Extractor>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Strategies to try for `profile`, in order.
    #[must_use]
    pub fn plan(&self, profile: &PlatformProfile) -> Vec<Arc<dyn Extractor>> {
        let mut plan = Vec::with_capacity(3);
        if profile.is_generic() {
            if self.policy == UnknownPlatformPolicy::RenderThenGeneric {
                plan.extend(self.browser.clone());
            }
        } else {
            if profile.supports_direct() {
                plan.extend(self.direct.clone());
            }
            plan.extend(self.browser.clone());
        }
        plan.push(Arc::clone(&self.generic));
        plan
    }

    /// Run the plan for `profile` against `url`.
    ///
    /// Fails with [`Error::PlatformBlocked`] when every strategy failed and at
    /// least one failure was the platform refusing access. When the renderer
    /// could not start and nothing else found media either, fails with
    /// [`Error::SessionLaunchFailed`]. Otherwise fails with
    /// [`Error::ExtractionExhausted`]. All three carry every attempt.
    pub async fn run(
        &self,
        url: &Url,
        profile: &PlatformProfile,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let plan = self.plan(profile);
        let mut run = ChainRun::new(plan.len());

        for (index, extractor) in plan.iter().enumerate() {
            run.advance(index);
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let started_at = Utc::now();
            let clock = Instant::now();
            debug!(strategy = %extractor.kind(), index, "Trying strategy");
            let outcome = extractor.try_extract(url, profile, cancel).await;
            let elapsed = clock.elapsed();

            match outcome {
                Ok(result) => {
                    info!(
                        strategy = %extractor.kind(),
                        elapsed_ms = elapsed.as_millis(),
                        "Extraction succeeded"
                    );
                    run.attempts.push(ExtractionAttempt {
                        strategy: extractor.kind(),
                        started_at,
                        elapsed,
                        outcome: AttemptOutcome::Success(result.clone()),
                    });
                    run.state = ChainState::Succeeded;
                    return Ok(Resolution {
                        result,
                        attempts: run.attempts,
                    });
                }
                Err(ExtractFailure::Cancelled) => return Err(Error::Cancelled),
                Err(failure) => {
                    warn!(strategy = %extractor.kind(), reason = %failure, "Strategy failed");
                    run.attempts.push(ExtractionAttempt {
                        strategy: extractor.kind(),
                        started_at,
                        elapsed,
                        outcome: AttemptOutcome::Failure(failure),
                    });
                }
            }
        }

        run.state = ChainState::ExhaustedFailed;
        Err(exhausted(profile, run.attempts))
    }
}

/// Pick the error for a run where every strategy failed.
fn exhausted(profile: &PlatformProfile, attempts: Vec<ExtractionAttempt>) -> Error {
    let failures = || attempts.iter().filter_map(ExtractionAttempt::failure);
    if failures().any(ExtractFailure::is_blocking) {
        return Error::PlatformBlocked {
            platform: profile.display_name.clone(),
            attempts,
        };
    }

    // A missing renderer only explains the outcome when the other strategies
    // merely found nothing.
    let launch_failure = failures().find_map(|f| match f {
        ExtractFailure::SessionLaunchFailed(reason) => Some(reason.clone()),
        _ => None,
    });
    let others_empty = failures().all(|f| {
        matches!(
            f,
            ExtractFailure::SessionLaunchFailed(_) | ExtractFailure::NoMediaFound
        )
    });
    match launch_failure {
        Some(reason) if others_empty => Error::SessionLaunchFailed { reason, attempts },
        _ => Error::ExtractionExhausted { attempts },
    }
}

/// Bookkeeping for one run; state only moves forward.
struct ChainRun {
    state: ChainState,
    attempts: Vec<ExtractionAttempt>,
}

impl ChainRun {
    fn new(planned: usize) -> Self {
        Self {
            state: ChainState::Idle,
            attempts: Vec::with_capacity(planned),
        }
    }

    fn advance(&mut self, index: usize) {
        debug_assert!(match self.state {
            ChainState::Idle => index == 0,
            ChainState::Running(current) => index == current + 1,
            ChainState::Succeeded | ChainState::ExhaustedFailed => false,
        });
        self.state = ChainState::Running(index);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extract::StrategyKind;
    use crate::platform::PlatformRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extractor with a scripted outcome that counts its invocations.
    pub(crate) struct Scripted {
        pub kind: StrategyKind,
        pub outcome: std::result::Result<ExtractionResult, ExtractFailure>,
        pub calls: AtomicUsize,
    }

    impl Scripted {
        pub(crate) fn ok(kind: StrategyKind, url: &str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: Ok(ExtractionResult {
                    resource_url: Url::parse(url).unwrap(),
                    title: "Clip".into(),
                    approx_size_bytes: None,
                    content_type_hint: "video/mp4".into(),
                    referer: None,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn fail(kind: StrategyKind, failure: ExtractFailure) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: Err(failure),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn try_extract(
            &self,
            _url: &Url,
            _profile: &PlatformProfile,
            _cancel: &CancellationToken,
        ) -> std::result::Result<ExtractionResult, ExtractFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn profile_for(url: &str) -> (Url, PlatformProfile) {
        let url = Url::parse(url).unwrap();
        let profile = PlatformRegistry::builtin().classify(&url).clone();
        (url, profile)
    }

    const YOUTUBE: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[tokio::test]
    async fn stops_after_first_success() {
        let direct = Scripted::ok(StrategyKind::Direct, "https://rr1.googlevideo.com/v");
        let browser = Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound);
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic.clone(), UnknownPlatformPolicy::GenericOnly)
            .with_direct(direct.clone())
            .with_browser(browser.clone());

        let (url, profile) = profile_for(YOUTUBE);
        let resolution = chain.run(&url, &profile, &CancellationToken::new()).await.unwrap();

        assert_eq!(resolution.attempts.len(), 1);
        assert!(resolution.attempts[0].succeeded());
        assert_eq!((direct.calls(), browser.calls(), generic.calls()), (1, 0, 0));
    }

    #[tokio::test]
    async fn runs_everything_in_order_when_all_fail() {
        let direct = Scripted::fail(
            StrategyKind::Direct,
            ExtractFailure::NoQualifyingRendition("none".into()),
        );
        let browser = Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound);
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic.clone(), UnknownPlatformPolicy::GenericOnly)
            .with_direct(direct.clone())
            .with_browser(browser.clone());

        let (url, profile) = profile_for(YOUTUBE);
        let err = chain.run(&url, &profile, &CancellationToken::new()).await.unwrap_err();

        let Error::ExtractionExhausted { attempts } = err else {
            panic!("expected ExtractionExhausted, got {err:?}");
        };
        let order: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(
            order,
            vec![StrategyKind::Direct, StrategyKind::Browser, StrategyKind::Generic]
        );
    }

    #[tokio::test]
    async fn blocking_failure_becomes_platform_blocked() {
        let direct = Scripted::fail(
            StrategyKind::Direct,
            ExtractFailure::ResolutionBlocked("Sign in to confirm you're not a bot".into()),
        );
        let browser = Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound);
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly)
            .with_direct(direct)
            .with_browser(browser);

        let (url, profile) = profile_for(YOUTUBE);
        let err = chain.run(&url, &profile, &CancellationToken::new()).await.unwrap_err();
        match err {
            Error::PlatformBlocked { platform, attempts } => {
                assert_eq!(platform, "YouTube");
                assert_eq!(attempts.len(), 3);
                assert!(attempts[0].failure().unwrap().is_blocking());
            }
            other => panic!("expected PlatformBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_renderer_is_reported_when_nothing_else_found_media() {
        let browser = Scripted::fail(
            StrategyKind::Browser,
            ExtractFailure::SessionLaunchFailed("no browser executable".into()),
        );
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly)
            .with_browser(browser);

        let (url, profile) = profile_for("https://vimeo.com/76979871");
        let err = chain.run(&url, &profile, &CancellationToken::new()).await.unwrap_err();
        match &err {
            Error::SessionLaunchFailed { reason, attempts } => {
                assert_eq!(reason, "no browser executable");
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("expected SessionLaunchFailed, got {other:?}"),
        }
        assert_eq!(err.status_class().http_status(), 503);
    }

    #[tokio::test]
    async fn missing_renderer_yields_to_other_failures() {
        let browser = Scripted::fail(
            StrategyKind::Browser,
            ExtractFailure::SessionLaunchFailed("no browser executable".into()),
        );
        let generic = Scripted::fail(
            StrategyKind::Generic,
            ExtractFailure::Network("connection refused".into()),
        );
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly)
            .with_browser(browser);

        let (url, profile) = profile_for("https://vimeo.com/76979871");
        let err = chain.run(&url, &profile, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionExhausted { .. }), "{err:?}");
    }

    #[test]
    fn plans_per_platform_and_policy() {
        let direct = Scripted::fail(StrategyKind::Direct, ExtractFailure::NoMediaFound);
        let browser = Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound);
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::GenericOnly)
            .with_direct(direct)
            .with_browser(browser);
        let kinds = |chain: &StrategyChain, url: &str| {
            let (_, profile) = profile_for(url);
            chain.plan(&profile).iter().map(|e| e.kind()).collect::<Vec<_>>()
        };

        assert_eq!(
            kinds(&chain, YOUTUBE),
            vec![StrategyKind::Direct, StrategyKind::Browser, StrategyKind::Generic]
        );
        assert_eq!(
            kinds(&chain, "https://vimeo.com/76979871"),
            vec![StrategyKind::Browser, StrategyKind::Generic]
        );
        assert_eq!(
            kinds(&chain, "https://cdn.example/file.mp4"),
            vec![StrategyKind::Generic]
        );

        let mut render_first = chain.clone();
        render_first.policy = UnknownPlatformPolicy::RenderThenGeneric;
        assert_eq!(
            kinds(&render_first, "https://cdn.example/file.mp4"),
            vec![StrategyKind::Browser, StrategyKind::Generic]
        );
    }

    #[test]
    fn browserless_chain_skips_rendering() {
        let generic = Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound);
        let chain = StrategyChain::new(generic, UnknownPlatformPolicy::RenderThenGeneric);
        let (_, profile) = profile_for("https://vimeo.com/1");
        assert_eq!(chain.plan(&profile).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_chain_runs_nothing() {
        let generic = Scripted::ok(StrategyKind::Generic, "https://cdn.example/file.mp4");
        let chain = StrategyChain::new(generic.clone(), UnknownPlatformPolicy::GenericOnly);
        let (url, profile) = profile_for("https://cdn.example/file.mp4");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = chain.run(&url, &profile, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(generic.calls(), 0);
    }
}
