//! HTTP boundary: `POST /api/download` and friends.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{Alternative, Error, Result};
use crate::extract::ExtractionAttempt;
use crate::pipeline::{ExtractionRequest, Pipeline};
use crate::sanitize::content_disposition;
use crate::transfer::TransferProgress;

const NO_CACHE: &str = "no-cache, no-store";

/// Body of `POST /api/download`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadBody {
    #[serde(default)]
    url: String,
    #[serde(default)]
    metadata_only: bool,
    #[serde(default = "cleared")]
    can_proceed: bool,
}

fn cleared() -> bool {
    true
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    is_blocked: bool,
    #[serde(skip_serializing_if = "is_empty")]
    alternatives: &'a [Alternative],
    #[serde(skip_serializing_if = "is_empty")]
    attempts: &'a [ExtractionAttempt],
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

/// An [`Error`] on its way out as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status_class().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %err, "Request failed");
        } else {
            info!(error = %err, status = status.as_u16(), "Request refused");
        }

        let body = Json(ErrorBody {
            error: err.user_message(),
            is_blocked: err.is_blocked(),
            alternatives: err.alternatives(),
            attempts: err.attempts(),
        });
        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        response
    }
}

/// Build the router with all middleware and routes.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/api/download", get(method_not_allowed).post(download))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// Serve until `cancel` fires.
pub async fn serve(pipeline: Arc<Pipeline>, bind: &str, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| Error::InvalidInput(format!("bind address `{bind}`: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Server shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Use POST method" })),
    )
}

async fn download(
    State(pipeline): State<Arc<Pipeline>>,
    body: std::result::Result<Json<DownloadBody>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let request = ExtractionRequest::parse(&body.url, body.metadata_only, body.can_proceed)?;

    // Dropping the handler future or the response body cancels everything
    // this request started.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    if request.metadata_only {
        let info = pipeline.metadata(&request, &cancel).await?;
        let mut response = Json(info).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        return Ok(response);
    }

    let request_id = request.request_id;
    let progress = Box::new(move |p: TransferProgress| {
        debug!(%request_id, percent = p.percent, bytes = p.bytes_received, "Progress");
    });
    let download = pipeline.download(&request, &cancel, Some(progress)).await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&download.info.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    let disposition = HeaderValue::from_str(&content_disposition(&download.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    if let Some(length) = download.transfer.content_length() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));

    let stream = download.transfer.into_stream().map(move |chunk| {
        let _ = &guard;
        chunk
    });
    Ok((headers, Body::from_stream(stream)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::Scripted;
    use crate::chain::{StrategyChain, UnknownPlatformPolicy};
    use crate::config::{NetworkConfig, TransferConfig};
    use crate::extract::direct::tests::{playable_fixture, FixedPlayer};
    use crate::extract::{DirectExtractor, ExtractFailure, StrategyKind};
    use crate::http_client::MediaClient;
    use crate::platform::PlatformRegistry;
    use crate::transfer::TransferManager;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(chain: StrategyChain) -> Router {
        let client = Arc::new(MediaClient::new(&NetworkConfig::default()).unwrap());
        let transfers = TransferManager::new(Arc::clone(&client), &TransferConfig::default());
        router(Arc::new(Pipeline::new(
            PlatformRegistry::builtin(),
            chain,
            client,
            transfers,
        )))
    }

    fn unreachable_chain() -> StrategyChain {
        StrategyChain::new(
            Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound),
            UnknownPlatformPolicy::GenericOnly,
        )
    }

    fn post(json: &serde_json::Value) -> Request<Body> {
        Request::post("/api/download")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn json_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn get_is_rejected() {
        let response = app(unreachable_chain())
            .oneshot(Request::get("/api/download").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_of(response).await["error"], "Use POST method");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app(unreachable_chain())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_url_is_bad_request() {
        let response = app(unreachable_chain())
            .oneshot(post(&serde_json::json!({ "metadataOnly": true })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_of(response).await;
        assert!(body["error"].as_str().unwrap().contains("URL is required"));
        assert!(body.get("isBlocked").is_none());
    }

    #[tokio::test]
    async fn uncleared_request_is_forbidden() {
        let response = app(unreachable_chain())
            .oneshot(post(&serde_json::json!({
                "url": "https://cdn.example/file.mp4",
                "canProceed": false
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsupported_url_is_bad_request_with_attempts() {
        let response = app(unreachable_chain())
            .oneshot(post(&serde_json::json!({
                "url": "https://example.org/about",
                "metadataOnly": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_of(response).await;
        assert_eq!(body["attempts"].as_array().unwrap().len(), 1);
        assert_eq!(body["attempts"][0]["strategy"], "generic");
    }

    #[tokio::test]
    async fn blocked_platform_suggests_alternatives() {
        let chain = StrategyChain::new(
            Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound),
            UnknownPlatformPolicy::GenericOnly,
        )
        .with_direct(Scripted::fail(
            StrategyKind::Direct,
            ExtractFailure::ResolutionBlocked("LOGIN_REQUIRED".into()),
        ))
        .with_browser(Scripted::fail(StrategyKind::Browser, ExtractFailure::NoMediaFound));

        let response = app(chain)
            .oneshot(post(&serde_json::json!({
                "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "metadataOnly": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_of(response).await;
        assert_eq!(body["isBlocked"], true);
        assert_eq!(body["alternatives"].as_array().unwrap().len(), 3);
        assert_eq!(body["attempts"].as_array().unwrap().len(), 3);
        assert_eq!(body["attempts"][0]["success"], false);
    }

    #[tokio::test]
    async fn metadata_envelope() {
        let chain = StrategyChain::new(
            Scripted::fail(StrategyKind::Generic, ExtractFailure::NoMediaFound),
            UnknownPlatformPolicy::GenericOnly,
        )
        .with_direct(Arc::new(DirectExtractor::new(Arc::new(FixedPlayer(
            playable_fixture(),
        )))));

        let response = app(chain)
            .oneshot(post(&serde_json::json!({
                "url": "https://youtu.be/dQw4w9WgXcQ",
                "metadataOnly": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], NO_CACHE);
        let body = json_of(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["contentType"], "video/mp4");
        assert_eq!(body["size"], 13_456_789);
        assert_eq!(body["isRealVideo"], true);
    }
}
