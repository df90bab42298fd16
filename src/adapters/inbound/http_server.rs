//! Broadcast HTTP Front End
//!
//! Accepts requests on any path, broadcasts them to every member of the
//! target service and answers with the aggregated result. `/health` and
//! `/version` are served locally.

use crate::application::BroadcastService;
use crate::domain::entities::InboundRequest;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Targets")]
    pub targets: usize,
    #[serde(rename = "Resolutions")]
    pub resolutions: u64,
    #[serde(rename = "Failures")]
    pub failures: u64,
    #[serde(rename = "LastError")]
    pub last_error: Option<String>,
    #[serde(rename = "AgeSecs")]
    pub age_secs: Option<u64>,
}

/// Front end state.
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<BroadcastService>,
}

/// Build the router: local endpoints plus the broadcast fallback.
pub fn router(service: Arc<BroadcastService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .fallback(broadcast_handler)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(HttpState { service })
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::POST,
            Method::GET,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
        ])
}

/// Broadcast front end server.
pub struct HttpServer {
    listen_addr: String,
    service: Arc<BroadcastService>,
    max_body_bytes: usize,
}

impl HttpServer {
    pub fn new(listen_addr: String, service: Arc<BroadcastService>, max_body_bytes: usize) -> Self {
        Self {
            listen_addr,
            service,
            max_body_bytes,
        }
    }

    /// Serve until `shutdown` completes, then drain in-flight broadcasts.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.service.clone(), self.max_body_bytes);

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("broadcaster listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// Handler functions

async fn health_handler(State(state): State<HttpState>) -> Response {
    let cache = state.service.cache();

    // Warm the cache so readiness reflects a real resolution attempt.
    if let Err(e) = cache.get_targets().await {
        tracing::debug!("health check could not resolve targets: {}", e);
    }

    match cache.status().await {
        Ok(status) => {
            let (code, label) = match (status.resolved, status.last_error.is_some()) {
                (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "UNRESOLVED"),
                (true, true) => (StatusCode::OK, "DEGRADED"),
                (true, false) => (StatusCode::OK, "OK"),
            };
            let response = HealthResponse {
                status: label.to_string(),
                targets: status.targets,
                resolutions: status.resolutions,
                failures: status.failures,
                last_error: status.last_error.map(|e| e.to_string()),
                age_secs: status.age.map(|a| a.as_secs()),
            };
            (code, Json(response)).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "Status": "DOWN", "Error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn version_handler() -> impl IntoResponse {
    format!("pod-broadcaster {}", env!("CARGO_PKG_VERSION"))
}

async fn broadcast_handler(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::info!("handle {} {}", method, uri);

    let request = InboundRequest {
        method: method.as_str().to_string(),
        path_and_query: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body,
    };

    let result = match state.service.broadcast(request).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("broadcast failed: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "Error": e.to_string() })),
            )
                .into_response();
        }
    };

    match serde_json::to_vec(&result) {
        Ok(mut body) => {
            body.push(b'\n');
            (
                [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("failed to encode aggregate result: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
