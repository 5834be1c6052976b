//! HTTP surface of the relay.
//!
//! `/chat` forwards the question to the LLM untouched, `/ask` first injects
//! the nearest knowledge passages. Both stream the LLM server's bytes back to
//! the client as they arrive.


use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::RelayError;
use crate::query::{QueryMode, QueryPipeline};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
}

impl AppState {
    #[inline]
    pub fn new(pipeline: QueryPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestionParams {
    q: Option<String>,
}

impl QuestionParams {
    /// Only an absent `q` is rejected; an empty question is forwarded as is
    fn into_question(self) -> Result<String, RelayError> {
        self.q
            .ok_or_else(|| RelayError::InvalidQuery("missing query parameter `q`".to_string()))
    }
}

impl RelayError {
    /// HTTP status reported to clients for this error
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IndexNotFound { .. } | Self::EmptyIndex => StatusCode::SERVICE_UNAVAILABLE,
            Self::EmbeddingService(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router
#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/chat", get(chat))
        .route("/ask", get(ask))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, letting in-flight responses finish
#[inline]
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C
#[inline]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested, draining connections"),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat(
    State(state): State<AppState>,
    params: Result<Query<QuestionParams>, QueryRejection>,
) -> Result<Response, RelayError> {
    relay(&state, QueryMode::Plain, params).await
}

async fn ask(
    State(state): State<AppState>,
    params: Result<Query<QuestionParams>, QueryRejection>,
) -> Result<Response, RelayError> {
    relay(&state, QueryMode::Augmented, params).await
}

async fn relay(
    state: &AppState,
    mode: QueryMode,
    params: Result<Query<QuestionParams>, QueryRejection>,
) -> Result<Response, RelayError> {
    let Query(params) = params.map_err(|e| RelayError::InvalidQuery(e.body_text()))?;
    let question = params.into_question()?;

    let stream = state
        .pipeline
        .run(mode, &question)
        .await?
        .inspect_err(|e| warn!("Aborting response: {}", e));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}
