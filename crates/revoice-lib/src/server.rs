//! HTTP API for the revoice pipeline.
//!
//! `GET /health` reports whether models are loaded. `POST /generate` takes
//! `{"message": "..."}` and streams back the converted WAV. CORS-permissive
//! so browser front-ends on other ports can call it.

use std::sync::{Arc, OnceLock};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use revoice_core::types::{
    ErrorResponse, GENERIC_FAILURE, GenerateRequest, HealthResponse, MESSAGE_MISSING,
    OUTPUT_FILENAME,
};

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::staging::AudioArtifact;

/// Shared handler state. The pipeline slot is empty until models finish
/// loading and is filled exactly once.
#[derive(Clone, Default)]
pub struct AppState {
    pipeline: Arc<OnceLock<Pipeline>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        let state = Self::new();
        state.install(pipeline);
        state
    }

    /// Install the loaded pipeline. Returns `false` if one was already set.
    pub fn install(&self, pipeline: Pipeline) -> bool {
        let installed = self.pipeline.set(pipeline).is_ok();
        if installed {
            info!("pipeline installed, accepting requests");
        }
        installed
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.get()
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.get().is_some()
    }

    /// Refuse new work. Requests already holding a permit run to completion.
    pub fn close(&self) {
        if let Some(pipeline) = self.pipeline.get() {
            pipeline.close();
        }
    }
}

/// Build the axum router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    serve_until(listener, state, ctrl_c()).await
}

/// Serve until `signal` resolves, then close the pipeline and drain
/// in-flight requests.
pub async fn serve_until(
    listener: TcpListener,
    state: AppState,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!("listening on http://{}", listener.local_addr()?);
    let closing = state.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutdown requested");
            closing.close();
        })
        .await?;
    info!("server stopped");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

enum ApiError {
    MessageMissing,
    NotReady,
    Pipeline(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MessageMissing => (StatusCode::BAD_REQUEST, MESSAGE_MISSING),
            ApiError::NotReady => {
                warn!("generate called before the pipeline finished loading");
                (StatusCode::SERVICE_UNAVAILABLE, GENERIC_FAILURE)
            }
            ApiError::Pipeline(e) => {
                error!("generate failed: {e}");
                (StatusCode::SERVICE_UNAVAILABLE, GENERIC_FAILURE)
            }
        };
        let body = ErrorResponse {
            error: message.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Response {
    if state.is_ready() {
        Json(HealthResponse::ready()).into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

/// Anything other than a JSON object with a non-blank string `message`
/// counts as missing.
fn message_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if !value.is_object() {
        return None;
    }
    let req: GenerateRequest = serde_json::from_value(value).ok()?;
    req.text().map(str::to_string)
}

async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let text = message_from_body(&body).ok_or(ApiError::MessageMissing)?;
    let pipeline = state.pipeline().ok_or(ApiError::NotReady)?;

    let artifact = pipeline.generate(&text).await.map_err(ApiError::Pipeline)?;
    wav_response(artifact).await.map_err(ApiError::Pipeline)
}

/// Stream `artifact` as an attachment. The file is removed once the body
/// has been sent or the client goes away.
async fn wav_response(artifact: AudioArtifact) -> Result<Response> {
    let file = tokio::fs::File::open(artifact.path()).await?;
    let len = file.metadata().await?.len();

    let stream = ReaderStream::new(file).map(move |chunk| {
        let _owner = &artifact;
        chunk
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{OUTPUT_FILENAME}\""),
        )
        .body(Body::from_stream(stream));

    response.map_err(|e| Error::Io(std::io::Error::other(e)))
}
