// HTTP surface: formats listing, merged download, health

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::downloader::errors::{ExtractionError, FetchFailure, PipelineError};
use crate::downloader::models::{FormatView, SelectionRequest};
use crate::downloader::tools::{ToolInfo, ToolManager, ToolType};
use crate::downloader::Downloader;

#[derive(Clone)]
pub struct AppState {
    pub downloader: Arc<Downloader>,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
}

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    user_correctable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        PipelineError::invalid(message).into()
    }
}

/// HTTP status for each failure kind
pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::Extraction(e) => match e {
            ExtractionError::InvalidUrl(_) | ExtractionError::Unsupported(_) => {
                StatusCode::BAD_REQUEST
            }
            ExtractionError::Unavailable(_) | ExtractionError::NoFormats => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ExtractionError::Network(_) => StatusCode::BAD_GATEWAY,
            ExtractionError::Tool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PipelineError::Selection(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Fetch(e) => match e.reason {
            FetchFailure::SizeLimit => StatusCode::PAYLOAD_TOO_LARGE,
            FetchFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FetchFailure::Network => StatusCode::BAD_GATEWAY,
        },
        PipelineError::Mux(_) | PipelineError::Delivery(_) | PipelineError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self {
            status: status_for(&err),
            body: ErrorBody {
                error: err.kind(),
                message: err.public_message(),
                user_correctable: err.is_user_correctable(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct FormatsRequest {
    pub url: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub video_format: Option<String>,
    #[serde(default)]
    pub audio_format: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl DownloadRequest {
    fn into_selection(self) -> Result<SelectionRequest, ApiError> {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let format_id = non_empty(self.format_id);
        let video = non_empty(self.video_format);
        let audio = non_empty(self.audio_format);

        let request = SelectionRequest::new(self.url).with_proxy(self.proxy);
        match (format_id, video, audio) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ApiError::invalid(
                "use either format_id or video_format/audio_format, not both",
            )),
            (None, Some(video), Some(audio)) => Ok(request.with_pair(video, audio)),
            (id, video, audio) => Ok(request.with_format(id.or(video).or(audio))),
        }
    }
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "mergestream API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "features": ["merge"],
    }))
}

/// Availability comes from the wired backends; the tool probe only adds
/// the version string
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let tools = ToolManager::new();
    let muxer = state.downloader.mux_stage().muxer();
    let extractor = state.downloader.resolver().extractor();
    let (muxer_ok, extractor_ok, muxer_probe, extractor_probe) = tokio::join!(
        muxer.is_available(),
        extractor.is_available(),
        tools.probe(ToolType::Ffmpeg, &state.ffmpeg_path),
        tools.probe(ToolType::YtDlp, &state.ytdlp_path),
    );
    let muxer = ToolInfo {
        available: muxer_ok,
        ..muxer_probe
    };
    let extractor = ToolInfo {
        available: extractor_ok,
        ..extractor_probe
    };
    let status = if muxer.available && extractor.available {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "muxer": muxer,
        "extractor": extractor,
        "jobs": state.downloader.tracker().snapshot(),
    }))
}

async fn formats(
    State(state): State<AppState>,
    payload: Result<Json<FormatsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let catalog = state.downloader.formats(&req.url, req.proxy.as_deref()).await?;
    let views: Vec<FormatView<'_>> = catalog.formats.iter().map(FormatView::from).collect();

    Ok(Json(json!({
        "status": "success",
        "title": catalog.title,
        "thumbnail": catalog.thumbnail,
        "formats": views,
    })))
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let selection = req.into_selection()?;
    Ok(state.downloader.download(selection).await?)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/formats", post(formats))
        .route("/api/download", post(download))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
