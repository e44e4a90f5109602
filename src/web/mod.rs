//! Local web UI: an HTML page plus JSON endpoints that return downloads as attachments.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tower_http::cors::CorsLayer;

use crate::config::WebConfig;
use crate::operations::{AudioFormat, MediaOperations, VideoInfo};
use crate::tools::TimeArg;
use crate::{error_kind, Result, VidSnatchError};

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Read size for streamed attachments
const CHUNK_SIZE: usize = 64 * 1024;

const PLACEHOLDER_THUMBNAIL: &str = r##"<svg width="320" height="180" xmlns="http://www.w3.org/2000/svg">
    <rect width="320" height="180" fill="#1F1A33"/>
    <text x="160" y="90" font-family="Arial" font-size="14" fill="#00FFFF" text-anchor="middle">Video Thumbnail</text>
</svg>"##;

/// Error reply: 400 for problems with the request, 500 for everything else
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match error_kind(&err) {
            Some(kind) if kind.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!("Request failed ({}): {:#}", status, err);
        Self {
            status,
            message: format!("{:#}", err),
        }
    }
}

impl From<VidSnatchError> for ApiError {
    fn from(err: VidSnatchError) -> Self {
        anyhow::Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct VideoInfoRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoDownloadRequest {
    url: String,
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioDownloadRequest {
    url: String,
    quality: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptDownloadRequest {
    url: String,
    #[serde(default = "default_language")]
    language: String,
}

#[derive(Debug, Deserialize)]
struct VideoSegmentRequest {
    url: String,
    start_time: TimeArg,
    end_time: TimeArg,
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StitchRequest {
    file_paths: Vec<PathBuf>,
    output_filename: Option<String>,
}

/// Routes for the web UI
pub fn router(ops: MediaOperations) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/video-info", post(video_info))
        .route("/api/download-video", post(download_video))
        .route("/api/download-audio", post(download_audio))
        .route("/api/download-transcript", post(download_transcript))
        .route("/api/download-video-segment", post(download_video_segment))
        .route("/api/stitch", post(stitch))
        .route("/api/placeholder-thumb", get(placeholder_thumbnail))
        .layer(CorsLayer::permissive())
        .with_state(ops)
}

/// Serve the web UI until interrupted
pub async fn serve(ops: MediaOperations, settings: &WebConfig) -> Result<()> {
    let address = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Web UI listening on http://{}", address);

    axum::serve(listener, router(ops))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn placeholder_thumbnail() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], PLACEHOLDER_THUMBNAIL)
}

async fn video_info(
    State(ops): State<MediaOperations>,
    Json(request): Json<VideoInfoRequest>,
) -> ApiResult<Json<VideoInfo>> {
    require_url(&request.url)?;
    Ok(Json(ops.video_info(&request.url).await?))
}

async fn download_video(
    State(ops): State<MediaOperations>,
    Json(request): Json<VideoDownloadRequest>,
) -> ApiResult<Response> {
    require_url(&request.url)?;
    let scratch = scratch_dir()?;
    let file = ops
        .download_video(&request.url, request.quality.as_deref(), Some(scratch.path()))
        .await?;
    attachment(scratch, &file.file_path, video_mime(&file.format)).await
}

async fn download_audio(
    State(ops): State<MediaOperations>,
    Json(request): Json<AudioDownloadRequest>,
) -> ApiResult<Response> {
    require_url(&request.url)?;
    let scratch = scratch_dir()?;
    let file = ops
        .download_audio(
            &request.url,
            request.quality.as_deref(),
            request.format.as_deref(),
            Some(scratch.path()),
        )
        .await?;
    let mime = AudioFormat::from_extension(&file.format)
        .map(|format| format.mime_type())
        .unwrap_or("application/octet-stream");
    attachment(scratch, &file.file_path, mime).await
}

async fn download_transcript(
    State(ops): State<MediaOperations>,
    Json(request): Json<TranscriptDownloadRequest>,
) -> ApiResult<Response> {
    require_url(&request.url)?;
    let scratch = scratch_dir()?;
    let file = ops
        .download_transcript(&request.url, &request.language, Some(scratch.path()))
        .await?;
    attachment(scratch, &file.file.file_path, "text/plain; charset=utf-8").await
}

async fn download_video_segment(
    State(ops): State<MediaOperations>,
    Json(request): Json<VideoSegmentRequest>,
) -> ApiResult<Response> {
    require_url(&request.url)?;
    let scratch = scratch_dir()?;
    let segment = ops
        .trim(
            &request.url,
            &request.start_time.as_timestamp(),
            &request.end_time.as_timestamp(),
            request.quality.as_deref(),
            Some(scratch.path()),
        )
        .await?;
    attachment(scratch, &segment.file.file_path, "video/mp4").await
}

async fn stitch(
    State(ops): State<MediaOperations>,
    Json(request): Json<StitchRequest>,
) -> ApiResult<Response> {
    let clips = confine_to(&ops.config().download_directory, &request.file_paths)?;
    let scratch = scratch_dir()?;
    let stitched = ops
        .stitch(&clips, request.output_filename.as_deref(), Some(scratch.path()))
        .await?;
    attachment(scratch, &stitched.file.file_path, "video/mp4").await
}

fn require_url(url: &str) -> ApiResult<()> {
    if url.trim().is_empty() {
        return Err(VidSnatchError::InvalidInput("No URL provided".to_string()).into());
    }
    Ok(())
}

/// Resolve clip paths against `root`, rejecting anything that lands outside it
fn confine_to(root: &Path, paths: &[PathBuf]) -> ApiResult<Vec<PathBuf>> {
    let root = root.canonicalize().map_err(|e| {
        VidSnatchError::InvalidInput(format!(
            "Download directory {} is not accessible: {}",
            root.display(),
            e
        ))
    })?;

    paths
        .iter()
        .map(|path| {
            let resolved = root.join(path).canonicalize().map_err(|_| {
                VidSnatchError::InvalidInput(format!(
                    "{} was not found in the download directory",
                    path.display()
                ))
            })?;
            if resolved.starts_with(&root) {
                Ok(resolved)
            } else {
                Err(VidSnatchError::InvalidInput(format!(
                    "{} is outside the download directory",
                    path.display()
                ))
                .into())
            }
        })
        .collect()
}

/// Per-request directory, removed once the response body has been sent
fn scratch_dir() -> ApiResult<TempDir> {
    tempfile::Builder::new()
        .prefix("vidsnatch-web-")
        .tempdir()
        .map_err(|e| {
            VidSnatchError::FileError(format!("Failed to create temporary directory: {}", e)).into()
        })
}

fn video_mime(format: &str) -> &'static str {
    match format {
        "webm" => "video/webm",
        _ => "video/mp4",
    }
}

/// `Content-Disposition` value with an ASCII fallback and a UTF-8 encoded name
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

/// Stream `path` back as a download; `scratch` is dropped once the body is done
async fn attachment(scratch: TempDir, path: &Path, content_type: &'static str) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        VidSnatchError::FileError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let length = file.metadata().await.ok().map(|meta| meta.len());
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let chunks = futures_util::stream::unfold((file, scratch), |(mut file, scratch)| async move {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buffer).await {
            Ok(0) => None,
            Ok(read) => {
                buffer.truncate(read);
                Some((Ok(buffer), (file, scratch)))
            }
            Err(e) => Some((Err(e), (file, scratch))),
        }
    });

    let mut response = (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&filename)),
        ],
        Body::from_stream(chunks),
    )
        .into_response();
    if let Some(length) = length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}
