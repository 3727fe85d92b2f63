//! HTTP service: upload a PDF, get every page back as Markdown.
//!
//! | Route | Method | Body |
//! |---|---|---|
//! | `/` | GET | app name, version, route list |
//! | `/health` | GET | `{status, version, timestamp}` |
//! | `/process-pdf` | POST | multipart field `file` (a `.pdf`) |
//!
//! Every request gets its own [`CancellationToken`] wrapped in a drop
//! guard. When the client disconnects, axum drops the handler future, the
//! guard fires and the batch's page tasks stop.

use crate::convert::Converter;
use crate::error::{FailureKind, PipelineError};
use crate::output::{BatchStats, BatchStatus, ConversionOutput, PageOutcome};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Room for multipart boundaries and headers on top of the document itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<Converter>,
}

impl AppState {
    pub fn new(converter: Converter) -> Self {
        Self {
            converter: Arc::new(converter),
        }
    }
}

/// Build the router with tracing and the upload size limit applied.
pub fn create_routes(state: AppState) -> Router {
    let body_limit = state
        .converter
        .config()
        .max_file_size
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/process-pdf", post(process_pdf))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Response types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// One page in a [`ProcessResponse`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse {
    pub page_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub attempts: u32,
    pub processing_time_ms: u64,
}

impl From<&PageOutcome> for PageResponse {
    fn from(outcome: &PageOutcome) -> Self {
        match outcome {
            PageOutcome::Success {
                page_number,
                markdown,
                attempts,
                duration_ms,
                ..
            } => Self {
                page_number: *page_number,
                markdown: Some(markdown.clone()),
                error: None,
                error_kind: None,
                attempts: *attempts,
                processing_time_ms: *duration_ms,
            },
            PageOutcome::Failure {
                page_number,
                kind,
                message,
                attempts,
                duration_ms,
                ..
            } => Self {
                page_number: *page_number,
                markdown: None,
                error: Some(message.clone()),
                error_kind: Some(*kind),
                attempts: *attempts,
                processing_time_ms: *duration_ms,
            },
        }
    }
}

/// Body of a successful `POST /process-pdf`.
///
/// `success` is true only when every page was transcribed; a partial batch
/// still answers 200 with the failed pages listed in `errors`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub status: BatchStatus,
    pub total_pages: usize,
    pub processed_pages: usize,
    pub results: Vec<PageResponse>,
    pub markdown: String,
    /// Seconds from upload received to response.
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub stats: BatchStats,
}

impl ProcessResponse {
    fn from_output(output: ConversionOutput, processing_time: f64) -> Self {
        let batch = output.batch;
        let results: Vec<PageResponse> = batch.outcomes.iter().map(PageResponse::from).collect();
        let errors: Vec<String> = batch
            .failures()
            .filter_map(|o| match o {
                PageOutcome::Failure {
                    page_number,
                    kind,
                    message,
                    ..
                } => Some(format!("Page {page_number}: {kind}: {message}")),
                PageOutcome::Success { .. } => None,
            })
            .collect();

        Self {
            success: batch.status == BatchStatus::Complete,
            status: batch.status,
            total_pages: batch.stats.total_pages,
            processed_pages: batch.stats.succeeded,
            results,
            markdown: output.markdown,
            processing_time,
            timestamp: Utc::now(),
            errors: if errors.is_empty() { None } else { Some(errors) },
            stats: batch.stats,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Pipeline(PipelineError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Pipeline(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = if status.is_server_error() {
            error!("Request failed: {}", self);
            (
                "Internal server error occurred during processing".to_string(),
                Some(self.to_string()),
            )
        } else {
            warn!("Rejected request: {}", self);
            (self.to_string(), None)
        };

        let body = ErrorResponse {
            success: false,
            error,
            details,
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({
        "app": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "process": "/process-pdf",
    }))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

async fn process_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let started = Instant::now();

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes.to_vec()));
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing multipart field 'file'".to_string()))?;
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::BadRequest("Only PDF files are allowed".to_string()));
    }
    info!(filename = %filename, bytes = bytes.len(), "Processing PDF upload");

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let output = state.converter.convert_bytes(bytes, &cancel).await?;

    let processing_time = started.elapsed().as_secs_f64();
    info!(
        filename = %filename,
        status = %output.batch.status,
        total_pages = output.batch.stats.total_pages,
        processed_pages = output.batch.stats.succeeded,
        processing_time,
        "Processing complete"
    );
    Ok(Json(ProcessResponse::from_output(output, processing_time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionConfig, PageSelection};
    use crate::error::TranscribeError;
    use crate::output::{PageImage, Transcript};
    use crate::pipeline::llm::Transcriber;
    use crate::pipeline::render::{PageSource, RenderedDocument};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    struct ThreePages;

    #[async_trait]
    impl PageSource for ThreePages {
        async fn extract_pages(
            &self,
            _document: Vec<u8>,
            selection: &PageSelection,
        ) -> Result<RenderedDocument, PipelineError> {
            Ok(RenderedDocument {
                page_count: 3,
                pages: selection
                    .to_indices(3)
                    .into_iter()
                    .map(|i| PageImage::png(i + 1, 1, 1, vec![7]))
                    .collect(),
            })
        }
    }

    /// Page 2 is rejected by the "model".
    struct Scripted;

    #[async_trait]
    impl Transcriber for Scripted {
        async fn transcribe(&self, page: &PageImage) -> Result<Transcript, TranscribeError> {
            if page.page_number == 2 {
                return Err(TranscribeError::permanent("400 invalid image"));
            }
            Ok(Transcript::new(format!("# Page {}\n", page.page_number)))
        }
    }

    fn app(max_file_size: usize) -> Router {
        let config = ConversionConfig::builder()
            .max_file_size(max_file_size)
            .build()
            .unwrap();
        let converter = Converter::new(Arc::new(ThreePages), Arc::new(Scripted), config);
        create_routes(AppState::new(converter))
    }

    const BOUNDARY: &str = "XBOUNDARYX";

    fn upload(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/process-pdf")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = app(1024)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn partial_batch_is_reported_per_page() {
        let response = app(1024)
            .oneshot(upload("doc.pdf", b"%PDF-1.4 three pages"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "partial");
        assert_eq!(body["total_pages"], 3);
        assert_eq!(body["processed_pages"], 2);
        assert_eq!(body["results"][0]["markdown"], "# Page 1\n");
        assert_eq!(body["results"][1]["error_kind"], "permanent");
        assert_eq!(body["results"][2]["page_number"], 3);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
        assert_eq!(body["markdown"], "# Page 1\n\n# Page 3\n");
    }

    #[tokio::test]
    async fn non_pdf_filename_is_rejected() {
        let response = app(1024)
            .oneshot(upload("notes.txt", b"%PDF-1.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Only PDF files are allowed");
    }

    #[tokio::test]
    async fn invalid_pdf_is_bad_request() {
        let response = app(1024)
            .oneshot(upload("doc.pdf", b"GIF89a not a pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let response = app(16)
            .oneshot(upload("doc.pdf", b"%PDF-1.4 this body is longer than sixteen bytes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_file_field_is_bad_request() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/process-pdf")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = app(1024).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
