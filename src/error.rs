//! Error types for the pdf2md-batch library.
//!
//! Three layers of failure, from widest to narrowest:
//!
//! * [`PipelineError`]: **Fatal**: the batch cannot run at all (bad input
//!   file, unparseable PDF, provider not configured) or the pipeline broke an
//!   internal invariant. Returned as `Err(PipelineError)` from the top-level
//!   `convert*` functions and from [`crate::batch::BatchCoordinator::process`].
//!
//! * [`FailureKind`]: **Per page, terminal**: stored inside
//!   [`crate::output::PageOutcome::Failure`]. One page failing never aborts
//!   its siblings; the batch status tells the caller how many made it.
//!
//! * [`TranscribeError`]: **Per call**: one failed exchange with the model
//!   API, tagged with an [`ErrorClass`] the retry policy switches on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2md-batch library.
///
/// Page-level failures are recorded as [`FailureKind`] inside the batch
/// result rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Document is larger than the configured upload limit.
    #[error("File size {size} bytes exceeds maximum allowed size of {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },

    // ── Document errors ───────────────────────────────────────────────────
    /// The bytes are not a parseable PDF.
    #[error("Invalid PDF document: {detail}")]
    InvalidDocument { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for encrypted PDF")]
    WrongPassword,

    /// The PDF parsed but contains no pages.
    #[error("PDF file contains no pages")]
    NoPages,

    /// The page selection matched no page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Batch errors ──────────────────────────────────────────────────────
    /// The page sequence handed to the coordinator is inconsistent.
    #[error("Invalid page source: {0}")]
    InvalidPageSource(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page failed; no Markdown was produced.
    ///
    /// Returned by [`crate::output::BatchResult::into_complete`].
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BatchResult::into_complete`] when the
    /// caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during conversion")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    /// The aggregator received an outcome set that does not cover every
    /// page exactly once. Always a bug in the pipeline.
    #[error("Internal error: incomplete batch ({received} outcomes for {expected} pages)")]
    IncompleteBatch { expected: usize, received: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the error was caused by the submitted document rather than by
    /// the service itself. The HTTP layer maps these to `400`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::FileNotFound { .. }
                | PipelineError::PermissionDenied { .. }
                | PipelineError::InvalidInput { .. }
                | PipelineError::FileTooLarge { .. }
                | PipelineError::InvalidDocument { .. }
                | PipelineError::PasswordRequired
                | PipelineError::WrongPassword
                | PipelineError::NoPages
                | PipelineError::PageOutOfRange { .. }
        )
    }
}

/// How a failed Transcription Client call should be treated by the retry
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeout, rate limit, connection reset, 5xx.
    Transient,
    /// Bad credentials, malformed request, content refused.
    Permanent,
    /// Anything the classifier does not recognise. Retried like `Transient`.
    Unknown,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// One failed request/response exchange with the model API.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TranscribeError {
    pub class: ErrorClass,
    pub message: String,
}

impl TranscribeError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    /// Build an error from provider error text, classifying it on the way.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_message(&message), message)
    }
}

/// Terminal failure kind of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every attempt failed with a retriable error.
    TransientExhausted,
    /// A non-retriable error short-circuited the retries.
    Permanent,
    /// The batch was cancelled or hit its deadline before the page resolved.
    Cancelled,
    /// The page task panicked or the pipeline misbehaved.
    InternalFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TransientExhausted => "transient failure, retries exhausted",
            FailureKind::Permanent => "permanent failure",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InternalFault => "internal fault",
        };
        f.write_str(s)
    }
}

/// HTTP status codes, matched as whole tokens only.
const PERMANENT_STATUS: &[&str] = &["400", "401", "403", "404"];
const TRANSIENT_STATUS: &[&str] = &["429", "500", "502", "503", "504"];

const PERMANENT_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "authentication",
    "permission denied",
    "invalid request",
    "invalid_request",
    "bad request",
    "model not found",
    "unsupported image",
    "content_filter",
    "content filter",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "timeout",
    "timed out",
    "overloaded",
    "temporarily unavailable",
    "service unavailable",
    "connection",
    "network",
];

/// Map provider error text onto the closed [`ErrorClass`] taxonomy.
///
/// Transient markers win over permanent ones so that e.g. a gateway
/// returning "503 … invalid request upstream" is still retried. Status codes
/// only count as standalone numbers, never as digits inside a key or an id.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    let has_status = |codes: &[&str]| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| codes.contains(&token))
    };
    if has_status(TRANSIENT_STATUS) || TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Transient
    } else if has_status(PERMANENT_STATUS) || PERMANENT_MARKERS.iter().any(|m| lower.contains(m))
    {
        ErrorClass::Permanent
    } else {
        ErrorClass::Unknown
    }
}
