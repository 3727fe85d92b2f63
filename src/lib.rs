//! # pdf2md-batch
//!
//! Transcribe every page of a PDF into Markdown with a vision model, as one
//! concurrent, fault-tolerant batch.
//!
//! ## Why a batch core?
//!
//! A 40-page document means 40 independent model calls. Run them one by one
//! and the caller waits minutes; fire them all at once and the provider
//! answers with 429s. The [`batch`] module sits between the two: a bounded
//! number of calls in flight, per-page retries with backoff, failures that
//! stay confined to their page, and results handed back in page order no
//! matter which call finished first.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Input   resolve local file / URL / upload, size + %PDF checks
//!  ├─ 2. Render  rasterise selected pages via pdfium → PNG PageImages
//!  ├─ 3. Batch   one task per page: limiter slot ▸ transcribe ▸ retry
//!  ├─ 4. Polish  deterministic cleanup of each transcript
//!  └─ 5. Output  ordered PageOutcomes + status + assembled Markdown
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_batch::{convert, BatchStatus, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ConversionConfig::builder().max_concurrency(8).build()?;
//!     let output = convert("document.pdf", &config).await?;
//!     if output.batch.status != BatchStatus::Complete {
//!         eprintln!("{} page(s) failed", output.batch.stats.failed);
//!     }
//!     println!("{}", output.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | off     | Enables the `pdf2md-server` binary and the [`server`] module (axum) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::limiter::ConcurrencyLimiter;
pub use batch::retry::RetryPolicy;
pub use batch::{BatchCoordinator, LimiterScope};
pub use config::{
    BackoffStrategy, ConversionConfig, ConversionConfigBuilder, PageSelection, PageSeparator,
};
pub use convert::{
    convert, convert_from_bytes, convert_sync, convert_to_file, convert_with_cancel, Converter,
};
pub use error::{ErrorClass, FailureKind, PipelineError, TranscribeError};
pub use output::{
    BatchResult, BatchStats, BatchStatus, ConversionOutput, PageImage, PageOutcome, Transcript,
};
pub use pipeline::llm::{Transcriber, VlmTranscriber};
pub use pipeline::render::{PageSource, PdfiumPageSource, RenderedDocument};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use tokio_util::sync::CancellationToken;
