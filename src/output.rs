//! Data carried through and out of the batch pipeline.
//!
//! ```text
//! PageImage ──▶ (PageTask) ──▶ PageOutcome ──▶ BatchResult ──▶ ConversionOutput
//!  rendered      in flight      one per page     ordered         + assembled Markdown
//! ```

use crate::error::{FailureKind, PipelineError};
use serde::{Deserialize, Serialize};

/// One rasterised page, ready to be sent to the model.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number in the source document.
    pub page_number: usize,
    pub width: u32,
    pub height: u32,
    /// MIME type of `data`, e.g. `image/png`.
    pub mime_type: String,
    /// Encoded image bytes.
    pub data: Vec<u8>,
}

impl PageImage {
    /// Wrap already-encoded PNG bytes.
    pub fn png(page_number: usize, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            page_number,
            width,
            height,
            mime_type: "image/png".to_string(),
            data,
        }
    }
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Successful reply of the Transcription Client for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Transcript {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            ..Self::default()
        }
    }
}

/// The result of processing one page. Exactly one exists per page task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    Success {
        /// 0-based position in the batch.
        index: usize,
        /// 1-indexed page number in the source document.
        page_number: usize,
        markdown: String,
        attempts: u32,
        input_tokens: usize,
        output_tokens: usize,
        duration_ms: u64,
    },
    Failure {
        index: usize,
        page_number: usize,
        kind: FailureKind,
        message: String,
        attempts: u32,
        duration_ms: u64,
    },
}

impl PageOutcome {
    pub fn index(&self) -> usize {
        match self {
            PageOutcome::Success { index, .. } | PageOutcome::Failure { index, .. } => *index,
        }
    }

    pub fn page_number(&self) -> usize {
        match self {
            PageOutcome::Success { page_number, .. }
            | PageOutcome::Failure { page_number, .. } => *page_number,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PageOutcome::Success { attempts, .. } | PageOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success { .. })
    }

    /// The Markdown of a successful page.
    pub fn markdown(&self) -> Option<&str> {
        match self {
            PageOutcome::Success { markdown, .. } => Some(markdown),
            PageOutcome::Failure { .. } => None,
        }
    }

    /// The failure kind of a failed page.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PageOutcome::Success { .. } => None,
            PageOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Overall status of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every page was transcribed.
    Complete,
    /// Some pages failed individually.
    Partial,
    /// No page could be transcribed.
    Failed,
}

impl BatchStatus {
    /// Derive the status from success/failure counts.
    ///
    /// An empty batch is vacuously complete.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => BatchStatus::Complete,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BatchStatus::Complete => "complete",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        })
    }
}

/// Counters for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_pages: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `failed` whose kind is [`FailureKind::Cancelled`].
    pub cancelled: usize,
    /// Transcription Client calls made across all pages.
    pub total_attempts: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Wall-clock time of the whole batch.
    pub duration_ms: u64,
    /// Highest number of simultaneous client calls observed.
    pub peak_concurrency: usize,
}

/// Aggregate of one batch: outcomes sorted by index plus the derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub outcomes: Vec<PageOutcome>,
    pub status: BatchStatus,
    pub stats: BatchStats,
}

impl BatchResult {
    /// Successful outcomes in page order.
    pub fn successes(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Failed outcomes in page order.
    pub fn failures(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Treat any page failure as an error.
    pub fn into_complete(self) -> Result<Self, PipelineError> {
        match self.status {
            BatchStatus::Complete => Ok(self),
            BatchStatus::Partial => Err(PipelineError::PartialFailure {
                success: self.stats.succeeded,
                failed: self.stats.failed,
                total: self.stats.total_pages,
            }),
            BatchStatus::Failed => {
                let first_error = self
                    .failures()
                    .find_map(|o| match o {
                        PageOutcome::Failure { kind, message, .. } => {
                            Some(format!("{kind}: {message}"))
                        }
                        PageOutcome::Success { .. } => None,
                    })
                    .unwrap_or_else(|| "Unknown error".to_string());
                Err(PipelineError::AllPagesFailed {
                    total: self.stats.total_pages,
                    first_error,
                })
            }
        }
    }
}

/// Result of converting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Markdown of every successful page, in page order, joined with the
    /// configured separator.
    pub markdown: String,
    /// Number of pages in the source document (before page selection).
    pub document_pages: usize,
    pub batch: BatchResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(index: usize, kind: FailureKind) -> PageOutcome {
        PageOutcome::Failure {
            index,
            page_number: index + 1,
            kind,
            message: "boom".into(),
            attempts: 1,
            duration_ms: 0,
        }
    }

    #[test]
    fn status_from_counts() {
        assert_eq!(BatchStatus::from_counts(3, 0), BatchStatus::Complete);
        assert_eq!(BatchStatus::from_counts(0, 0), BatchStatus::Complete);
        assert_eq!(BatchStatus::from_counts(2, 1), BatchStatus::Partial);
        assert_eq!(BatchStatus::from_counts(0, 3), BatchStatus::Failed);
    }

    #[test]
    fn into_complete_reports_first_failure() {
        let result = BatchResult {
            outcomes: vec![failure(0, FailureKind::Permanent)],
            status: BatchStatus::Failed,
            stats: BatchStats {
                total_pages: 1,
                failed: 1,
                ..Default::default()
            },
        };
        match result.into_complete() {
            Err(PipelineError::AllPagesFailed { total, first_error }) => {
                assert_eq!(total, 1);
                assert!(first_error.contains("permanent"), "got: {first_error}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn outcome_serialises_with_tag() {
        let json = serde_json::to_value(failure(2, FailureKind::Cancelled)).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["kind"], "cancelled");
        assert_eq!(json["index"], 2);
    }

    #[test]
    fn page_image_debug_hides_bytes() {
        let img = PageImage::png(1, 10, 20, vec![0u8; 1024]);
        let dbg = format!("{img:?}");
        assert!(dbg.contains("bytes: 1024"));
        assert_eq!(img.mime_type, "image/png");
    }
}
