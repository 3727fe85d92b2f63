//! Document conversion entry points.
//!
//! [`Converter`] wires the stages together: validate the bytes, rasterise
//! the selected pages, hand them to the [`BatchCoordinator`] and join the
//! successful transcripts into one Markdown document. The free `convert*`
//! functions build a pdfium-backed converter from a [`ConversionConfig`]
//! for the common one-document case.
//!
//! A finished batch is returned as `Ok` even when pages failed; check
//! `output.batch.status`, or call [`BatchResult::into_complete`] to make any
//! page failure fatal.

use crate::batch::{BatchCoordinator, LimiterScope};
use crate::config::{ConversionConfig, PageSeparator};
use crate::error::PipelineError;
use crate::output::{BatchResult, ConversionOutput, PageOutcome};
use crate::pipeline::llm::{Transcriber, VlmTranscriber};
use crate::pipeline::render::{PageSource, PdfiumPageSource};
use crate::pipeline::input;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A configured pipeline: page source, transcription client and batch core.
///
/// Cheap to clone. One converter can serve many documents concurrently;
/// each [`convert_bytes`](Self::convert_bytes) call is an independent batch
/// unless the coordinator was given a [`LimiterScope::Shared`] limiter.
#[derive(Clone)]
pub struct Converter {
    source: Arc<dyn PageSource>,
    coordinator: BatchCoordinator,
    config: ConversionConfig,
}

impl Converter {
    pub fn new(
        source: Arc<dyn PageSource>,
        transcriber: Arc<dyn Transcriber>,
        config: ConversionConfig,
    ) -> Self {
        let coordinator = BatchCoordinator::new(transcriber, &config);
        Self {
            source,
            coordinator,
            config,
        }
    }

    /// pdfium page source plus a VLM transcriber resolved from `config`.
    pub fn from_config(config: ConversionConfig) -> Result<Self, PipelineError> {
        let source = Arc::new(PdfiumPageSource::new(&config));
        let transcriber = Arc::new(VlmTranscriber::from_config(&config)?);
        Ok(Self::new(source, transcriber, config))
    }

    pub fn with_limiter(mut self, scope: LimiterScope) -> Self {
        self.coordinator = self.coordinator.with_limiter(scope);
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert one in-memory document.
    ///
    /// Fatal errors (oversized or unparseable document, empty page
    /// selection) are returned before any model call is made.
    pub async fn convert_bytes(
        &self,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, PipelineError> {
        input::validate_document(&bytes, self.config.max_file_size)?;

        let rendered = self.source.extract_pages(bytes, &self.config.pages).await?;
        if rendered.pages.is_empty() {
            return Err(PipelineError::NoPages);
        }
        info!(
            "Rendered {} of {} pages",
            rendered.pages.len(),
            rendered.page_count
        );

        let batch = match self.config.batch_timeout() {
            Some(limit) => {
                let deadline = tokio::time::Instant::now() + limit;
                self.coordinator
                    .process_with_deadline(rendered.pages, deadline, cancel)
                    .await?
            }
            None => self.coordinator.process(rendered.pages, cancel).await?,
        };

        let markdown = assemble_markdown(&batch, &self.config.page_separator);
        Ok(ConversionOutput {
            markdown,
            document_pages: rendered.page_count,
            batch,
        })
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Convert a PDF file or URL to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(PipelineError)` only for fatal errors:
/// - File not found / permission denied / download failure
/// - Not a valid PDF, or no pages selected
/// - No LLM provider could be configured
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, PipelineError> {
    convert_with_cancel(input_str, config, &CancellationToken::new()).await
}

/// [`convert`] with an external cancellation signal.
///
/// When `cancel` fires mid-batch, unfinished pages are recorded as
/// cancelled and the partial result is still returned.
pub async fn convert_with_cancel(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
    cancel: &CancellationToken,
) -> Result<ConversionOutput, PipelineError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    let converter = Converter::from_config(config.clone())?;
    let bytes = input::resolve_input(input_str, config.download_timeout_secs).await?;
    converter.convert_bytes(bytes, cancel).await
}

/// Convert PDF bytes already in memory.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, PipelineError> {
    Converter::from_config(config.clone())?
        .convert_bytes(bytes.to_vec(), &CancellationToken::new())
        .await
}

/// Convert a PDF and write the Markdown to `output_path`.
///
/// Uses an atomic write (temp file in the target directory, then rename) so
/// a crash never leaves a half-written file behind.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, PipelineError> {
    let output = convert(input_str, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown).await?;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Join successful pages in order, separated by `separator`.
///
/// Failed pages are left out; their position is visible in
/// [`BatchResult::outcomes`].
pub fn assemble_markdown(batch: &BatchResult, separator: &PageSeparator) -> String {
    let mut doc = String::new();
    for (i, outcome) in batch.successes().enumerate() {
        if let PageOutcome::Success {
            page_number,
            markdown,
            ..
        } = outcome
        {
            if i > 0 {
                doc.push_str(&separator.render(*page_number));
            }
            doc.push_str(markdown.trim_end_matches('\n'));
        }
    }
    if !doc.is_empty() {
        doc.push('\n');
    }
    doc
}

/// Write `contents` to `path` through a temp file in the same directory.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), PipelineError> {
    let path: PathBuf = path.to_path_buf();
    let contents = contents.to_owned();
    let target = path.clone();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Write task panicked: {}", e)))?
    .map_err(|source| PipelineError::OutputWriteFailed {
        path: path.clone(),
        source,
    })?;

    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSelection;
    use crate::error::TranscribeError;
    use crate::output::{BatchStatus, PageImage, Transcript};
    use crate::pipeline::render::RenderedDocument;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Pretends every document has `pages` pages.
    struct FixedSource {
        pages: usize,
    }

    #[async_trait]
    impl PageSource for FixedSource {
        async fn extract_pages(
            &self,
            _document: Vec<u8>,
            selection: &PageSelection,
        ) -> Result<RenderedDocument, PipelineError> {
            let pages = selection
                .to_indices(self.pages)
                .into_iter()
                .map(|i| PageImage::png(i + 1, 1, 1, vec![0xAB]))
                .collect();
            Ok(RenderedDocument {
                page_count: self.pages,
                pages,
            })
        }
    }

    /// Page 3 always fails permanently; everything else echoes.
    struct Echo;

    #[async_trait]
    impl Transcriber for Echo {
        async fn transcribe(&self, page: &PageImage) -> Result<Transcript, TranscribeError> {
            if page.page_number == 3 {
                return Err(TranscribeError::permanent("unsupported image"));
            }
            Ok(Transcript::new(format!("page {}\n", page.page_number)))
        }
    }

    fn converter(pages: usize, config: ConversionConfig) -> Converter {
        Converter::new(Arc::new(FixedSource { pages }), Arc::new(Echo), config)
    }

    const PDF: &[u8] = b"%PDF-1.7 test";

    #[tokio::test]
    async fn assembles_successful_pages_in_order() {
        let config = ConversionConfig::builder()
            .page_separator(PageSeparator::HorizontalRule)
            .build()
            .unwrap();
        let out = converter(2, config)
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.markdown, "page 1\n\n---\n\npage 2\n");
        assert_eq!(out.document_pages, 2);
        assert_eq!(out.batch.status, BatchStatus::Complete);
    }

    #[tokio::test]
    async fn failed_pages_are_skipped_in_markdown() {
        let out = converter(4, ConversionConfig::default())
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.batch.status, BatchStatus::Partial);
        assert_eq!(out.markdown, "page 1\n\npage 2\n\npage 4\n");
        assert!(!out.batch.outcomes[2].is_success());
    }

    #[tokio::test]
    async fn page_selection_is_honoured() {
        let config = ConversionConfig::builder()
            .pages(PageSelection::Range(2, 3))
            .build()
            .unwrap();
        let out = converter(5, config)
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap();
        let numbers: Vec<usize> = out.batch.outcomes.iter().map(|o| o.page_number()).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(out.document_pages, 5);
    }

    #[tokio::test]
    async fn rejects_non_pdf_before_rendering() {
        let err = converter(1, ConversionConfig::default())
            .convert_bytes(b"hello".to_vec(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDocument { .. }));
    }

    #[tokio::test]
    async fn empty_document_is_no_pages() {
        let err = converter(0, ConversionConfig::default())
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoPages));
    }

    #[tokio::test]
    async fn oversized_document_is_rejected() {
        let config = ConversionConfig::builder().max_file_size(4).build().unwrap();
        let err = converter(1, config)
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn batch_timeout_cancels_slow_pages() {
        struct Slow;

        #[async_trait]
        impl Transcriber for Slow {
            async fn transcribe(&self, _page: &PageImage) -> Result<Transcript, TranscribeError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Transcript::new("late"))
            }
        }

        let config = ConversionConfig::builder()
            .batch_timeout_secs(1)
            .cancel_grace(Duration::from_millis(50))
            .build()
            .unwrap();
        let converter = Converter::new(Arc::new(FixedSource { pages: 2 }), Arc::new(Slow), config);

        let started = std::time::Instant::now();
        let out = converter
            .convert_bytes(PDF.to_vec(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(out.batch.status, BatchStatus::Failed);
        assert_eq!(out.batch.stats.cancelled, 2);
        assert!(out.markdown.is_empty());
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.md");
        write_atomic(&path, "# Hi\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Hi\n");
    }
}
