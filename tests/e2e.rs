//! End-to-end integration tests for pdf2md-batch.
//!
//! These tests use real PDF files in `./test_cases/` and make live LLM API
//! calls.  They are gated behind the `E2E_ENABLED` environment variable so
//! they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_convert_irs_form -- --nocapture

use pdf2md_batch::{
    convert, convert_from_bytes, convert_to_file, convert_with_cancel, BatchProgressCallback,
    BatchStatus, CancellationToken, ConversionConfig, ConversionOutput, FailureKind,
    NoopProgressCallback, PageSelection, PageSeparator, PipelineError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn live_config() -> pdf2md_batch::ConversionConfigBuilder {
    ConversionConfig::builder()
        .max_attempts(3)
        .base_retry_delay(Duration::from_millis(500))
}

/// Assert the markdown passes basic quality checks.
fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");

    // Normalised by the post-processor
    assert!(
        md.ends_with('\n'),
        "[{context}] Markdown must end with a newline"
    );

    let first_line = md.lines().next().unwrap_or("");
    assert!(
        !first_line.starts_with("```"),
        "[{context}] Output must not start with a code fence, got: {first_line:?}"
    );

    assert!(
        !md.contains("\n\n\n\n"),
        "[{context}] Output has more than 3 consecutive blank lines"
    );

    let invisible = ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'];
    for ch in invisible {
        assert!(
            !md.contains(ch),
            "[{context}] Output contains invisible char U+{:04X}",
            ch as u32
        );
    }

    assert!(
        md.len() >= 50,
        "[{context}] Output suspiciously short: {} bytes",
        md.len()
    );

    println!("[{context}] ✓  {} bytes, quality checks passed", md.len());
}

fn assert_all_pages_ok(output: &ConversionOutput, expected: usize, context: &str) {
    let stats = &output.batch.stats;
    assert_eq!(stats.total_pages, expected, "[{context}] page count");
    assert_eq!(stats.succeeded, expected, "[{context}] succeeded");
    assert_eq!(stats.failed, 0, "[{context}] failed");
    assert_eq!(output.batch.status, BatchStatus::Complete);
    for (i, outcome) in output.batch.outcomes.iter().enumerate() {
        assert_eq!(outcome.index(), i, "[{context}] outcome order");
    }
}

// ── Page-selection unit tests (no LLM) ──────────────────────────────────────

#[test]
fn test_page_selection_out_of_range_is_empty() {
    assert_eq!(
        PageSelection::Single(100).to_indices(4),
        Vec::<usize>::new()
    );
}

#[test]
fn test_page_selection_range_clipping() {
    // Range 3-10 on a 4-page doc → pages 3 and 4 (indices 2, 3)
    let indices = PageSelection::Range(3, 10).to_indices(4);
    assert_eq!(indices, vec![2, 3]);
}

#[test]
fn test_page_selection_set_dedup_and_sort() {
    let indices = PageSelection::Set(vec![3, 1, 3, 2]).to_indices(5);
    assert_eq!(indices, vec![0, 1, 2]);
}

// ── Callback API unit tests (no LLM calls, always run) ───────────────────────

#[tokio::test]
async fn test_callback_send_in_tokio_spawn() {
    struct Counting(AtomicUsize);

    impl BatchProgressCallback for Counting {
        fn on_page_error(&self, _page_num: usize, _total_pages: usize, error: &str) {
            assert!(!error.is_empty());
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let cb: Arc<dyn BatchProgressCallback> = Arc::new(Counting(AtomicUsize::new(0)));
    let handle = {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            let message = format!("{}: {}", FailureKind::Permanent, "401 unauthorized");
            cb.on_page_error(1, 2, &message);
            tokio::task::yield_now().await;
            cb.on_page_retry(2, 1, Duration::from_millis(10), &message);
        })
    };
    handle.await.expect("callback task should not panic");
}

#[test]
fn test_noop_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<NoopProgressCallback>();
    assert_send_sync::<Arc<dyn BatchProgressCallback>>();
}

// ── Conversion quality tests (need LLM API) ───────────────────────────────────

/// Page 1 of the Attention paper: scientific prose.
#[tokio::test]
async fn test_convert_arxiv_page1() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = live_config()
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");

    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    assert_all_pages_ok(&output, 1, "arxiv_page1");
    assert_eq!(output.document_pages, 15);
    assert!(output.batch.stats.total_input_tokens > 0);
    assert_markdown_quality(&output.markdown, "arxiv_page1");
    assert!(output.markdown.to_lowercase().contains("attention"));

    std::fs::write(output_dir().join("arxiv_page1.md"), &output.markdown).ok();
}

/// IRS Form 1040: form and table layout with a visible page separator.
#[tokio::test]
async fn test_convert_irs_form() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let config = live_config()
        .page_separator(PageSeparator::HorizontalRule)
        .build()
        .expect("valid config");

    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    assert_all_pages_ok(&output, 2, "irs_form");
    assert_markdown_quality(&output.markdown, "irs_form");
    let lower = output.markdown.to_lowercase();
    assert!(lower.contains("income") || lower.contains("tax") || lower.contains("1040"));
    assert!(output.markdown.contains("\n---\n"));

    std::fs::write(output_dir().join("irs_form_1040.md"), &output.markdown).ok();
}

/// Several pages through a single slot: order must survive serial dispatch.
#[tokio::test]
async fn test_convert_serial_batch_keeps_order() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = live_config()
        .pages(PageSelection::Range(1, 3))
        .max_concurrency(1)
        .page_separator(PageSeparator::Comment)
        .build()
        .expect("valid config");

    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    assert_all_pages_ok(&output, 3, "serial");
    assert_eq!(output.batch.stats.peak_concurrency, 1);
    let p2 = output.markdown.find("<!-- page 2 -->").expect("page 2 marker");
    let p3 = output.markdown.find("<!-- page 3 -->").expect("page 3 marker");
    assert!(p2 < p3);
}

/// JSON output must round-trip.
#[tokio::test]
async fn test_convert_json_serialisable() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let config = live_config()
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");

    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    let json = serde_json::to_string_pretty(&output).expect("ConversionOutput must serialise");
    let back: ConversionOutput =
        serde_json::from_str(&json).expect("JSON must deserialize back to ConversionOutput");
    assert_eq!(back.batch, output.batch);
    assert_eq!(back.markdown, output.markdown);

    std::fs::write(output_dir().join("irs_page1.json"), &json).ok();
}

#[tokio::test]
async fn test_convert_from_bytes() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let bytes = std::fs::read(&path).expect("read PDF bytes");

    let config = live_config()
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");

    let output = convert_from_bytes(&bytes, &config)
        .await
        .expect("convert_from_bytes should succeed");

    assert_all_pages_ok(&output, 1, "from_bytes");
    assert_markdown_quality(&output.markdown, "from_bytes");
}

#[tokio::test]
async fn test_convert_to_file_writes_markdown() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("nested/out.md");

    let config = live_config()
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");

    let output = convert_to_file(path.to_str().unwrap(), &target, &config)
        .await
        .expect("convert_to_file should succeed");

    let written = std::fs::read_to_string(&target).expect("output file exists");
    assert_eq!(written, output.markdown);
}

#[tokio::test]
async fn test_progress_callbacks_fire_per_page() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    #[derive(Default)]
    struct Tally {
        batch_total: AtomicUsize,
        starts: AtomicUsize,
        completes: AtomicUsize,
        batch_success: AtomicUsize,
    }

    impl BatchProgressCallback for Tally {
        fn on_batch_start(&self, total_pages: usize) {
            self.batch_total.store(total_pages, Ordering::SeqCst);
        }
        fn on_page_start(&self, _page_num: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_complete(&self, _page_num: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_complete(&self, _total: usize, success: usize) {
            self.batch_success.store(success, Ordering::SeqCst);
        }
    }

    let tally = Arc::new(Tally::default());
    let config = live_config()
        .progress_callback(Arc::clone(&tally) as Arc<dyn BatchProgressCallback>)
        .build()
        .expect("valid config");

    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    assert_all_pages_ok(&output, 2, "callbacks");
    assert_eq!(tally.batch_total.load(Ordering::SeqCst), 2);
    assert_eq!(tally.starts.load(Ordering::SeqCst), 2);
    assert_eq!(tally.completes.load(Ordering::SeqCst), 2);
    assert_eq!(tally.batch_success.load(Ordering::SeqCst), 2);
}

/// A token cancelled up front resolves every page as cancelled without
/// calling the model.
#[tokio::test]
async fn test_pre_cancelled_conversion() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let config = live_config().build().expect("valid config");
    let output = convert_with_cancel(path.to_str().unwrap(), &config, &cancel)
        .await
        .expect("document stages still succeed");

    assert_eq!(output.batch.status, BatchStatus::Failed);
    assert_eq!(output.batch.stats.cancelled, 2);
    assert_eq!(output.batch.stats.total_attempts, 0);
    assert!(output.markdown.is_empty());
}

#[tokio::test]
async fn test_missing_file_is_fatal() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }

    let config = live_config().build().expect("valid config");
    let err = convert("/definitely/not/a/real/file.pdf", &config)
        .await
        .expect_err("missing file must fail");
    assert!(matches!(err, PipelineError::FileNotFound { .. }));
}
