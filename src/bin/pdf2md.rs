//! CLI binary for pdf2md-batch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_batch::cli::{init_tracing, BatchArgs};
use pdf2md_batch::convert::write_atomic;
use pdf2md_batch::{
    convert_with_cancel, BatchProgressCallback, BatchStatus, CancellationToken, ConversionOutput,
    ProgressCallback,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// resolved page. Pages resolve out of order, so per-page start times are
/// keyed by page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us the page count.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Transcribing");
        self.bar.set_message("");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Transcribing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, delay: Duration, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  attempt {} failed, retry in {:.1}s  {}",
            yellow("↻"),
            page_num,
            attempt,
            delay.as_secs_f64(),
            dim(&truncate(error, 60)),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

/// Shorten long error messages on a char boundary.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  pdf2md document.pdf

  # Convert to file, 4 calls in flight, up to 5 attempts per page
  pdf2md document.pdf -o output.md --max-concurrency 4 --max-attempts 5

  # Give up on pages still unfinished after two minutes
  pdf2md --batch-timeout 120 big.pdf -o big.md

  # Specific pages with a visible separator
  pdf2md --pages 1-5 --separator hr paper.pdf

  # Convert from URL
  pdf2md https://arxiv.org/pdf/1706.03762 -o attention.md

  # Per-page outcomes as JSON
  pdf2md --json document.pdf > output.json

EXIT STATUS:
  0  every page, or some pages, transcribed (failed pages are reported)
  1  no page could be transcribed, or a fatal error occurred

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (default: system library)
  PDF2MD_*                Fallback for every flag, e.g. PDF2MD_MAX_CONCURRENCY
"#;

/// Transcribe PDF files and URLs to Markdown using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Transcribe PDF files and URLs to Markdown, page by page, using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Output the full ConversionOutput (per-page outcomes, stats) as JSON.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,

    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library INFO logs would fight with the progress bar for the terminal.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    init_tracing(cli.verbose, cli.quiet || (show_progress && !cli.verbose));

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = cli.batch.to_config(progress_cb).await?;

    // ── Ctrl-C cancels the batch; finished pages are still written ──────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Interrupted, cancelling remaining pages…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    let output = convert_with_cancel(&cli.input, &config, &cancel)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if let Some(ref path) = cli.output {
        write_atomic(path, &output.markdown)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let mut handle = io::stdout().lock();
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        print_summary(&output, cli.output.as_ref());
    }

    if output.batch.status == BatchStatus::Failed {
        anyhow::bail!(
            "No page could be transcribed ({} failed)",
            output.batch.stats.failed
        );
    }
    Ok(())
}

fn print_summary(output: &ConversionOutput, path: Option<&PathBuf>) {
    let stats = &output.batch.stats;
    let mark = match output.batch.status {
        BatchStatus::Complete => green("✔"),
        BatchStatus::Partial => cyan("⚠"),
        BatchStatus::Failed => red("✘"),
    };
    let target = path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {}/{} pages  {} attempts  {}ms{}",
        mark,
        stats.succeeded,
        stats.total_pages,
        stats.total_attempts,
        stats.duration_ms,
        target,
    );
    if stats.failed > 0 {
        for outcome in output.batch.failures() {
            if let (Some(kind), page) = (outcome.failure_kind(), outcome.page_number()) {
                eprintln!("   {} page {}: {}", red("✗"), page, kind);
            }
        }
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  peak {} in flight",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
        stats.peak_concurrency,
    );
}
