//! Command-line flags shared by the `pdf2md` and `pdf2md-server` binaries.
//!
//! Every conversion option is a clap flag with a `PDF2MD_*` environment
//! fallback, so the same settings work from a shell, a Makefile or a
//! container environment.

use crate::config::{BackoffStrategy, ConversionConfig, PageSelection, PageSeparator};
use crate::progress::ProgressCallback;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Conversion and batch options.
#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    pub model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    pub provider: Option<String>,

    /// Maximum concurrent model calls.
    #[arg(short = 'c', long, env = "PDF2MD_MAX_CONCURRENCY", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub max_concurrency: u64,

    /// Attempts per page, including the first.
    #[arg(long, env = "PDF2MD_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "PDF2MD_RETRY_DELAY_MS", default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Upper bound for one retry delay, in milliseconds.
    #[arg(long, env = "PDF2MD_MAX_RETRY_DELAY_MS", default_value_t = 30_000)]
    pub max_retry_delay_ms: u64,

    /// How retry delays grow.
    #[arg(long, env = "PDF2MD_BACKOFF", value_enum, default_value = "exponential")]
    pub backoff: BackoffArg,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 60)]
    pub api_timeout: u64,

    /// Deadline for the whole batch in seconds; unfinished pages are cancelled.
    #[arg(long, env = "PDF2MD_BATCH_TIMEOUT")]
    pub batch_timeout: Option<u64>,

    /// Largest accepted document in bytes.
    #[arg(long, env = "PDF2MD_MAX_FILE_SIZE", default_value_t = crate::config::DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: usize,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    pub dpi: u32,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2MD_PAGES", default_value = "all")]
    pub pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2MD_SEPARATOR", default_value = "none")]
    pub separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    pub password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    pub system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    pub max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.1)]
    pub temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    pub download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffArg {
    Fixed,
    Exponential,
}

impl From<BackoffArg> for BackoffStrategy {
    fn from(v: BackoffArg) -> Self {
        match v {
            BackoffArg::Fixed => BackoffStrategy::Fixed,
            BackoffArg::Exponential => BackoffStrategy::ExponentialJitter,
        }
    }
}

impl BatchArgs {
    /// Map the flags to a validated `ConversionConfig`.
    pub async fn to_config(&self, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
        let system_prompt = match self.system_prompt {
            Some(ref path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
            ),
            None => None,
        };

        let mut builder = ConversionConfig::builder()
            .max_concurrency(usize::try_from(self.max_concurrency).unwrap_or(usize::MAX))
            .max_attempts(self.max_attempts)
            .base_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .max_retry_delay(Duration::from_millis(self.max_retry_delay_ms))
            .retry_backoff(self.backoff.into())
            .api_timeout_secs(self.api_timeout)
            .max_file_size(self.max_file_size)
            .dpi(self.dpi)
            .pages(parse_pages(&self.pages)?)
            .page_separator(parse_separator(&self.separator))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .download_timeout_secs(self.download_timeout);

        if let Some(secs) = self.batch_timeout {
            builder = builder.batch_timeout_secs(secs);
        }
        if let Some(ref model) = self.model {
            builder = builder.model(model);
        }
        if let Some(ref provider) = self.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(ref password) = self.password {
            builder = builder.password(password);
        }
        if let Some(prompt) = system_prompt {
            builder = builder.system_prompt(prompt);
        }
        if let Some(cb) = progress {
            builder = builder.progress_callback(cb);
        }

        builder.build().context("Invalid configuration")
    }
}

/// Install the stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug and `quiet`
/// selects error.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Parse `--pages` string into `PageSelection`.
pub fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
pub fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        batch: BatchArgs,
    }

    #[test]
    fn parse_pages_forms() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages("5").unwrap(), PageSelection::Single(5)));
        assert!(matches!(
            parse_pages("3-15").unwrap(),
            PageSelection::Range(3, 15)
        ));
        match parse_pages("1, 3,5").unwrap() {
            PageSelection::Set(p) => assert_eq!(p, vec![1, 3, 5]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_pages_rejects_bad_input() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("9-3").is_err());
        assert!(parse_pages("1,x").is_err());
        assert!(parse_pages("0,2").is_err());
    }

    #[test]
    fn separator_keeps_custom_text() {
        assert!(matches!(parse_separator("HR"), PageSeparator::HorizontalRule));
        match parse_separator("<Page Break>") {
            PageSeparator::Custom(s) => assert_eq!(s, "<Page Break>"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn flags_map_to_config() {
        let args = Harness::try_parse_from([
            "test",
            "--max-concurrency",
            "4",
            "--max-attempts",
            "5",
            "--retry-delay-ms",
            "100",
            "--backoff",
            "fixed",
            "--batch-timeout",
            "90",
            "--pages",
            "2-3",
        ])
        .unwrap()
        .batch;
        let config = args.to_config(None).await.unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_retry_delay, Duration::from_millis(100));
        assert_eq!(config.retry_backoff, BackoffStrategy::Fixed);
        assert_eq!(config.batch_timeout(), Some(Duration::from_secs(90)));
        assert!(matches!(config.pages, PageSelection::Range(2, 3)));
    }

    #[test]
    fn zero_concurrency_is_refused_by_clap() {
        assert!(Harness::try_parse_from(["test", "--max-concurrency", "0"]).is_err());
    }
}
