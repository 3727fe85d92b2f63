//! Configuration types for batch PDF-to-Markdown transcription.
//!
//! All pipeline behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct for every knob makes it
//! trivial to share a config across page tasks and to log exactly what a run
//! was configured with.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default upload limit: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Configuration for a batch transcription.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2md_batch::{BackoffStrategy, ConversionConfig};
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .max_concurrency(4)
///     .max_attempts(5)
///     .base_retry_delay(Duration::from_millis(250))
///     .retry_backoff(BackoffStrategy::ExponentialJitter)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrency, 4);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Maximum number of Transcription Client calls in flight at once. Default: 10.
    ///
    /// Model APIs are network-bound; ten concurrent calls cut wall-clock time
    /// by close to an order of magnitude. Lower it when the provider answers
    /// with 429s.
    pub max_concurrency: usize,

    /// Attempts per page, including the first one. Default: 3.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 500 ms.
    ///
    /// With [`BackoffStrategy::ExponentialJitter`] the delay doubles after each
    /// attempt (500 ms → 1 s → 2 s …) up to `max_retry_delay`.
    pub base_retry_delay: Duration,

    /// Upper bound for a single backoff delay. Default: 30 s.
    pub max_retry_delay: Duration,

    /// How retry delays grow. Default: exponential with jitter.
    pub retry_backoff: BackoffStrategy,

    /// Relative jitter applied to exponential delays, `0.0..=1.0`. Default: 0.2.
    ///
    /// Pages that fail together (one 429 burst) would otherwise retry in
    /// lock-step and trip the rate limit again.
    pub jitter_factor: f64,

    /// Time page tasks get to wind down after cancellation before they are
    /// aborted. Default: 2 s.
    pub cancel_grace: Duration,

    /// Per-call timeout for one model request in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Deadline for the whole batch in seconds. Default: none.
    ///
    /// When it expires, unresolved pages are recorded as cancelled and the
    /// batch returns with whatever finished.
    pub batch_timeout_secs: Option<u64>,

    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Largest accepted document in bytes. Default: 50 MiB.
    pub max_file_size: usize,

    /// LLM model identifier, e.g. "gpt-4.1-nano".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Page separator in assembled output. Default: None.
    pub page_separator: PageSeparator,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            retry_backoff: BackoffStrategy::default(),
            jitter_factor: 0.2,
            cancel_grace: Duration::from_secs(2),
            api_timeout_secs: 60,
            batch_timeout_secs: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            password: None,
            system_prompt: None,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_concurrency", &self.max_concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("base_retry_delay", &self.base_retry_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("retry_backoff", &self.retry_backoff)
            .field("jitter_factor", &self.jitter_factor)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("batch_timeout_secs", &self.batch_timeout_secs)
            .field("dpi", &self.dpi)
            .field("max_file_size", &self.max_file_size)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("pages", &self.pages)
            .field("page_separator", &self.page_separator)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The whole-batch deadline as a duration, if configured.
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.config.base_retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = delay;
        self
    }

    pub fn retry_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.config.retry_backoff = strategy;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.config.cancel_grace = grace;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn batch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.batch_timeout_secs = Some(secs);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, PipelineError> {
        let c = &self.config;
        if c.max_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_retry_delay < c.base_retry_delay {
            return Err(PipelineError::InvalidConfig(format!(
                "max_retry_delay ({:?}) must not be shorter than base_retry_delay ({:?})",
                c.max_retry_delay, c.base_retry_delay
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_file_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_file_size must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Every retry waits `base_retry_delay`.
    Fixed,
    /// `base_retry_delay * 2^(attempt-1)`, capped, with ± `jitter_factor` noise. (default)
    #[default]
    ExponentialJitter,
}

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) if (1..=total_pages).contains(p) => vec![p - 1],
            PageSelection::Single(_) => vec![],
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// The first requested page number, for error reporting.
    pub fn first_requested(&self) -> usize {
        match self {
            PageSelection::All => 1,
            PageSelection::Single(p) => *p,
            PageSelection::Range(s, _) => *s,
            PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(0),
        }
    }
}

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = ConversionConfig::default();
        assert_eq!(c.max_concurrency, 10);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.base_retry_delay, Duration::from_millis(500));
        assert_eq!(c.retry_backoff, BackoffStrategy::ExponentialJitter);
        assert_eq!(c.max_file_size, 50 * 1024 * 1024);
        assert!(c.batch_timeout().is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ConversionConfig::builder().max_concurrency(0).build().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = ConversionConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn retry_delay_bounds_are_checked() {
        let err = ConversionConfig::builder()
            .base_retry_delay(Duration::from_secs(10))
            .max_retry_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn zero_base_delay_is_allowed() {
        let c = ConversionConfig::builder()
            .base_retry_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(c.base_retry_delay, Duration::ZERO);
    }

    #[test]
    fn setters_clamp() {
        let c = ConversionConfig::builder()
            .dpi(1000)
            .jitter_factor(5.0)
            .temperature(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.jitter_factor, 1.0);
        assert_eq!(c.temperature, 0.0);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(3, 10).to_indices(4), vec![2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 2]).to_indices(5),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn separator_render() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::Comment.render(7), "\n\n<!-- page 7 -->\n\n");
        assert_eq!(
            PageSeparator::Custom("***".into()).render(1),
            "\n\n***\n\n"
        );
    }
}
