//! Batch coordinator: the orchestration core of the pipeline.
//!
//! ## Data Flow
//!
//! ```text
//!              ┌──────────── one tokio task per page ────────────┐
//! pages ──▶ PageTask ──▶ RetryPolicy ──▶ (limiter slot ▸ Transcriber) ──▶ PageOutcome
//!              └────────────────────────────────────────────────┘
//!                                   │ completion order
//!                                   ▼
//!                              aggregate ──▶ BatchResult (index order)
//! ```
//!
//! 1. [`limiter`]: counting semaphore bounding in-flight client calls
//! 2. [`retry`]: per-page retry/backoff with error classification
//! 3. [`aggregate`]: reorder outcomes and derive the batch status
//!
//! Every page task produces exactly one [`PageOutcome`]. A page that fails,
//! panics, or is cancelled never aborts its siblings. Only a malformed page
//! sequence (before dispatch) or a broken internal invariant makes
//! [`BatchCoordinator::process`] return `Err`.
//!
//! ## Cancellation
//!
//! When the token fires, tasks stop at their next suspension point (waiting
//! for a slot, waiting on the model, backing off) and record
//! [`FailureKind::Cancelled`]. A reply already in hand is still recorded.
//! Tasks that have not finished after the grace period are aborted. Slots
//! are guards, so no path leaves one held. Dropping the `process` future
//! drops the task set, which aborts every page task.

pub mod aggregate;
pub mod limiter;
pub mod retry;

use crate::config::ConversionConfig;
use crate::error::{FailureKind, PipelineError};
use crate::output::{BatchResult, PageImage, PageOutcome};
use crate::pipeline::llm::Transcriber;
use crate::progress::ProgressCallback;
use futures::FutureExt;
use limiter::ConcurrencyLimiter;
use retry::{AttemptError, RetryPolicy};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a batch gets its concurrency budget from.
#[derive(Debug, Clone)]
pub enum LimiterScope {
    /// A fresh limiter of this capacity for every `process` call.
    PerBatch(usize),
    /// One limiter shared by every batch using this coordinator. Its capacity
    /// is the budget across all concurrent batches.
    Shared(Arc<ConcurrencyLimiter>),
}

impl LimiterScope {
    fn limiter(&self) -> Arc<ConcurrencyLimiter> {
        match self {
            LimiterScope::PerBatch(n) => Arc::new(ConcurrencyLimiter::new(*n)),
            LimiterScope::Shared(limiter) => Arc::clone(limiter),
        }
    }
}

/// One unit of work: a page image and its position in the batch.
#[derive(Debug)]
pub struct PageTask {
    /// 0-based position in the batch, used only to reorder results.
    pub index: usize,
    pub image: PageImage,
}

/// State shared by every page task of one batch.
struct PageContext {
    transcriber: Arc<dyn Transcriber>,
    limiter: Arc<ConcurrencyLimiter>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
    total: usize,
}

/// Fans pages out to the Transcription Client and reassembles the results.
///
/// The client handle is constructed once per process and passed in; the
/// coordinator itself holds no per-batch state and can serve many batches
/// concurrently.
#[derive(Clone)]
pub struct BatchCoordinator {
    transcriber: Arc<dyn Transcriber>,
    limiter: LimiterScope,
    retry: RetryPolicy,
    cancel_grace: Duration,
    progress: Option<ProgressCallback>,
}

impl BatchCoordinator {
    /// Coordinator with a per-batch limiter and retry policy taken from `config`.
    pub fn new(transcriber: Arc<dyn Transcriber>, config: &ConversionConfig) -> Self {
        Self {
            transcriber,
            limiter: LimiterScope::PerBatch(config.max_concurrency),
            retry: RetryPolicy::from_config(config),
            cancel_grace: config.cancel_grace,
            progress: config.progress_callback.clone(),
        }
    }

    pub fn with_limiter(mut self, scope: LimiterScope) -> Self {
        self.limiter = scope;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Transcribe `pages` and return one outcome per page, in page order.
    ///
    /// Returns `Err` only if the page sequence is invalid (before anything is
    /// dispatched) or the outcome set breaks the one-outcome-per-page
    /// invariant.
    pub async fn process(
        &self,
        pages: Vec<PageImage>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, PipelineError> {
        validate_pages(&pages)?;

        let started = Instant::now();
        let total = pages.len();
        let limiter = self.limiter.limiter();
        info!(
            pages = total,
            max_concurrency = limiter.capacity(),
            max_attempts = self.retry.max_attempts(),
            "Starting batch"
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let ctx = Arc::new(PageContext {
            transcriber: Arc::clone(&self.transcriber),
            limiter: Arc::clone(&limiter),
            retry: self.retry.clone(),
            cancel: cancel.clone(),
            progress: self.progress.clone(),
            total,
        });

        let mut set = JoinSet::new();
        let mut page_numbers = Vec::with_capacity(total);
        for (index, image) in pages.into_iter().enumerate() {
            page_numbers.push(image.page_number);
            let task = PageTask { index, image };
            let ctx = Arc::clone(&ctx);
            let page_number = task.image.page_number;
            set.spawn(
                AssertUnwindSafe(run_page(task, ctx))
                    .catch_unwind()
                    .map(move |r| {
                        r.unwrap_or_else(|_| {
                            error!("Page {}: task panicked", page_number);
                            PageOutcome::Failure {
                                index,
                                page_number,
                                kind: FailureKind::InternalFault,
                                message: "page task panicked".to_string(),
                                attempts: 0,
                                duration_ms: 0,
                            }
                        })
                    }),
            );
        }
        drop(ctx);

        let outcomes = collect_outcomes(set, &page_numbers, cancel, self.cancel_grace).await;

        let mut result = aggregate::aggregate(outcomes, total)?;
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.stats.peak_concurrency = limiter.peak();

        info!(
            status = %result.status,
            succeeded = result.stats.succeeded,
            failed = result.stats.failed,
            cancelled = result.stats.cancelled,
            attempts = result.stats.total_attempts,
            peak_concurrency = result.stats.peak_concurrency,
            duration_ms = result.stats.duration_ms,
            "Batch complete"
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, result.stats.succeeded);
        }

        Ok(result)
    }

    /// [`process`](Self::process) with an absolute deadline.
    ///
    /// When the deadline passes, the batch is cancelled exactly as if
    /// `cancel` had fired. `cancel` itself is left untouched.
    pub async fn process_with_deadline(
        &self,
        pages: Vec<PageImage>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, PipelineError> {
        let scoped = cancel.child_token();
        let work = self.process(pages, &scoped);
        tokio::pin!(work);
        tokio::select! {
            biased;
            result = &mut work => result,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Batch deadline reached");
                scoped.cancel();
                work.await
            }
        }
    }
}

/// Drain `set` until every page task has ended.
///
/// Once `cancel` fires, tasks still running after `grace` are aborted. Every
/// index without an outcome is then filled in: `Cancelled` if the batch was
/// cancelled, `InternalFault` otherwise.
async fn collect_outcomes(
    mut set: JoinSet<PageOutcome>,
    page_numbers: &[usize],
    cancel: &CancellationToken,
    grace: Duration,
) -> Vec<PageOutcome> {
    let total = page_numbers.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut resolved = vec![false; total];
    let mut grace_until: Option<Instant> = None;
    let mut aborted = false;

    loop {
        tokio::select! {
            biased;
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok(outcome)) => {
                    if let Some(slot) = resolved.get_mut(outcome.index()) {
                        *slot = true;
                    }
                    outcomes.push(outcome);
                }
                // Aborted after the grace period; filled in below.
                Some(Err(e)) => debug!("Page task ended without outcome: {}", e),
            },
            _ = cancel.cancelled(), if grace_until.is_none() => {
                warn!(
                    pending = set.len(),
                    grace_ms = grace.as_millis() as u64,
                    "Batch cancelled; winding down page tasks"
                );
                grace_until = Some(Instant::now() + grace);
            }
            _ = tokio::time::sleep_until(grace_until.unwrap_or_else(Instant::now)),
                if grace_until.is_some() && !aborted => {
                warn!(pending = set.len(), "Grace period over; aborting page tasks");
                set.abort_all();
                aborted = true;
            }
        }
    }

    for (index, done) in resolved.iter().enumerate() {
        if *done {
            continue;
        }
        let (kind, message) = if cancel.is_cancelled() {
            (FailureKind::Cancelled, "aborted after cancellation grace period")
        } else {
            (FailureKind::InternalFault, "page task ended without an outcome")
        };
        outcomes.push(PageOutcome::Failure {
            index,
            page_number: page_numbers[index],
            kind,
            message: message.to_string(),
            attempts: 0,
            duration_ms: 0,
        });
    }
    outcomes
}

/// Reject page sequences that cannot be processed at all.
fn validate_pages(pages: &[PageImage]) -> Result<(), PipelineError> {
    let mut seen = HashSet::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        if page.page_number == 0 {
            return Err(PipelineError::InvalidPageSource(format!(
                "page at position {index} has page number 0 (page numbers are 1-indexed)"
            )));
        }
        if !seen.insert(page.page_number) {
            return Err(PipelineError::InvalidPageSource(format!(
                "page {} appears more than once",
                page.page_number
            )));
        }
        if page.data.is_empty() {
            return Err(PipelineError::InvalidPageSource(format!(
                "page {} has an empty image payload",
                page.page_number
            )));
        }
    }
    Ok(())
}

/// Drive one page through retry + limiter + client and record its outcome.
async fn run_page(task: PageTask, ctx: Arc<PageContext>) -> PageOutcome {
    let started = Instant::now();
    let PageTask { index, image } = task;
    let page_number = image.page_number;
    let ctx_ref = &ctx;
    let image_ref = &image;

    let result = ctx
        .retry
        .execute_with(
            &ctx.cancel,
            |attempt| async move {
                // The slot covers this attempt only; backoff runs without it.
                // A freed slot must not start a call once the batch is cancelled.
                let _slot = tokio::select! {
                    biased;
                    _ = ctx_ref.cancel.cancelled() => return Err(AttemptError::Cancelled),
                    slot = ctx_ref.limiter.acquire() => match slot {
                        Ok(slot) => slot,
                        Err(e) => {
                            return Err(AttemptError::Fault(format!(
                                "concurrency limiter closed: {e}"
                            )))
                        }
                    },
                };
                if attempt == 1 {
                    if let Some(ref cb) = ctx_ref.progress {
                        cb.on_page_start(page_number, ctx_ref.total);
                    }
                }
                debug!("Page {}: attempt {}", page_number, attempt);
                ctx_ref
                    .transcriber
                    .transcribe(image_ref)
                    .await
                    .map_err(AttemptError::from)
            },
            |attempt, delay, err| {
                warn!(
                    "Page {}: attempt {} failed ({:?}), retrying in {}ms: {}",
                    page_number,
                    attempt,
                    err.class,
                    delay.as_millis(),
                    err
                );
                if let Some(ref cb) = ctx_ref.progress {
                    cb.on_page_retry(page_number, attempt, delay, &err.message);
                }
            },
        )
        .await;

    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(done) => {
            if let Some(ref cb) = ctx.progress {
                cb.on_page_complete(page_number, ctx.total, done.value.markdown.len());
            }
            PageOutcome::Success {
                index,
                page_number,
                markdown: done.value.markdown,
                attempts: done.attempts,
                input_tokens: done.value.input_tokens,
                output_tokens: done.value.output_tokens,
                duration_ms,
            }
        }
        Err(failure) => {
            if failure.kind != FailureKind::Cancelled {
                warn!(
                    "Page {}: {} after {} attempt(s): {}",
                    page_number, failure.kind, failure.attempts, failure.message
                );
            }
            if let Some(ref cb) = ctx.progress {
                cb.on_page_error(
                    page_number,
                    ctx.total,
                    &format!("{}: {}", failure.kind, failure.message),
                );
            }
            PageOutcome::Failure {
                index,
                page_number,
                kind: failure.kind,
                message: failure.message,
                attempts: failure.attempts,
                duration_ms,
            }
        }
    }
}
