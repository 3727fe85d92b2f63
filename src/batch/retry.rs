//! Retry policy: bounded retry-on-transient-failure around one page.
//!
//! ## Slot policy
//!
//! The operation handed to [`RetryPolicy::execute`] is expected to acquire
//! its concurrency slot itself, per attempt. Backoff delays therefore run
//! with no slot held: a page waiting out a 429 never keeps a healthy page
//! from being dispatched.
//!
//! ## Backoff
//!
//! [`BackoffStrategy::ExponentialJitter`] waits `base * 2^(attempt-1)`,
//! capped at `max_delay`, plus or minus `jitter_factor` of that value. With
//! a 500 ms base and three attempts the waits are roughly 500 ms → 1 s.
//! [`BackoffStrategy::Fixed`] always waits `base`.

use crate::config::{BackoffStrategy, ConversionConfig};
use crate::error::{FailureKind, TranscribeError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a single attempt failed.
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// The Transcription Client reported an error; its class decides whether
    /// to retry.
    Failed(TranscribeError),
    /// The pipeline itself misbehaved. Never retried.
    Fault(String),
    /// Cancellation was observed before the client was called. The attempt
    /// is not counted.
    Cancelled,
}

impl From<TranscribeError> for AttemptError {
    fn from(e: TranscribeError) -> Self {
        AttemptError::Failed(e)
    }
}

/// A value together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl PageFailure {
    fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    fn cancelled(attempts: u32) -> Self {
        Self::new(FailureKind::Cancelled, "batch cancelled", attempts)
    }
}

/// Bounded retry with backoff, shared (cloned) by every page task.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// `max_attempts` is raised to one if zero.
    pub fn new(max_attempts: u32, base_delay: Duration, strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: base_delay.max(Duration::from_secs(30)),
            strategy,
            jitter_factor: 0.0,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.base_retry_delay,
            config.retry_backoff,
        )
        .with_max_delay(config.max_retry_delay)
        .with_jitter(config.jitter_factor)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::ExponentialJitter => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let capped = self
                    .base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay);
                if self.jitter_factor == 0.0 || capped.is_zero() {
                    return capped;
                }
                let capped_secs = capped.as_secs_f64();
                let jitter = capped_secs * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
                Duration::from_secs_f64((capped_secs + jitter).max(0.0))
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts or
    /// `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number. The `attempts` reported on
    /// success or failure count only attempts that reached the client: an
    /// `op` that returns [`AttemptError::Cancelled`] is not counted.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Attempted<T>, PageFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.execute_with(cancel, op, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(attempt, delay,
    /// error)` before each backoff wait.
    pub async fn execute_with<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        mut on_retry: R,
    ) -> Result<Attempted<T>, PageFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
        R: FnMut(u32, Duration, &TranscribeError),
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(PageFailure::cancelled(attempt));
            }
            attempt += 1;

            // A reply that is already in hand wins over a cancellation that
            // arrives in the same poll. An `op` still waiting to reach the
            // client resolves to `AttemptError::Cancelled` first, so this arm
            // only fires mid-call.
            let result = tokio::select! {
                biased;
                r = op(attempt) => r,
                _ = cancel.cancelled() => return Err(PageFailure::cancelled(attempt)),
            };

            let err = match result {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    })
                }
                Err(AttemptError::Cancelled) => return Err(PageFailure::cancelled(attempt - 1)),
                Err(AttemptError::Fault(msg)) => {
                    return Err(PageFailure::new(FailureKind::InternalFault, msg, attempt))
                }
                Err(AttemptError::Failed(e)) => e,
            };

            if !err.class.is_retriable() {
                debug!(attempt, error = %err, "non-retriable failure");
                return Err(PageFailure::new(FailureKind::Permanent, err.message, attempt));
            }
            if attempt >= self.max_attempts {
                return Err(PageFailure::new(
                    FailureKind::TransientExhausted,
                    err.message,
                    attempt,
                ));
            }

            let delay = self.delay_for(attempt);
            on_retry(attempt, delay, &err);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(PageFailure::cancelled(attempt)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}
