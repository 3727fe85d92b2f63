//! Result aggregation: unordered page outcomes → ordered [`BatchResult`].

use crate::error::{FailureKind, PipelineError};
use crate::output::{BatchResult, BatchStats, BatchStatus, PageOutcome};

/// Sort `outcomes` by index and derive the batch status.
///
/// The set must hold exactly one outcome for every index in
/// `0..expected`. Anything else is a pipeline bug and is reported as
/// [`PipelineError::IncompleteBatch`].
///
/// `duration_ms` and `peak_concurrency` in the returned stats are left at
/// zero for the coordinator to fill in.
pub fn aggregate(
    mut outcomes: Vec<PageOutcome>,
    expected: usize,
) -> Result<BatchResult, PipelineError> {
    let received = outcomes.len();
    outcomes.sort_by_key(PageOutcome::index);

    let covers_every_index = received == expected
        && outcomes
            .iter()
            .enumerate()
            .all(|(position, outcome)| outcome.index() == position);
    if !covers_every_index {
        return Err(PipelineError::IncompleteBatch { expected, received });
    }

    let mut stats = BatchStats {
        total_pages: expected,
        ..BatchStats::default()
    };
    for outcome in &outcomes {
        stats.total_attempts += u64::from(outcome.attempts());
        match outcome {
            PageOutcome::Success {
                input_tokens,
                output_tokens,
                ..
            } => {
                stats.succeeded += 1;
                stats.total_input_tokens += *input_tokens as u64;
                stats.total_output_tokens += *output_tokens as u64;
            }
            PageOutcome::Failure { kind, .. } => {
                stats.failed += 1;
                if *kind == FailureKind::Cancelled {
                    stats.cancelled += 1;
                }
            }
        }
    }

    Ok(BatchResult {
        status: BatchStatus::from_counts(stats.succeeded, stats.failed),
        outcomes,
        stats,
    })
}
