//! Accessors for canonical artifacts.
//!
//! Consumers never recompute the crux or the quote set; they read the
//! producer's slot through these functions, which fail if the producer has
//! not completed yet.

use super::ProcessingContext;
use crate::core::{QuoteSet, StageId, StageOutputKind, TranscriptAnalysis};
use crate::errors::ProcessingError;

/// Reads a required earlier output on behalf of `consumer`.
///
/// # Errors
///
/// Returns a `ProcessingError` naming the consumer if the producing stage
/// has not completed.
pub fn require<T: StageOutputKind>(
    ctx: &ProcessingContext,
    consumer: StageId,
) -> Result<&T, ProcessingError> {
    ctx.previous_stages.output::<T>().ok_or_else(|| {
        ProcessingError::new(
            consumer,
            ctx.run_id,
            format!(
                "requires output of '{}', which has not completed",
                T::STAGE.display_name()
            ),
        )
    })
}

/// The canonical episode crux.
///
/// # Errors
///
/// Returns a `ProcessingError` if transcript analysis has not completed.
pub fn episode_crux(ctx: &ProcessingContext, consumer: StageId) -> Result<&str, ProcessingError> {
    require::<TranscriptAnalysis>(ctx, consumer).map(|analysis| analysis.episode_crux.as_str())
}

/// The canonical quote set.
///
/// # Errors
///
/// Returns a `ProcessingError` if quote extraction has not completed.
pub fn quote_set(ctx: &ProcessingContext, consumer: StageId) -> Result<&QuoteSet, ProcessingError> {
    require::<QuoteSet>(ctx, consumer)
}
