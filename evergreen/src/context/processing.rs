//! The per-run processing context.

use super::PreviousStages;
use crate::config::EvergreenSettings;
use crate::core::PreprocessedTranscript;
use crate::registry::StageRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage may read during a run.
///
/// Owned by the phase scheduler and shared with stage tasks behind an
/// `Arc`. Stages only read; the scheduler commits results after each phase.
#[derive(Debug)]
pub struct ProcessingContext {
    /// Run identifier.
    pub run_id: Uuid,
    /// Transcript as supplied by the caller.
    pub raw_transcript: String,
    /// Run settings.
    pub settings: Arc<EvergreenSettings>,
    /// Stage registry.
    pub registry: Arc<StageRegistry>,
    /// Completed stage results.
    pub previous_stages: PreviousStages,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl ProcessingContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(
        raw_transcript: impl Into<String>,
        settings: Arc<EvergreenSettings>,
        registry: Arc<StageRegistry>,
    ) -> Self {
        Self::with_run_id(Uuid::new_v4(), raw_transcript, settings, registry)
    }

    /// Creates a context with a caller-supplied run id.
    #[must_use]
    pub fn with_run_id(
        run_id: Uuid,
        raw_transcript: impl Into<String>,
        settings: Arc<EvergreenSettings>,
        registry: Arc<StageRegistry>,
    ) -> Self {
        Self {
            run_id,
            raw_transcript: raw_transcript.into(),
            settings,
            registry,
            previous_stages: PreviousStages::new(),
            started_at: Utc::now(),
        }
    }

    /// The transcript downstream stages should read: the compressed
    /// narrative when preprocessing produced one, otherwise the raw text.
    #[must_use]
    pub fn working_transcript(&self) -> &str {
        self.previous_stages
            .output::<PreprocessedTranscript>()
            .and_then(|p| p.comprehensive_summary.as_deref())
            .unwrap_or(&self.raw_transcript)
    }

    /// Returns true if the working transcript is a compressed narrative.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.previous_stages
            .output::<PreprocessedTranscript>()
            .is_some_and(PreprocessedTranscript::is_compressed)
    }
}
