//! Pipeline lifecycle events.
//!
//! Sinks are passed to the pipeline explicitly; there is no global sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// A run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every phase completed.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A phase failed and the run aborted.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A phase began.
    pub const PHASE_STARTED: &str = "phase.started";
    /// All stages in a phase succeeded.
    pub const PHASE_COMPLETED: &str = "phase.completed";
    /// A stage in the phase failed.
    pub const PHASE_FAILED: &str = "phase.failed";
    /// A stage began.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage produced a result.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage decided it had nothing to do.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A generative stage is retrying after failed validation.
    pub const STAGE_RETRY: &str = "stage.retry";
}
