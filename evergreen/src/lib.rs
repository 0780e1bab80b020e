//! # Evergreen
//!
//! Orchestration core for turning a long-form transcript into a family of
//! derived content artifacts: summary, quotes, outline, draft, refined
//! prose, platform posts and an email campaign.
//!
//! Evergreen provides:
//!
//! - **A fixed stage graph**: ten stages identified by a closed [`StageId`]
//!   enum, dispatched by exhaustive match
//! - **Phase scheduling**: stages inside a phase run concurrently, phases run
//!   strictly in sequence, and the first hard failure aborts the run
//! - **Canonical artifacts**: the episode crux and the quote set each have
//!   exactly one producing stage and typed accessors for consumers
//! - **Validation-driven retry**: generative stages are retried against soft
//!   structural checks and degrade gracefully on exhaustion
//! - **A cost/token ledger**: separate sequential and parallel composition
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evergreen::prelude::*;
//!
//! let pipeline = Pipeline::builder()
//!     .with_settings(EvergreenSettings::default())
//!     .with_invoker(Provider::Anthropic, anthropic)
//!     .with_invoker(Provider::OpenAi, openai)
//!     .build()?;
//!
//! let report = pipeline.run(transcript).await?;
//! println!("total cost: ${:.4}", report.total_usage.cost_usd);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

pub mod config;
pub mod context;
pub mod contracts;
pub mod core;
pub mod errors;
pub mod events;
pub mod gate;
pub mod invoker;
pub mod ledger;
pub mod metering;
pub mod observability;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod stages;
pub mod testing;
pub mod validation;

pub use crate::core::{Phase, Provider, StageId, StageKind, StageResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        BrandVoice, DraftMode, EvergreenSettings, PipelineSettings, Platform, SocialMode,
    };
    pub use crate::context::{PreviousStages, ProcessingContext};
    pub use crate::core::{
        Phase, Provider, StageId, StageKind, StageOutcome, StageOutput, StageOutputKind,
        StageResult,
    };
    pub use crate::errors::{
        EvergreenError, PipelineFailure, ProcessingError, ProviderError, RegistryError,
        StatusClass, ValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gate::{GateDecision, PreprocessingGate};
    pub use crate::invoker::{InvokeOptions, Invocation, ModelInvoker, RetryingInvoker};
    pub use crate::ledger::Usage;
    pub use crate::metering::{UsageMeter, UsageRecord};
    pub use crate::pipeline::{
        Pipeline, PipelineBuilder, PhaseReport, PhaseScheduler, PhaseState, RunReport,
        StageRunner,
    };
    pub use crate::prompts::{PromptRenderer, TemplateCache, TemplateSource};
    pub use crate::registry::{CanonicalArtifact, StageDescriptor, StageRegistry};
    pub use crate::validation::{ValidationVerdict, Validator};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_exposes_stage_graph() {
        assert_eq!(StageId::ALL.len(), StageId::COUNT);
        assert_eq!(StageId::Preprocessing.phase(), Phase::Pregate);
    }
}
