//! Core domain model types for evergreen.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The closed stage identifier enum and its phase/provider/kind tags
//! - Typed per-stage output shapes
//! - The normalized stage result and the handler outcome it is built from

mod outputs;
mod result;
mod stage;

pub use outputs::{
    Article, BlogOutline, DraftSet, EmailCampaign, EpisodeMetadata, HeadlineSet, OutlineSection,
    ParagraphDetails, ParagraphPlan, PlatformPosts, PreprocessedTranscript, Quote, QuoteSet,
    RefinedDraft, SocialContent, SocialPost, Speaker, TranscriptAnalysis,
};
pub use result::{StageOutcome, StageOutput, StageOutputKind, StageResult};
pub use stage::{Phase, Provider, StageId, StageKind};
