//! Testing utilities for evergreen pipelines.
//!
//! This module provides:
//! - A scripted model invoker keyed by invocation tag
//! - Sample transcripts and valid canned replies for every stage
//! - Assertions for stage results and run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_stages_ran, assert_cost_reconciles, assert_stage_clean, assert_stage_degraded,
    assert_stage_skipped,
};
pub use fixtures::{
    analysis_response, article_markdown, combined_posts_response, compressed_response,
    draft_response, email_response, headlines_response, long_transcript, outline_response,
    paragraphs_response, posts_response, quotes_response, sample_transcript,
    script_standard_replies, shared_invokers, standard_invoker, transcript_of_words,
};
pub use mocks::{RecordedCall, ScriptedInvoker, ScriptedReply};
