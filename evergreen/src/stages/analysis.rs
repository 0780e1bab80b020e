//! Stage 1: transcript analysis, producer of the canonical episode crux.

use super::{format, StageEnv};
use crate::core::{StageOutcome, TranscriptAnalysis};
use crate::errors::EvergreenError;
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};

/// Allowed values of `episode_format`.
pub const EPISODE_FORMATS: &[&str] = &["interview", "solo", "panel", "educational", "narrative"];

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["episode_crux", "key_themes", "episode_format", "target_audience"],
        "properties": {
            "episode_crux": {"type": "string"},
            "key_themes": {"type": "array", "items": {"type": "string"}},
            "episode_format": {"type": "string", "enum": EPISODE_FORMATS},
            "target_audience": {"type": "string"}
        }
    })
}

fn validator() -> Validator {
    Validator::new("transcript_analysis")
        .rule(Rule::Required("/episode_crux"))
        .rule(Rule::MinItems("/key_themes", 1))
        .rule(Rule::OneOf("/episode_format", EPISODE_FORMATS))
        .rule(Rule::Required("/target_audience"))
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let formats: Vec<String> = EPISODE_FORMATS.iter().map(ToString::to_string).collect();
    let prompt = env.render(
        "transcript_analysis",
        VarsBuilder::new()
            .set("formats", format::list(&formats))
            .set("transcript", env.ctx.working_transcript()),
    )?;

    let (analysis, usage): (TranscriptAnalysis, _) =
        env.extract(&prompt, schema(), &validator()).await?;
    let crux = analysis.episode_crux.clone();
    Ok(StageOutcome::with_output(analysis).text(crux).usage(usage))
}
