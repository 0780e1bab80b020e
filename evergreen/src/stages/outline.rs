//! Stage 3: blog outline built on the crux and the quote set.

use super::{format, StageEnv};
use crate::context::{episode_crux, quote_set, require};
use crate::core::{BlogOutline, StageOutcome, TranscriptAnalysis};
use crate::errors::{EvergreenError, ValidationError};
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["hook", "sections", "conclusion"],
        "properties": {
            "hook": {"type": "string"},
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["heading", "purpose"],
                    "properties": {
                        "heading": {"type": "string"},
                        "purpose": {"type": "string"},
                        "quote_refs": {"type": "array", "items": {"type": "integer"}}
                    }
                }
            },
            "conclusion": {"type": "string"}
        }
    })
}

fn validator() -> Validator {
    Validator::new("blog_outline")
        .rule(Rule::Required("/hook"))
        .rule(Rule::MinItems("/sections", 2))
        .rule(Rule::EachRequired {
            array: "/sections",
            field: "/heading",
        })
        .rule(Rule::EachRequired {
            array: "/sections",
            field: "/purpose",
        })
        .rule(Rule::Required("/conclusion"))
}

/// Every quote reference must point into the canonical set.
fn check_quote_refs(outline: &BlogOutline, quote_count: usize) -> Result<(), ValidationError> {
    for (i, section) in outline.sections.iter().enumerate() {
        if let Some(bad) = section.quote_refs.iter().find(|&&r| r >= quote_count) {
            return Err(ValidationError::new(
                format!("sections[{i}].quote_refs"),
                format!("references quote {bad} but only {quote_count} exist"),
            ));
        }
    }
    Ok(())
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let crux = episode_crux(&env.ctx, env.id())?;
    let quotes = quote_set(&env.ctx, env.id())?;
    let analysis = require::<TranscriptAnalysis>(&env.ctx, env.id())?;

    let prompt = env.render(
        "blog_outline",
        VarsBuilder::new()
            .set("episode_crux", crux)
            .set("key_themes", format::list(&analysis.key_themes))
            .set("quotes", format::quotes(quotes)),
    )?;

    let (outline, usage): (BlogOutline, _) = env.extract(&prompt, schema(), &validator()).await?;
    check_quote_refs(&outline, quotes.quotes.len())?;

    let text = format::outline(&outline);
    Ok(StageOutcome::with_output(outline).text(text).usage(usage))
}
