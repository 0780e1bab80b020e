//! Stage 2: quote extraction, producer of the canonical quote set.

use super::StageEnv;
use crate::core::{QuoteSet, StageOutcome};
use crate::errors::EvergreenError;
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Allowed values of a quote's `usage`.
pub const QUOTE_USAGES: &[&str] = &["headline", "pull_quote", "social", "email"];

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["quotes"],
        "properties": {
            "quotes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["text", "speaker", "usage"],
                    "properties": {
                        "text": {"type": "string"},
                        "speaker": {"type": "string"},
                        "context": {"type": "string"},
                        "usage": {"type": "string", "enum": QUOTE_USAGES}
                    }
                }
            }
        }
    })
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let pipeline = &env.settings().pipeline;
    let transcript = env.ctx.working_transcript();
    let prompt = env.render(
        "quote_extraction",
        VarsBuilder::new()
            .set("quote_min", pipeline.quote_min)
            .set("quote_max", pipeline.quote_max)
            .set("usages", QUOTE_USAGES.join(", "))
            .set("transcript", transcript),
    )?;

    let validator = Validator::new("quote_extraction")
        .rule(Rule::MinItems("/quotes", pipeline.quote_min))
        .rule(Rule::EachRequired {
            array: "/quotes",
            field: "/text",
        })
        .rule(Rule::EachRequired {
            array: "/quotes",
            field: "/speaker",
        })
        .rule(Rule::EachOneOf {
            array: "/quotes",
            field: "/usage",
            allowed: QUOTE_USAGES,
        });
    let (mut set, usage): (QuoteSet, _) = env.extract(&prompt, schema(), &validator).await?;

    if set.quotes.len() > pipeline.quote_max {
        info!(
            run_id = %env.run_id(),
            returned = set.quotes.len(),
            kept = pipeline.quote_max,
            "Truncating quote set"
        );
        set.quotes.truncate(pipeline.quote_max);
    }

    let haystack = normalize(transcript);
    let paraphrased = set
        .quotes
        .iter()
        .filter(|q| !haystack.contains(&normalize(&q.text)))
        .count();
    if paraphrased > 0 {
        warn!(run_id = %env.run_id(), paraphrased, "Quotes not found verbatim in transcript");
    }

    let text = set
        .quotes
        .iter()
        .map(|q| format!("\"{}\" - {}", q.text, q.speaker))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(StageOutcome::with_output(set).text(text).usage(usage))
}
