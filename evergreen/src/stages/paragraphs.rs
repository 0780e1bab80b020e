//! Stage 4: per-section paragraph plans.

use super::{format, StageEnv};
use crate::context::{episode_crux, quote_set, require};
use crate::core::{BlogOutline, ParagraphDetails, StageOutcome};
use crate::errors::{EvergreenError, ValidationError};
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["paragraphs"],
        "properties": {
            "paragraphs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["section", "key_points"],
                    "properties": {
                        "section": {"type": "string"},
                        "key_points": {"type": "array", "items": {"type": "string"}},
                        "quote_index": {"type": ["integer", "null"]}
                    }
                }
            }
        }
    })
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let crux = episode_crux(&env.ctx, env.id())?;
    let quotes = quote_set(&env.ctx, env.id())?;
    let outline = require::<BlogOutline>(&env.ctx, env.id())?;

    let prompt = env.render(
        "paragraph_details",
        VarsBuilder::new()
            .set("episode_crux", crux)
            .set("outline", format::outline(outline))
            .set("quotes", format::quotes(quotes)),
    )?;

    let validator = Validator::new("paragraph_details")
        .rule(Rule::MinItems("/paragraphs", outline.sections.len()))
        .rule(Rule::EachRequired {
            array: "/paragraphs",
            field: "/section",
        })
        .rule(Rule::EachRequired {
            array: "/paragraphs",
            field: "/key_points",
        });
    let (details, usage): (ParagraphDetails, _) = env.extract(&prompt, schema(), &validator).await?;

    let count = quotes.quotes.len();
    if let Some((i, bad)) = details
        .paragraphs
        .iter()
        .enumerate()
        .find_map(|(i, p)| p.quote_index.filter(|&q| q >= count).map(|q| (i, q)))
    {
        return Err(ValidationError::new(
            format!("paragraphs[{i}].quote_index"),
            format!("references quote {bad} but only {count} exist"),
        )
        .into());
    }

    let text = format::paragraphs(&details);
    Ok(StageOutcome::with_output(details).text(text).usage(usage))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::EvergreenSettings;
    use crate::core::{OutlineSection, Quote, QuoteSet, StageId, StageOutput, TranscriptAnalysis};
    use crate::invoker::{Invocation, MockModelInvoker};
    use std::sync::Arc;

    fn upstream() -> Vec<StageOutput> {
        let section = |h: &str| OutlineSection {
            heading: h.to_string(),
            purpose: "p".to_string(),
            quote_refs: Vec::new(),
        };
        vec![
            StageOutput::TranscriptAnalysis(TranscriptAnalysis {
                episode_crux: "crux".to_string(),
                key_themes: vec!["t".to_string()],
                episode_format: "solo".to_string(),
                target_audience: "a".to_string(),
            }),
            StageOutput::QuoteExtraction(QuoteSet {
                quotes: vec![Quote {
                    text: "q".to_string(),
                    speaker: "s".to_string(),
                    context: None,
                    usage: "email".to_string(),
                }],
            }),
            StageOutput::BlogOutline(BlogOutline {
                hook: "h".to_string(),
                sections: vec![section("One"), section("Two")],
                conclusion: "c".to_string(),
            }),
        ]
    }

    fn env_returning(value: Value) -> StageEnv {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .returning(move |_, _| Ok(Invocation::structured(value.clone())));
        let ctx = context_with(EvergreenSettings::default(), "t", upstream());
        env_for(ctx, StageId::ParagraphDetails, Arc::new(mock))
    }

    #[tokio::test]
    async fn test_one_plan_per_section() {
        let outcome = run(&env_returning(json!({
            "paragraphs": [
                {"section": "One", "key_points": ["a"], "quote_index": 0},
                {"section": "Two", "key_points": ["b"]}
            ]
        })))
        .await
        .unwrap();
        let details: ParagraphDetails = output_of(&outcome);
        assert_eq!(details.paragraphs.len(), 2);
    }

    #[tokio::test]
    async fn test_too_few_plans() {
        let err = run(&env_returning(json!({
            "paragraphs": [{"section": "One", "key_points": ["a"]}]
        })))
        .await
        .unwrap_err();
        assert!(matches!(err, EvergreenError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bad_quote_index() {
        let err = run(&env_returning(json!({
            "paragraphs": [
                {"section": "One", "key_points": ["a"], "quote_index": 4},
                {"section": "Two", "key_points": ["b"]}
            ]
        })))
        .await
        .unwrap_err();
        match err {
            EvergreenError::Validation(v) => assert_eq!(v.field, "paragraphs[0].quote_index"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
