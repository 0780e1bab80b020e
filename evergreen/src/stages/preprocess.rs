//! Stage 0: size gate and transcript compression.

use super::StageEnv;
use crate::contracts::parse_structured;
use crate::core::{PreprocessedTranscript, StageOutcome};
use crate::errors::{EvergreenError, ValidationError};
use crate::gate::PreprocessingGate;
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};
use tracing::info;

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["comprehensive_summary", "key_topics"],
        "properties": {
            "comprehensive_summary": {"type": "string"},
            "key_topics": {"type": "array", "items": {"type": "string"}},
            "speakers": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {"name": {"type": "string"}, "role": {"type": "string"}}
                }
            },
            "episode_metadata": {
                "type": "object",
                "properties": {
                    "format": {"type": "string"},
                    "primary_subject": {"type": "string"},
                    "estimated_duration_minutes": {"type": "integer"}
                }
            }
        }
    })
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let pipeline = &env.settings().pipeline;
    let decision = PreprocessingGate::from_settings(pipeline).evaluate(&env.ctx.raw_transcript);

    if !decision.needed {
        info!(
            run_id = %env.run_id(),
            estimated_tokens = decision.estimated_tokens,
            threshold_tokens = decision.threshold_tokens,
            "Transcript under threshold, skipping compression"
        );
        return Ok(StageOutcome::skipped(PreprocessedTranscript::skipped(
            decision.estimated_tokens,
        )));
    }

    info!(
        run_id = %env.run_id(),
        estimated_tokens = decision.estimated_tokens,
        "Compressing transcript"
    );
    let prompt = env.render(
        "preprocessing",
        VarsBuilder::new()
            .set("min_chars", pipeline.min_compressed_chars)
            .set("min_topics", pipeline.min_compressed_topics)
            .set("transcript", &env.ctx.raw_transcript),
    )?;
    let options = env.options(None).with_schema(schema());
    let invocation = env.invoker()?.invoke(&prompt, &options).await?;

    let mut compressed: PreprocessedTranscript = parse_structured(&invocation).map_err(|e| {
        ValidationError::new(
            "preprocessing",
            format!("response is not valid structured output: {e}"),
        )
    })?;
    compressed.original_tokens = decision.estimated_tokens;
    compressed.canonical = false;

    Validator::new("preprocessing")
        .rule(Rule::MinChars("/comprehensive_summary", pipeline.min_compressed_chars))
        .rule(Rule::MinItems("/key_topics", pipeline.min_compressed_topics))
        .enforce(&compressed)?;

    let text = compressed.comprehensive_summary.clone().unwrap_or_default();
    Ok(StageOutcome::with_output(compressed)
        .text(text)
        .usage(invocation.usage()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::{EvergreenSettings, PipelineSettings};
    use crate::core::StageId;
    use crate::invoker::{Invocation, MockModelInvoker};
    use std::sync::Arc;

    fn small_threshold() -> EvergreenSettings {
        EvergreenSettings::default().with_pipeline(PipelineSettings {
            preprocess_threshold_tokens: 10,
            ..PipelineSettings::default()
        })
    }

    #[tokio::test]
    async fn test_under_threshold_skips_without_calling_model() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke().never();
        let ctx = context_with(EvergreenSettings::default(), "a short transcript", Vec::new());
        let env = env_for(ctx, StageId::Preprocessing, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        assert!(outcome.skipped);
        let output: PreprocessedTranscript = output_of(&outcome);
        assert!(output.comprehensive_summary.is_none());
        assert!(output.key_topics.is_none());
        assert!(output.speakers.is_none());
        assert!(output.episode_metadata.is_none());
    }

    #[tokio::test]
    async fn test_over_threshold_compresses_whole_transcript() {
        let transcript = "word ".repeat(200);
        let expected_tail = transcript.trim_end().to_string();
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .withf(move |prompt, _| prompt.contains(&expected_tail))
            .times(1)
            .returning(|_, _| {
                Ok(Invocation::structured(json!({
                    "comprehensive_summary": "s".repeat(600),
                    "key_topics": ["a", "b", "c", "d", "e"],
                    "speakers": [{"name": "Host", "role": "host"}],
                    "episode_metadata": {"format": "interview"}
                }))
                .with_usage(400, 200, 0.01))
            });
        let ctx = context_with(small_threshold(), &transcript, Vec::new());
        let env = env_for(ctx, StageId::Preprocessing, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        assert!(!outcome.skipped);
        let output: PreprocessedTranscript = output_of(&outcome);
        assert!(output.comprehensive_summary.unwrap().len() >= 500);
        assert_eq!(output.key_topics.unwrap().len(), 5);
        assert!(!output.canonical);
        assert_eq!(outcome.input_tokens, Some(400));
    }

    #[tokio::test]
    async fn test_compression_below_minimum_is_hard_failure() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke().times(1).returning(|_, _| {
            Ok(Invocation::structured(json!({
                "comprehensive_summary": "too short",
                "key_topics": ["a", "b", "c", "d", "e"]
            })))
        });
        let ctx = context_with(small_threshold(), &"word ".repeat(200), Vec::new());
        let env = env_for(ctx, StageId::Preprocessing, Arc::new(mock));

        let err = run(&env).await.unwrap_err();
        match err {
            EvergreenError::Validation(v) => assert_eq!(v.field, "comprehensive_summary"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
