//! Stage 9: newsletter email promoting the refined article.

use super::StageEnv;
use crate::context::{episode_crux, require};
use crate::contracts::parse_structured;
use crate::core::{EmailCampaign, RefinedDraft, StageOutcome};
use crate::errors::EvergreenError;
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};

const MIN_SUBJECT_LINES: usize = 3;
const MAX_PREVIEW_CHARS: usize = 150;
const MIN_BODY_WORDS: usize = 50;
const EXCERPT_WORDS: usize = 120;

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["subject_lines", "preview_text", "body"],
        "properties": {
            "subject_lines": {"type": "array", "items": {"type": "string"}},
            "preview_text": {"type": "string"},
            "body": {"type": "string"}
        }
    })
}

fn validator() -> Validator {
    Validator::new("email_campaign")
        .rule(Rule::MinItems("/subject_lines", MIN_SUBJECT_LINES))
        .rule(Rule::Required("/preview_text"))
        .rule(Rule::MaxChars("/preview_text", MAX_PREVIEW_CHARS))
        .rule(Rule::MinWords("/body", MIN_BODY_WORDS))
}

fn excerpt(markdown: &str, words: usize) -> String {
    markdown.split_whitespace().take(words).collect::<Vec<_>>().join(" ")
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let refined = require::<RefinedDraft>(&env.ctx, env.id())?;
    let (title, body) = refined
        .articles
        .first()
        .map(|a| (a.title.as_str(), a.body_markdown.as_str()))
        .unwrap_or_default();

    let prompt = env.render(
        "email_campaign",
        VarsBuilder::new()
            .set("article_title", title)
            .set("episode_crux", episode_crux(&env.ctx, env.id())?)
            .set("article_excerpt", excerpt(body, EXCERPT_WORDS)),
    )?;
    let options = env.options(None).with_schema(schema());
    let validator = validator();

    let generated = env
        .generation(&options)?
        .run(
            &prompt,
            |inv| parse_structured::<EmailCampaign>(inv).map_err(|e| e.to_string()),
            |email| validator.check(email),
        )
        .await?;

    let outcome = match generated.value {
        Some(campaign) => {
            let text = campaign.body.clone();
            StageOutcome::with_output(campaign).text(text)
        }
        None => StageOutcome::default().text(generated.raw),
    };
    Ok(outcome
        .usage(generated.usage)
        .issues(generated.issues)
        .attempts(generated.attempts))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::EvergreenSettings;
    use crate::core::{Article, StageId, StageOutput, TranscriptAnalysis};
    use crate::invoker::{Invocation, MockModelInvoker};
    use mockall::Sequence;
    use std::sync::Arc;

    fn upstream() -> Vec<StageOutput> {
        vec![
            StageOutput::TranscriptAnalysis(TranscriptAnalysis {
                episode_crux: "crux".to_string(),
                key_themes: Vec::new(),
                episode_format: "solo".to_string(),
                target_audience: "a".to_string(),
            }),
            StageOutput::Refinement(RefinedDraft {
                articles: vec![Article::from_markdown("# The Article\nopening words", None)],
            }),
        ]
    }

    fn email(body_words: usize) -> Value {
        json!({
            "subject_lines": ["a", "b", "c"],
            "preview_text": "preview",
            "body": "word ".repeat(body_words)
        })
    }

    #[tokio::test]
    async fn test_short_body_retried_then_valid() {
        let mut mock = MockModelInvoker::new();
        let mut seq = Sequence::new();
        mock.expect_invoke()
            .withf(|prompt, _| prompt.contains("The Article") && prompt.contains("opening words"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Invocation::structured(email(10))));
        mock.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Invocation::structured(email(80))));
        let ctx = context_with(EvergreenSettings::default(), "t", upstream());
        let env = env_for(ctx, StageId::EmailCampaign, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        assert!(outcome.validation_issues.as_ref().unwrap().is_empty());
        assert_eq!(outcome.attempts, Some(2));
        let campaign: EmailCampaign = output_of(&outcome);
        assert_eq!(campaign.subject_lines.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_preview_text_is_a_soft_issue() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke().times(2).returning(|_, _| {
            let mut reply = email(80);
            reply.as_object_mut().unwrap().remove("preview_text");
            Ok(Invocation::structured(reply))
        });
        let ctx = context_with(EvergreenSettings::default(), "t", upstream());
        let env = env_for(ctx, StageId::EmailCampaign, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let issues = outcome.validation_issues.clone().unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("preview_text"));
        let campaign: EmailCampaign = output_of(&outcome);
        assert!(campaign.preview_text.is_empty());
        assert_eq!(campaign.subject_lines.len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_reply_keeps_raw_text() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_, _| Ok(Invocation::text("Sorry, I can only answer in prose today.")));
        let mut settings = EvergreenSettings::default();
        settings.pipeline.stop_on_stagnation = false;
        let ctx = context_with(settings, "t", upstream());
        let env = env_for(ctx, StageId::EmailCampaign, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        assert!(outcome.output_data.is_none());
        assert_eq!(
            outcome.output_text.as_deref(),
            Some("Sorry, I can only answer in prose today.")
        );
        let issues = outcome.validation_issues.unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("response could not be parsed"));
        assert_eq!(outcome.attempts, Some(2));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("a  b\nc d", 3), "a b c");
    }
}
