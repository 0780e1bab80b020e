//! Stage 7: editorial refinement of every drafted article.

use super::draft::{article_validator, collect_articles, parse_article};
use super::StageEnv;
use crate::context::{episode_crux, require};
use crate::core::{Article, DraftSet, RefinedDraft, StageOutcome};
use crate::errors::EvergreenError;
use crate::ledger::Usage;
use crate::pipeline::{fan_out, Generated};
use crate::prompts::VarsBuilder;

async fn refine_article(
    env: &StageEnv,
    draft: Article,
) -> Result<Generated<Article>, EvergreenError> {
    let settings = env.settings();
    let prompt = env.render(
        "refinement",
        VarsBuilder::new()
            .set("episode_crux", episode_crux(&env.ctx, env.id())?)
            .set("min_headings", settings.pipeline.min_section_headings)
            .set("min_words", settings.pipeline.min_draft_words)
            .set("draft", &draft.body_markdown),
    )?;

    let angle = draft.angle.as_deref();
    let options = env.options(angle);
    let validator = article_validator(settings);
    env.generation(&options)?
        .run(&prompt, |inv| parse_article(inv, angle), |article| validator.check(article))
        .await
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let drafts = require::<DraftSet>(&env.ctx, env.id())?;
    let labels: Vec<Option<String>> = drafts.articles.iter().map(|a| a.angle.clone()).collect();

    let branches: Vec<_> = drafts
        .articles
        .iter()
        .cloned()
        .map(|draft| {
            let env = env.clone();
            async move { refine_article(&env, draft).await }
        })
        .collect();
    let joined = fan_out(branches).await.map_err(|failure| failure.error)?;
    let usage: Usage = joined.usage;

    let (articles, issues, attempts) = collect_articles(joined, &labels);
    let text = articles.first().map(|a| a.body_markdown.clone()).unwrap_or_default();
    Ok(StageOutcome::with_output(RefinedDraft { articles })
        .text(text)
        .usage(usage)
        .issues(issues)
        .attempts(attempts))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::{EvergreenSettings, PipelineSettings};
    use crate::core::{StageId, StageOutput, TranscriptAnalysis};
    use crate::invoker::{Invocation, MockModelInvoker};
    use std::sync::Arc;

    const REFINED: &str = "# Better Title\n\n## One\none two three four\n\n## Two\nfive six seven eight";

    fn upstream(articles: Vec<Article>) -> Vec<StageOutput> {
        vec![
            StageOutput::TranscriptAnalysis(TranscriptAnalysis {
                episode_crux: "crux".to_string(),
                key_themes: Vec::new(),
                episode_format: "solo".to_string(),
                target_audience: "a".to_string(),
            }),
            StageOutput::DraftGeneration(DraftSet { articles }),
        ]
    }

    fn settings() -> EvergreenSettings {
        EvergreenSettings::default().with_pipeline(PipelineSettings {
            min_draft_words: 10,
            ..PipelineSettings::default()
        })
    }

    #[tokio::test]
    async fn test_refines_each_article_keeping_angle() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .withf(|prompt, _| prompt.contains("DRAFT-BODY"))
            .times(2)
            .returning(|_, _| Ok(Invocation::text(REFINED)));
        let drafts = vec![
            Article::from_markdown("# A\nDRAFT-BODY", Some("narrative".to_string())),
            Article::from_markdown("# B\nDRAFT-BODY", Some("practical".to_string())),
        ];
        let ctx = context_with(settings(), "t", upstream(drafts));
        let env = env_for(ctx, StageId::Refinement, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let refined: RefinedDraft = output_of(&outcome);
        assert_eq!(refined.articles.len(), 2);
        assert_eq!(refined.articles[0].title, "Better Title");
        assert_eq!(refined.articles[1].angle.as_deref(), Some("practical"));
    }

    #[tokio::test]
    async fn test_requires_draft() {
        let ctx = context_with(settings(), "t", Vec::new());
        let env = env_for(ctx, StageId::Refinement, Arc::new(MockModelInvoker::new()));
        assert!(matches!(run(&env).await, Err(EvergreenError::Processing(_))));
    }
}
