//! Stage 6: long-form draft.
//!
//! Single mode writes one article. Dual mode writes two articles from
//! different angles concurrently; each branch runs its own retry loop.

use super::{format, StageEnv};
use crate::config::{DraftMode, EvergreenSettings};
use crate::context::{episode_crux, quote_set, require};
use crate::core::{Article, BlogOutline, DraftSet, HeadlineSet, ParagraphDetails, StageOutcome};
use crate::errors::EvergreenError;
use crate::invoker::Invocation;
use crate::pipeline::{fan_out, Generated, Joined};
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};

/// Angles used in dual mode, in output order.
pub const DUAL_ANGLES: [&str; 2] = ["narrative", "practical"];

/// Structural bar every article has to clear.
pub(super) fn article_validator(settings: &EvergreenSettings) -> Validator {
    let pipeline = &settings.pipeline;
    Validator::new("article")
        .rule(Rule::MarkdownTitle("/body_markdown"))
        .rule(Rule::MinHeadings("/body_markdown", pipeline.min_section_headings))
        .rule(Rule::MinWords("/body_markdown", pipeline.min_draft_words))
}

pub(super) fn parse_article(
    invocation: &Invocation,
    angle: Option<&str>,
) -> Result<Article, String> {
    let text = invocation.as_text();
    if text.trim().is_empty() {
        return Err("empty response".to_string());
    }
    Ok(Article::from_markdown(&text, angle.map(str::to_string)))
}

/// Flattens per-article generations into articles, prefixed issues and the
/// highest attempt count. `angles` runs parallel to the branches. A branch
/// whose reply never parsed contributes its issues but no article.
pub(super) fn collect_articles(
    joined: Joined<Generated<Article>>,
    angles: &[Option<String>],
) -> (Vec<Article>, Vec<String>, u32) {
    let mut articles = Vec::with_capacity(joined.items.len());
    let mut issues = Vec::new();
    let mut attempts = 0;
    for (generated, angle) in joined.items.into_iter().zip(angles) {
        attempts = attempts.max(generated.attempts);
        issues.extend(generated.issues.iter().map(|issue| match angle {
            Some(angle) => format!("{angle}: {issue}"),
            None => issue.clone(),
        }));
        articles.extend(generated.value);
    }
    (articles, issues, attempts)
}

async fn write_article(
    env: &StageEnv,
    n: usize,
    angle: Option<&'static str>,
) -> Result<Generated<Article>, EvergreenError> {
    let settings = env.settings();
    let headlines = require::<HeadlineSet>(&env.ctx, env.id())?;
    let prompt = env.render(
        "draft_generation",
        VarsBuilder::new()
            .set("angle", angle.unwrap_or("balanced"))
            .set("headline", format::headline(Some(headlines), n))
            .set("episode_crux", episode_crux(&env.ctx, env.id())?)
            .set("outline", format::outline(require::<BlogOutline>(&env.ctx, env.id())?))
            .set("paragraphs", format::paragraphs(require::<ParagraphDetails>(&env.ctx, env.id())?))
            .set("quotes", format::quotes(quote_set(&env.ctx, env.id())?))
            .set("min_headings", settings.pipeline.min_section_headings)
            .set("min_words", settings.pipeline.min_draft_words),
    )?;

    let options = env.options(angle);
    let validator = article_validator(settings);
    env.generation(&options)?
        .run(&prompt, |inv| parse_article(inv, angle), |article| validator.check(article))
        .await
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let angles: Vec<Option<&'static str>> = match env.settings().draft_mode {
        DraftMode::Single => vec![None],
        DraftMode::Dual => DUAL_ANGLES.iter().copied().map(Some).collect(),
    };
    let labels: Vec<Option<String>> = angles.iter().map(|a| a.map(str::to_string)).collect();

    let branches: Vec<_> = angles
        .into_iter()
        .enumerate()
        .map(|(n, angle)| {
            let env = env.clone();
            async move { write_article(&env, n, angle).await }
        })
        .collect();
    let joined = fan_out(branches).await.map_err(|failure| failure.error)?;
    let usage = joined.usage;

    let (articles, issues, attempts) = collect_articles(joined, &labels);
    let text = articles.first().map(|a| a.body_markdown.clone()).unwrap_or_default();
    Ok(StageOutcome::with_output(DraftSet { articles })
        .text(text)
        .usage(usage)
        .issues(issues)
        .attempts(attempts))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::PipelineSettings;
    use crate::core::{OutlineSection, Quote, QuoteSet, StageId, StageOutput, TranscriptAnalysis};
    use crate::invoker::MockModelInvoker;
    use std::sync::Arc;

    fn small_bar() -> EvergreenSettings {
        EvergreenSettings::default().with_pipeline(PipelineSettings {
            min_draft_words: 10,
            ..PipelineSettings::default()
        })
    }

    fn upstream() -> Vec<StageOutput> {
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
                    usage: "pull_quote".to_string(),
                }],
            }),
            StageOutput::BlogOutline(BlogOutline {
                hook: "h".to_string(),
                sections: vec![OutlineSection {
                    heading: "One".to_string(),
                    purpose: "p".to_string(),
                    quote_refs: vec![0],
                }],
                conclusion: "c".to_string(),
            }),
            StageOutput::ParagraphDetails(ParagraphDetails { paragraphs: Vec::new() }),
            StageOutput::Headlines(HeadlineSet {
                headlines: vec!["First Title".to_string(), "Second Title".to_string()],
                ..HeadlineSet::default()
            }),
        ]
    }

    const GOOD: &str = "# Title\n\n## One\nalpha beta gamma delta\n\n## Two\nepsilon zeta eta theta iota";

    #[tokio::test]
    async fn test_single_mode_one_article() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .withf(|prompt, options| {
                prompt.contains("First Title") && options.tag == "draft_generation"
            })
            .times(1)
            .returning(|_, _| Ok(Invocation::text(GOOD).with_usage(100, 50, 0.01)));
        let ctx = context_with(small_bar(), "t", upstream());
        let env = env_for(ctx, StageId::DraftGeneration, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let drafts: DraftSet = output_of(&outcome);
        assert_eq!(drafts.articles.len(), 1);
        assert_eq!(drafts.articles[0].title, "Title");
        assert!(outcome.validation_issues.unwrap().is_empty());
        assert_eq!(outcome.attempts, Some(1));
    }

    #[tokio::test]
    async fn test_dual_mode_two_angles() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_, _| Ok(Invocation::text(GOOD).with_usage(100, 50, 0.01)));
        let settings = small_bar().with_draft_mode(DraftMode::Dual);
        let ctx = context_with(settings, "t", upstream());
        let env = env_for(ctx, StageId::DraftGeneration, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let drafts: DraftSet = output_of(&outcome);
        let angles: Vec<_> = drafts.articles.iter().map(|a| a.angle.clone().unwrap()).collect();
        assert_eq!(angles, vec!["narrative", "practical"]);
        assert_eq!(outcome.input_tokens, Some(200));
    }

    #[tokio::test]
    async fn test_short_draft_kept_with_issues() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_, _| Ok(Invocation::text("# Title\nshort")));
        let settings = small_bar().with_pipeline(PipelineSettings {
            min_draft_words: 10,
            stop_on_stagnation: false,
            ..PipelineSettings::default()
        });
        let ctx = context_with(settings, "t", upstream());
        let env = env_for(ctx, StageId::DraftGeneration, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let issues = outcome.validation_issues.unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(outcome.attempts, Some(2));
    }
}
