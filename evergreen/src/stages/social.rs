//! Stage 8: social posts for every configured platform.
//!
//! Per-platform mode fans out one generation per platform, each with its own
//! character limit and retry loop. Combined mode asks for every platform in
//! one call and validates each platform's slice of the response.

use super::{format, StageEnv};
use crate::config::{Platform, SocialMode};
use crate::context::{episode_crux, quote_set, require};
use crate::contracts::parse_structured;
use crate::core::{
    HeadlineSet, PlatformPosts, RefinedDraft, SocialContent, SocialPost, StageOutcome,
};
use crate::errors::{EvergreenError, ValidationError};
use crate::ledger::Usage;
use crate::pipeline::{fan_out, Generated};
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, ValidationVerdict, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Every field defaults so that a reply missing one is still parsed and the
// gap is reported by the validator as a soft issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PostBatch {
    #[serde(default)]
    posts: Vec<SocialPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlatformBatch {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    posts: Vec<SocialPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CombinedBatch {
    #[serde(default)]
    platforms: Vec<PlatformBatch>,
}

fn posts_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["text"],
            "properties": {
                "text": {"type": "string"},
                "hashtags": {"type": "array", "items": {"type": "string"}}
            }
        }
    })
}

fn batch_schema() -> Value {
    json!({
        "type": "object",
        "required": ["posts"],
        "properties": {"posts": posts_schema()}
    })
}

fn combined_schema() -> Value {
    json!({
        "type": "object",
        "required": ["platforms"],
        "properties": {
            "platforms": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["platform", "posts"],
                    "properties": {"platform": {"type": "string"}, "posts": posts_schema()}
                }
            }
        }
    })
}

fn platform_validator(platform: Platform, min_posts: usize) -> Validator {
    Validator::new(platform.slug())
        .rule(Rule::MinItems("/posts", min_posts))
        .rule(Rule::EachRequired {
            array: "/posts",
            field: "/text",
        })
        .rule(Rule::EachMaxChars {
            array: "/posts",
            field: "/text",
            max: platform.char_limit(),
        })
}

/// Validates every configured platform's slice of a combined response.
fn check_combined(
    batch: &CombinedBatch,
    platforms: &[Platform],
    min_posts: usize,
) -> ValidationVerdict {
    let mut violations = Vec::new();
    for &platform in platforms {
        match find_batch(batch, platform) {
            Some(found) => {
                let posts = PostBatch {
                    posts: found.posts.clone(),
                };
                violations.extend(
                    platform_validator(platform, min_posts)
                        .check(&posts)
                        .violations
                        .into_iter()
                        .map(|v| ValidationError::new(format!("{platform}.{}", v.field), v.reason)),
                );
            }
            None => violations.push(ValidationError::new(platform.slug(), "no posts returned")),
        }
    }
    ValidationVerdict::from_violations(violations)
}

fn find_batch(batch: &CombinedBatch, platform: Platform) -> Option<&PlatformBatch> {
    batch
        .platforms
        .iter()
        .find(|b| b.platform.trim().eq_ignore_ascii_case(platform.slug()))
}

/// Variables shared by both modes.
fn shared_vars(env: &StageEnv) -> Result<VarsBuilder, EvergreenError> {
    let refined = require::<RefinedDraft>(&env.ctx, env.id())?;
    let headlines = require::<HeadlineSet>(&env.ctx, env.id())?;
    let title = refined
        .articles
        .first()
        .map(|a| a.title.clone())
        .unwrap_or_default();
    Ok(VarsBuilder::new()
        .set("post_count", env.settings().pipeline.min_posts_per_platform)
        .set("episode_crux", episode_crux(&env.ctx, env.id())?)
        .set("article_title", title)
        .set("hooks", format::list(&headlines.social_hooks))
        .set("quotes", format::quotes(quote_set(&env.ctx, env.id())?)))
}

async fn platform_posts(
    env: &StageEnv,
    platform: Platform,
) -> Result<Generated<PlatformPosts>, EvergreenError> {
    let prompt = env.render(
        "social_content",
        shared_vars(env)?
            .set("platform", platform)
            .set("char_limit", platform.char_limit()),
    )?;
    let options = env.options(Some(platform.slug())).with_schema(batch_schema());
    let validator = platform_validator(platform, env.settings().pipeline.min_posts_per_platform);

    let generated = env
        .generation(&options)?
        .run(
            &prompt,
            |inv| parse_structured::<PostBatch>(inv).map_err(|e| e.to_string()),
            |batch| validator.check(batch),
        )
        .await?;

    Ok(Generated {
        value: Some(PlatformPosts {
            platform,
            posts: generated.value.map(|batch| batch.posts).unwrap_or_default(),
            validation_issues: generated.issues.clone(),
        }),
        raw: generated.raw,
        issues: generated.issues,
        attempts: generated.attempts,
        usage: generated.usage,
    })
}

async fn per_platform(
    env: &StageEnv,
) -> Result<(SocialContent, Vec<String>, u32, Usage), EvergreenError> {
    let branches: Vec<_> = env
        .settings()
        .platforms
        .iter()
        .copied()
        .map(|platform| {
            let env = env.clone();
            async move { platform_posts(&env, platform).await }
        })
        .collect();
    let joined = fan_out(branches).await.map_err(|failure| failure.error)?;

    let mut issues = Vec::new();
    let mut attempts = 0;
    let mut platforms = Vec::with_capacity(joined.items.len());
    for generated in joined.items {
        attempts = attempts.max(generated.attempts);
        if let Some(posts) = generated.value {
            let slug = posts.platform.slug();
            issues.extend(generated.issues.iter().map(|i| format!("{slug}: {i}")));
            platforms.push(posts);
        }
    }
    Ok((SocialContent { platforms }, issues, attempts, joined.usage))
}

async fn combined(
    env: &StageEnv,
) -> Result<(SocialContent, Vec<String>, u32, Usage), EvergreenError> {
    let settings = env.settings();
    let configured = settings.platforms.clone();
    let min_posts = settings.pipeline.min_posts_per_platform;
    let limits: Vec<String> = configured
        .iter()
        .map(|p| format!("{p} {} chars", p.char_limit()))
        .collect();
    let names: Vec<String> = configured.iter().map(ToString::to_string).collect();
    let prompt = env.render(
        "social_content_combined",
        shared_vars(env)?
            .set("platforms", names.join(", "))
            .set("limits", limits.join("; ")),
    )?;
    let options = env.options(None).with_schema(combined_schema());

    let generated = env
        .generation(&options)?
        .run(
            &prompt,
            |inv| parse_structured::<CombinedBatch>(inv).map_err(|e| e.to_string()),
            |batch| check_combined(batch, &configured, min_posts),
        )
        .await?;

    let platforms = configured
        .iter()
        .map(|&platform| {
            let nested = format!("'{platform}.");
            let whole = format!("'{platform}'");
            PlatformPosts {
                platform,
                posts: generated
                    .value
                    .as_ref()
                    .and_then(|batch| find_batch(batch, platform))
                    .map(|b| b.posts.clone())
                    .unwrap_or_default(),
                validation_issues: generated
                    .issues
                    .iter()
                    .filter(|i| i.contains(&nested) || i.contains(&whole))
                    .cloned()
                    .collect(),
            }
        })
        .collect();
    Ok((
        SocialContent { platforms },
        generated.issues,
        generated.attempts,
        generated.usage,
    ))
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let (content, issues, attempts, usage) = match env.settings().social_mode {
        SocialMode::PerPlatform => per_platform(env).await?,
        SocialMode::Combined => combined(env).await?,
    };

    let text = content
        .platforms
        .iter()
        .flat_map(|p| p.posts.iter().map(move |post| format!("[{}] {}", p.platform, post.text)))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(StageOutcome::with_output(content)
        .text(text)
        .usage(usage)
        .issues(issues)
        .attempts(attempts))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::EvergreenSettings;
    use crate::core::{Article, Quote, QuoteSet, StageId, StageOutput, TranscriptAnalysis};
    use crate::invoker::{Invocation, MockModelInvoker};
    use std::sync::Arc;

    fn upstream() -> Vec<StageOutput> {
        vec![
            StageOutput::TranscriptAnalysis(TranscriptAnalysis {
                episode_crux: "crux".to_string(),
                key_themes: Vec::new(),
                episode_format: "solo".to_string(),
                target_audience: "a".to_string(),
            }),
            StageOutput::QuoteExtraction(QuoteSet {
                quotes: vec![Quote {
                    text: "q".to_string(),
                    speaker: "s".to_string(),
                    context: None,
                    usage: "social".to_string(),
                }],
            }),
            StageOutput::Headlines(HeadlineSet {
                headlines: vec!["H".to_string()],
                subheadings: Vec::new(),
                social_hooks: vec!["hook".to_string()],
            }),
            StageOutput::Refinement(RefinedDraft {
                articles: vec![Article::from_markdown("# Final Title\nbody", None)],
            }),
        ]
    }

    fn posts(n: usize, len: usize) -> Value {
        let items: Vec<Value> = (0..n).map(|_| json!({"text": "x".repeat(len)})).collect();
        json!({ "posts": items })
    }

    fn settings(platforms: Vec<Platform>) -> EvergreenSettings {
        EvergreenSettings::default().with_platforms(platforms)
    }

    #[tokio::test]
    async fn test_per_platform_fan_out() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .withf(|prompt, options| {
                options.tag.starts_with("social_content:") && prompt.contains("Final Title")
            })
            .times(2)
            .returning(|_, _| Ok(Invocation::structured(posts(5, 100)).with_usage(10, 10, 0.001)));
        let s = settings(vec![Platform::LinkedIn, Platform::Twitter]);
        let ctx = context_with(s, "t", upstream());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let content: SocialContent = output_of(&outcome);
        assert_eq!(content.platforms.len(), 2);
        assert_eq!(content.platforms[0].platform, Platform::LinkedIn);
        assert_eq!(content.for_platform(Platform::Twitter).unwrap().posts.len(), 5);
        assert!(outcome.validation_issues.unwrap().is_empty());
        assert_eq!(outcome.input_tokens, Some(20));
    }

    #[tokio::test]
    async fn test_over_limit_posts_are_retried_then_tolerated() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_, _| Ok(Invocation::structured(posts(5, 400))));
        let mut s = settings(vec![Platform::Twitter]);
        s.pipeline.stop_on_stagnation = false;
        let ctx = context_with(s, "t", upstream());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let content: SocialContent = output_of(&outcome);
        let twitter = content.for_platform(Platform::Twitter).unwrap();
        assert_eq!(twitter.validation_issues.len(), 1);
        assert!(outcome.validation_issues.unwrap()[0].starts_with("twitter: "));
        assert_eq!(outcome.attempts, Some(2));
    }

    #[tokio::test]
    async fn test_combined_mode_single_call() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .withf(|_, options| options.tag == "social_content")
            .times(1)
            .returning(|_, _| {
                let five = posts(5, 50)["posts"].clone();
                Ok(Invocation::structured(json!({
                    "platforms": [
                        {"platform": "Twitter", "posts": five},
                        {"platform": "linkedin", "posts": five}
                    ]
                })))
            });
        let s = settings(vec![Platform::LinkedIn, Platform::Twitter])
            .with_social_mode(SocialMode::Combined);
        let ctx = context_with(s, "t", upstream());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let content: SocialContent = output_of(&outcome);
        let order: Vec<Platform> = content.platforms.iter().map(|p| p.platform).collect();
        assert_eq!(order, vec![Platform::LinkedIn, Platform::Twitter]);
        assert!(content.platforms.iter().all(|p| p.posts.len() == 5));
    }

    #[tokio::test]
    async fn test_posts_without_text_are_soft_issues() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke().times(2).returning(|_, _| {
            let items: Vec<Value> = (0..5).map(|_| json!({"hashtags": ["soil"]})).collect();
            Ok(Invocation::structured(json!({ "posts": items })))
        });
        let mut s = settings(vec![Platform::Threads]);
        s.pipeline.stop_on_stagnation = false;
        let ctx = context_with(s, "t", upstream());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let content: SocialContent = output_of(&outcome);
        let threads = content.for_platform(Platform::Threads).unwrap();
        assert_eq!(threads.posts.len(), 5);
        assert!(!threads.validation_issues.is_empty());
        assert!(outcome.validation_issues.unwrap()[0].starts_with("threads: "));
    }

    #[tokio::test]
    async fn test_unparseable_platform_reply_keeps_run_alive() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_, _| Ok(Invocation::text("no json here")));
        let mut s = settings(vec![Platform::Twitter]);
        s.pipeline.stop_on_stagnation = false;
        let ctx = context_with(s, "t", upstream());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(mock));

        let outcome = run(&env).await.unwrap();
        let content: SocialContent = output_of(&outcome);
        let twitter = content.for_platform(Platform::Twitter).unwrap();
        assert!(twitter.posts.is_empty());
        assert!(twitter.validation_issues[0].starts_with("response could not be parsed"));
        let issues = outcome.validation_issues.unwrap();
        assert!(issues[0].starts_with("twitter: response could not be parsed"));
    }

    #[test]
    fn test_check_combined_reports_missing_platform() {
        let batch = CombinedBatch {
            platforms: vec![PlatformBatch {
                platform: "twitter".to_string(),
                posts: Vec::new(),
            }],
        };
        let verdict = check_combined(&batch, &[Platform::Twitter, Platform::Threads], 5);
        assert!(!verdict.valid);
        assert_eq!(verdict.violations[0].field, "twitter.posts");
        assert_eq!(verdict.violations[1].field, "threads");
    }
}
