//! Typed output shapes, one per stage.
//!
//! Required fields carry no serde default, so a structured response missing
//! one fails deserialization instead of silently producing an empty value.

use crate::config::Platform;
use crate::validation::{count_words, markdown_title};
use serde::{Deserialize, Serialize};

/// Output of the preprocessing stage.
///
/// Every compressed field is `None` when the gate decided compression was
/// not needed. The compressed narrative is a reading aid only and never
/// stands in for the canonical episode crux.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessedTranscript {
    /// Condensed narrative preserving all salient facts.
    pub comprehensive_summary: Option<String>,
    /// Topics discussed, in order of appearance.
    pub key_topics: Option<Vec<String>>,
    /// Identified speakers.
    pub speakers: Option<Vec<Speaker>>,
    /// Coarse episode metadata.
    pub episode_metadata: Option<EpisodeMetadata>,
    /// Estimated token count of the raw transcript.
    #[serde(default)]
    pub original_tokens: usize,
    /// Always `false`: the compressed output is not a canonical artifact.
    #[serde(default)]
    pub canonical: bool,
}

impl PreprocessedTranscript {
    /// Output for a transcript that did not need compression.
    #[must_use]
    pub fn skipped(original_tokens: usize) -> Self {
        Self {
            original_tokens,
            ..Self::default()
        }
    }

    /// Returns true if a compressed narrative is available.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.comprehensive_summary.is_some()
    }
}

/// A speaker identified in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    /// Name or label.
    pub name: String,
    /// Role in the conversation (host, guest, ...).
    #[serde(default)]
    pub role: Option<String>,
}

/// Coarse episode metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Conversation format (interview, panel, solo, ...).
    #[serde(default)]
    pub format: Option<String>,
    /// Main subject of the episode.
    #[serde(default)]
    pub primary_subject: Option<String>,
    /// Estimated length in minutes.
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
}

/// Output of transcript analysis. Owns the canonical episode crux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAnalysis {
    /// The distilled core message of the episode.
    pub episode_crux: String,
    /// Recurring themes.
    pub key_themes: Vec<String>,
    /// Episode format, one of a fixed vocabulary.
    pub episode_format: String,
    /// Who the content is for.
    pub target_audience: String,
}

/// A verbatim quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Exact words from the transcript.
    pub text: String,
    /// Who said it.
    pub speaker: String,
    /// Short framing for the quote.
    #[serde(default)]
    pub context: Option<String>,
    /// Intended use, one of a fixed vocabulary.
    pub usage: String,
}

/// Output of quote extraction. The canonical quote set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSet {
    /// Quotes in transcript order.
    pub quotes: Vec<Quote>,
}

/// One section of the blog outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    /// Section heading.
    pub heading: String,
    /// What the section has to accomplish.
    pub purpose: String,
    /// Indices into the canonical quote set.
    #[serde(default)]
    pub quote_refs: Vec<usize>,
}

/// Output of the blog outline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogOutline {
    /// Opening hook.
    pub hook: String,
    /// Ordered sections.
    pub sections: Vec<OutlineSection>,
    /// Closing thought.
    pub conclusion: String,
}

/// Paragraph plan for one outline section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphPlan {
    /// Heading of the outline section this plan belongs to.
    pub section: String,
    /// Points the paragraphs must make.
    pub key_points: Vec<String>,
    /// Optional index into the canonical quote set.
    #[serde(default)]
    pub quote_index: Option<usize>,
}

/// Output of the paragraph details stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphDetails {
    /// One plan per outline section.
    pub paragraphs: Vec<ParagraphPlan>,
}

/// Output of the headlines stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlineSet {
    /// Candidate article titles.
    pub headlines: Vec<String>,
    /// Candidate subheadings.
    #[serde(default)]
    pub subheadings: Vec<String>,
    /// Short social hooks.
    #[serde(default)]
    pub social_hooks: Vec<String>,
}

/// A long-form article in markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Title, mirrored from the leading `#` line of the body.
    pub title: String,
    /// Full markdown body.
    pub body_markdown: String,
    /// Word count of the body.
    pub word_count: usize,
    /// Editorial angle for dual-article drafting.
    #[serde(default)]
    pub angle: Option<String>,
}

impl Article {
    /// Builds an article from markdown, taking the title from the leading
    /// `#` line. The title is empty if there is none.
    #[must_use]
    pub fn from_markdown(body: &str, angle: Option<String>) -> Self {
        let body = strip_fence(body.trim());
        Self {
            title: markdown_title(body).unwrap_or_default().to_string(),
            body_markdown: body.to_string(),
            word_count: count_words(body),
            angle,
        }
    }
}

/// Removes a ```markdown fence wrapped around the whole body.
fn strip_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return body;
    };
    match inner.split_once('\n') {
        Some((_lang, content)) => content.trim(),
        None => body,
    }
}

/// Output of draft generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSet {
    /// One article in single mode, two in dual mode.
    pub articles: Vec<Article>,
}

/// Output of the refinement pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedDraft {
    /// Refined articles, parallel to the draft set.
    pub articles: Vec<Article>,
}

/// One social post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPost {
    /// Post copy.
    #[serde(default)]
    pub text: String,
    /// Hashtags without the leading `#`.
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// Posts generated for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPosts {
    /// Target platform.
    pub platform: Platform,
    /// Generated posts.
    pub posts: Vec<SocialPost>,
    /// Soft-validation issues left after retries.
    #[serde(default)]
    pub validation_issues: Vec<String>,
}

/// Output of the social content stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialContent {
    /// One entry per configured platform.
    pub platforms: Vec<PlatformPosts>,
}

impl SocialContent {
    /// Returns the posts for a platform, if generated.
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> Option<&PlatformPosts> {
        self.platforms.iter().find(|p| p.platform == platform)
    }
}

/// Output of the email campaign stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCampaign {
    /// Candidate subject lines.
    #[serde(default)]
    pub subject_lines: Vec<String>,
    /// Inbox preview text.
    #[serde(default)]
    pub preview_text: String,
    /// Email body in markdown.
    #[serde(default)]
    pub body: String,
}
