//! Minimal built-in templates so the pipeline runs without a template
//! directory. Wording is deliberately plain; deployments supply their own.

use super::TemplateSource;
use crate::errors::EvergreenError;

const VOICE: &str = "You write for {{brand_name}}. Tone: {{tone}}. Audience: {{audience}}. Avoid: {{avoid}}.";

const PREPROCESSING: &str = "{{voice}}

Condense the transcript below into a faithful narrative. Keep every salient
fact, name, number and claim; drop filler and repetition. Read all of it.

Return JSON with:
- comprehensive_summary: narrative of at least {{min_chars}} characters
- key_topics: at least {{min_topics}} topics in order of appearance
- speakers: [{name, role}]
- episode_metadata: {format, primary_subject, estimated_duration_minutes}

TRANSCRIPT:
{{transcript}}";

const TRANSCRIPT_ANALYSIS: &str = "{{voice}}

Analyse this episode. Return JSON with:
- episode_crux: the single core message, two or three sentences
- key_themes: recurring themes
- episode_format: one of {{formats}}
- target_audience: who benefits most

TRANSCRIPT:
{{transcript}}";

const QUOTE_EXTRACTION: &str = "Extract between {{quote_min}} and {{quote_max}} verbatim quotes
from the transcript. Copy words exactly; do not paraphrase.

Return JSON: {\"quotes\": [{text, speaker, context, usage}]} where usage is
one of {{usages}}.

TRANSCRIPT:
{{transcript}}";

const BLOG_OUTLINE: &str = "{{voice}}

Outline a blog article built on this core message:
{{episode_crux}}

Themes: {{key_themes}}

Available quotes (reference by index):
{{quotes}}

Return JSON: {hook, sections: [{heading, purpose, quote_refs}], conclusion}
with at least two sections.";

const PARAGRAPH_DETAILS: &str = "Plan the paragraphs for each outline section.

Core message: {{episode_crux}}

Outline:
{{outline}}

Quotes (by index):
{{quotes}}

Return JSON: {\"paragraphs\": [{section, key_points, quote_index}]}, one
entry per section.";

const HEADLINES: &str = "{{voice}}

Write headline options for an article with this core message:
{{episode_crux}}

Outline:
{{outline}}

Return JSON: {headlines (at least three), subheadings, social_hooks}.";

const DRAFT_GENERATION: &str = "{{voice}}

Write a long-form markdown article.

Angle: {{angle}}
Title: {{headline}}
Core message: {{episode_crux}}

Outline:
{{outline}}

Paragraph plan:
{{paragraphs}}

Quotes you may use verbatim:
{{quotes}}

Requirements: start with a '# ' title line, use at least {{min_headings}}
'## ' section headings, and write at least {{min_words}} words.";

const REFINEMENT: &str = "{{voice}}

Edit the article below for clarity, rhythm and accuracy to this core
message: {{episode_crux}}

Keep the '# ' title, keep at least {{min_headings}} '## ' headings and at
least {{min_words}} words. Return only the revised markdown.

ARTICLE:
{{draft}}";

const SOCIAL_CONTENT: &str = "{{voice}}

Write {{post_count}} posts for {{platform}}. Each post must be at most
{{char_limit}} characters.

Core message: {{episode_crux}}
Article: {{article_title}}
Hooks: {{hooks}}
Quotes:
{{quotes}}

Return JSON: {\"posts\": [{text, hashtags}]}.";

const SOCIAL_CONTENT_COMBINED: &str = "{{voice}}

Write {{post_count}} posts for each of these platforms: {{platforms}}.
Respect each platform's length limit: {{limits}}.

Core message: {{episode_crux}}
Article: {{article_title}}
Hooks: {{hooks}}
Quotes:
{{quotes}}

Return JSON: {\"platforms\": [{platform, posts: [{text, hashtags}]}]}.";

const EMAIL_CAMPAIGN: &str = "{{voice}}

Write a newsletter email promoting the article \"{{article_title}}\".

Core message: {{episode_crux}}
Article opening:
{{article_excerpt}}

Return JSON: {subject_lines (at least three), preview_text, body}.";

/// The templates shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    /// Names of every built-in template.
    pub const NAMES: [&'static str; 12] = [
        "voice",
        "preprocessing",
        "transcript_analysis",
        "quote_extraction",
        "blog_outline",
        "paragraph_details",
        "headlines",
        "draft_generation",
        "refinement",
        "social_content",
        "social_content_combined",
        "email_campaign",
    ];

    fn text(name: &str) -> Option<&'static str> {
        Some(match name {
            "voice" => VOICE,
            "preprocessing" => PREPROCESSING,
            "transcript_analysis" => TRANSCRIPT_ANALYSIS,
            "quote_extraction" => QUOTE_EXTRACTION,
            "blog_outline" => BLOG_OUTLINE,
            "paragraph_details" => PARAGRAPH_DETAILS,
            "headlines" => HEADLINES,
            "draft_generation" => DRAFT_GENERATION,
            "refinement" => REFINEMENT,
            "social_content" => SOCIAL_CONTENT,
            "social_content_combined" => SOCIAL_CONTENT_COMBINED,
            "email_campaign" => EMAIL_CAMPAIGN,
            _ => return None,
        })
    }
}

impl TemplateSource for BuiltinTemplates {
    fn load(&self, name: &str) -> Result<String, EvergreenError> {
        Self::text(name)
            .map(str::to_string)
            .ok_or_else(|| EvergreenError::Template(format!("no built-in template '{name}'")))
    }
}
