//! Run settings.
//!
//! Every field has a serde default, so a settings file only needs to name
//! what it changes. `{}` is a valid settings document.

use crate::core::{Provider, StageId};
use crate::errors::{EvergreenError, Result};
use crate::invoker::backoff::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// A social platform the distribution stage writes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// LinkedIn.
    LinkedIn,
    /// Twitter / X.
    Twitter,
    /// Instagram.
    Instagram,
    /// Facebook.
    Facebook,
    /// Threads.
    Threads,
    /// Bluesky.
    Bluesky,
}

impl Platform {
    /// Machine-friendly name.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::Twitter => "twitter",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Threads => "threads",
            Self::Bluesky => "bluesky",
        }
    }

    /// Maximum characters per post.
    #[must_use]
    pub const fn char_limit(self) -> usize {
        match self {
            Self::LinkedIn => 3000,
            Self::Twitter => 280,
            Self::Instagram => 2200,
            Self::Facebook => 5000,
            Self::Threads => 500,
            Self::Bluesky => 300,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// How the draft stage writes articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftMode {
    /// One article.
    #[default]
    Single,
    /// Two articles with different angles, drafted concurrently.
    Dual,
}

/// How the social stage generates posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialMode {
    /// One invocation per platform, run concurrently.
    #[default]
    PerPlatform,
    /// A single invocation covering every platform.
    Combined,
}

/// Brand voice fed into every prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandVoice {
    /// Show or brand name.
    #[serde(default = "default_brand_name")]
    pub name: String,
    /// Tone of voice.
    #[serde(default = "default_tone")]
    pub tone: String,
    /// Target audience.
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Phrases or topics to avoid.
    #[serde(default)]
    pub avoid: Vec<String>,
}

fn default_brand_name() -> String {
    "The Show".to_string()
}

fn default_tone() -> String {
    "conversational, insightful".to_string()
}

fn default_audience() -> String {
    "curious professionals".to_string()
}

impl Default for BrandVoice {
    fn default() -> Self {
        Self {
            name: default_brand_name(),
            tone: default_tone(),
            audience: default_audience(),
            avoid: Vec::new(),
        }
    }
}

/// Orchestration thresholds and bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Estimated tokens above which the transcript is compressed.
    #[serde(default = "default_threshold")]
    pub preprocess_threshold_tokens: usize,
    /// Characters per estimated token.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Minimum length of the compressed narrative.
    #[serde(default = "default_min_compressed_chars")]
    pub min_compressed_chars: usize,
    /// Minimum number of topics in the compressed output.
    #[serde(default = "default_min_compressed_topics")]
    pub min_compressed_topics: usize,
    /// Extra attempts allowed for generative stages.
    #[serde(default = "default_generative_retries")]
    pub generative_max_retries: u32,
    /// Stop retrying when two consecutive outputs are identical.
    #[serde(default = "default_true")]
    pub stop_on_stagnation: bool,
    /// Minimum quotes in the canonical quote set.
    #[serde(default = "default_quote_min")]
    pub quote_min: usize,
    /// Quotes kept at most; extras are truncated.
    #[serde(default = "default_quote_max")]
    pub quote_max: usize,
    /// Minimum words per drafted article.
    #[serde(default = "default_min_draft_words")]
    pub min_draft_words: usize,
    /// Minimum `##` headings per drafted article.
    #[serde(default = "default_min_section_headings")]
    pub min_section_headings: usize,
    /// Minimum posts per platform.
    #[serde(default = "default_min_posts")]
    pub min_posts_per_platform: usize,
    /// Backoff for transient provider errors.
    #[serde(default)]
    pub provider_retry: RetryConfig,
}

fn default_threshold() -> usize {
    8000
}

fn default_chars_per_token() -> usize {
    4
}

fn default_min_compressed_chars() -> usize {
    500
}

fn default_min_compressed_topics() -> usize {
    5
}

fn default_generative_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_quote_min() -> usize {
    5
}

fn default_quote_max() -> usize {
    8
}

fn default_min_draft_words() -> usize {
    600
}

fn default_min_section_headings() -> usize {
    2
}

fn default_min_posts() -> usize {
    5
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            preprocess_threshold_tokens: default_threshold(),
            chars_per_token: default_chars_per_token(),
            min_compressed_chars: default_min_compressed_chars(),
            min_compressed_topics: default_min_compressed_topics(),
            generative_max_retries: default_generative_retries(),
            stop_on_stagnation: true,
            quote_min: default_quote_min(),
            quote_max: default_quote_max(),
            min_draft_words: default_min_draft_words(),
            min_section_headings: default_min_section_headings(),
            min_posts_per_platform: default_min_posts(),
            provider_retry: RetryConfig::default(),
        }
    }
}

/// Connection settings for one chat-completions back-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProviderSettings {
    /// API base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Default model for stages of this provider.
    pub default_model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl HttpProviderSettings {
    /// Defaults for a provider.
    #[must_use]
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Anthropic => Self {
                base_url: "https://api.anthropic.com/v1".to_string(),
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                default_model: "claude-sonnet-4-5".to_string(),
                timeout_seconds: default_timeout_seconds(),
            },
            Provider::OpenAi => Self {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                default_model: "gpt-4.1-mini".to_string(),
                timeout_seconds: default_timeout_seconds(),
            },
        }
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Per-provider connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Anthropic back-end.
    #[serde(default = "default_anthropic")]
    pub anthropic: HttpProviderSettings,
    /// `OpenAI` back-end.
    #[serde(default = "default_openai")]
    pub openai: HttpProviderSettings,
}

fn default_anthropic() -> HttpProviderSettings {
    HttpProviderSettings::for_provider(Provider::Anthropic)
}

fn default_openai() -> HttpProviderSettings {
    HttpProviderSettings::for_provider(Provider::OpenAi)
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            anthropic: default_anthropic(),
            openai: default_openai(),
        }
    }
}

impl ProviderSettings {
    /// Settings for a provider.
    #[must_use]
    pub const fn get(&self, provider: Provider) -> &HttpProviderSettings {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::OpenAi => &self.openai,
        }
    }
}

/// Top-level settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvergreenSettings {
    /// Brand voice.
    #[serde(default)]
    pub brand: BrandVoice,
    /// Platforms to write social posts for, in output order.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
    /// Draft strategy.
    #[serde(default)]
    pub draft_mode: DraftMode,
    /// Social strategy.
    #[serde(default)]
    pub social_mode: SocialMode,
    /// Orchestration thresholds.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Provider connections.
    #[serde(default)]
    pub providers: ProviderSettings,
    /// Per-stage model overrides.
    #[serde(default)]
    pub model_overrides: BTreeMap<StageId, String>,
}

fn default_platforms() -> Vec<Platform> {
    vec![
        Platform::LinkedIn,
        Platform::Twitter,
        Platform::Instagram,
        Platform::Facebook,
    ]
}

impl Default for EvergreenSettings {
    fn default() -> Self {
        Self {
            brand: BrandVoice::default(),
            platforms: default_platforms(),
            draft_mode: DraftMode::default(),
            social_mode: SocialMode::default(),
            pipeline: PipelineSettings::default(),
            providers: ProviderSettings::default(),
            model_overrides: BTreeMap::new(),
        }
    }
}

impl EvergreenSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates settings from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EvergreenError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Sets the brand voice.
    #[must_use]
    pub fn with_brand(mut self, brand: BrandVoice) -> Self {
        self.brand = brand;
        self
    }

    /// Sets the target platforms.
    #[must_use]
    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    /// Sets the draft mode.
    #[must_use]
    pub fn with_draft_mode(mut self, mode: DraftMode) -> Self {
        self.draft_mode = mode;
        self
    }

    /// Sets the social mode.
    #[must_use]
    pub fn with_social_mode(mut self, mode: SocialMode) -> Self {
        self.social_mode = mode;
        self
    }

    /// Sets the pipeline thresholds.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineSettings) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Overrides the model used by one stage.
    #[must_use]
    pub fn with_model_override(mut self, stage: StageId, model: impl Into<String>) -> Self {
        self.model_overrides.insert(stage, model.into());
        self
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.chars_per_token == 0 {
            return Err(EvergreenError::Config(
                "pipeline.chars_per_token must be positive".to_string(),
            ));
        }
        if p.preprocess_threshold_tokens == 0 {
            return Err(EvergreenError::Config(
                "pipeline.preprocess_threshold_tokens must be positive".to_string(),
            ));
        }
        if p.quote_min == 0 || p.quote_min > p.quote_max {
            return Err(EvergreenError::Config(format!(
                "pipeline.quote_min ({}) must be between 1 and quote_max ({})",
                p.quote_min, p.quote_max
            )));
        }
        if p.provider_retry.max_attempts == 0 {
            return Err(EvergreenError::Config(
                "pipeline.provider_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.platforms.is_empty() {
            return Err(EvergreenError::Config(
                "at least one platform is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.platforms.iter().find(|p| !seen.insert(**p)) {
            return Err(EvergreenError::Config(format!(
                "platform '{dup}' is listed more than once"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = EvergreenSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, EvergreenSettings::default());
        assert_eq!(settings.pipeline.preprocess_threshold_tokens, 8000);
        assert_eq!(settings.pipeline.generative_max_retries, 1);
        assert_eq!(settings.platforms.len(), 4);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "draft_mode": "dual",
            "platforms": ["linkedin", "bluesky"],
            "pipeline": { "preprocess_threshold_tokens": 2000 },
            "model_overrides": { "refinement": "claude-opus-4-1" }
        }"#;
        let settings = EvergreenSettings::from_json_str(json).unwrap();

        assert_eq!(settings.draft_mode, DraftMode::Dual);
        assert_eq!(settings.platforms, vec![Platform::LinkedIn, Platform::Bluesky]);
        assert_eq!(settings.pipeline.preprocess_threshold_tokens, 2000);
        assert_eq!(settings.pipeline.chars_per_token, 4);
        assert_eq!(
            settings.model_overrides.get(&StageId::Refinement).map(String::as_str),
            Some("claude-opus-4-1")
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_platforms() {
        let settings = EvergreenSettings::new()
            .with_platforms(vec![Platform::Twitter, Platform::Twitter]);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("twitter"));
    }

    #[test]
    fn test_validate_rejects_inverted_quote_bounds() {
        let mut settings = EvergreenSettings::new();
        settings.pipeline.quote_min = 9;
        assert!(matches!(settings.validate(), Err(EvergreenError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"social_mode": "combined"}}"#).unwrap();

        let settings = EvergreenSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.social_mode, SocialMode::Combined);
    }

    #[test]
    fn test_from_missing_file() {
        let err = EvergreenSettings::from_file("/nonexistent/evergreen.json").unwrap_err();
        assert!(matches!(err, EvergreenError::Config(_)));
    }

    #[test]
    fn test_provider_defaults() {
        let providers = ProviderSettings::default();
        assert_eq!(providers.get(Provider::OpenAi).api_key_env, "OPENAI_API_KEY");
        assert_eq!(providers.get(Provider::Anthropic).timeout(), Duration::from_secs(120));
    }
}
