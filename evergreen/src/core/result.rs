//! Stage results and the typed output union they carry.

use super::outputs::{
    BlogOutline, DraftSet, EmailCampaign, HeadlineSet, ParagraphDetails, PreprocessedTranscript,
    QuoteSet, RefinedDraft, SocialContent, TranscriptAnalysis,
};
use super::StageId;
use crate::ledger::Usage;
use serde::{Deserialize, Serialize};

/// Typed output of a stage, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    /// Stage 0.
    Preprocessing(PreprocessedTranscript),
    /// Stage 1.
    TranscriptAnalysis(TranscriptAnalysis),
    /// Stage 2.
    QuoteExtraction(QuoteSet),
    /// Stage 3.
    BlogOutline(BlogOutline),
    /// Stage 4.
    ParagraphDetails(ParagraphDetails),
    /// Stage 5.
    Headlines(HeadlineSet),
    /// Stage 6.
    DraftGeneration(DraftSet),
    /// Stage 7.
    Refinement(RefinedDraft),
    /// Stage 8.
    SocialContent(SocialContent),
    /// Stage 9.
    EmailCampaign(EmailCampaign),
}

impl StageOutput {
    /// The stage that produces this variant.
    #[must_use]
    pub const fn stage(&self) -> StageId {
        match self {
            Self::Preprocessing(_) => StageId::Preprocessing,
            Self::TranscriptAnalysis(_) => StageId::TranscriptAnalysis,
            Self::QuoteExtraction(_) => StageId::QuoteExtraction,
            Self::BlogOutline(_) => StageId::BlogOutline,
            Self::ParagraphDetails(_) => StageId::ParagraphDetails,
            Self::Headlines(_) => StageId::Headlines,
            Self::DraftGeneration(_) => StageId::DraftGeneration,
            Self::Refinement(_) => StageId::Refinement,
            Self::SocialContent(_) => StageId::SocialContent,
            Self::EmailCampaign(_) => StageId::EmailCampaign,
        }
    }
}

/// Ties an output type to the single stage slot that holds it.
///
/// Lookups through this trait are checked at compile time: asking the
/// accumulator for a `QuoteSet` can only ever read the quote extraction slot.
pub trait StageOutputKind: Sized + Send + Sync + 'static {
    /// The producing stage.
    const STAGE: StageId;

    /// Borrows the typed value if the output is this kind.
    fn from_output(output: &StageOutput) -> Option<&Self>;

    /// Wraps the value in the output union.
    fn into_output(self) -> StageOutput;
}

macro_rules! stage_output_kind {
    ($ty:ty, $variant:ident) => {
        impl StageOutputKind for $ty {
            const STAGE: StageId = StageId::$variant;

            fn from_output(output: &StageOutput) -> Option<&Self> {
                match output {
                    StageOutput::$variant(value) => Some(value),
                    _ => None,
                }
            }

            fn into_output(self) -> StageOutput {
                StageOutput::$variant(self)
            }
        }
    };
}

stage_output_kind!(PreprocessedTranscript, Preprocessing);
stage_output_kind!(TranscriptAnalysis, TranscriptAnalysis);
stage_output_kind!(QuoteSet, QuoteExtraction);
stage_output_kind!(BlogOutline, BlogOutline);
stage_output_kind!(ParagraphDetails, ParagraphDetails);
stage_output_kind!(HeadlineSet, Headlines);
stage_output_kind!(DraftSet, DraftGeneration);
stage_output_kind!(RefinedDraft, Refinement);
stage_output_kind!(SocialContent, SocialContent);
stage_output_kind!(EmailCampaign, EmailCampaign);

/// What a stage handler hands back to the runner.
///
/// Every field is optional; the runner normalizes missing values into a
/// [`StageResult`] so callers never branch on absent fields.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    /// Typed output.
    pub output_data: Option<StageOutput>,
    /// Primary text rendering of the output.
    pub output_text: Option<String>,
    /// Input tokens across all invocations.
    pub input_tokens: Option<u64>,
    /// Output tokens across all invocations.
    pub output_tokens: Option<u64>,
    /// Cost across all invocations.
    pub cost_usd: Option<f64>,
    /// Whether the stage decided it had nothing to do.
    pub skipped: bool,
    /// Soft-validation issues that survived retries.
    pub validation_issues: Option<Vec<String>>,
    /// Number of generation attempts.
    pub attempts: Option<u32>,
}

impl StageOutcome {
    /// Creates an outcome carrying typed output.
    #[must_use]
    pub fn with_output<T: StageOutputKind>(output: T) -> Self {
        Self {
            output_data: Some(output.into_output()),
            ..Self::default()
        }
    }

    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped<T: StageOutputKind>(output: T) -> Self {
        Self {
            output_data: Some(output.into_output()),
            skipped: true,
            ..Self::default()
        }
    }

    /// Sets the primary text.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.output_text = Some(text.into());
        self
    }

    /// Sets token and cost figures from a usage total.
    #[must_use]
    pub fn usage(mut self, usage: Usage) -> Self {
        self.input_tokens = Some(usage.input_tokens);
        self.output_tokens = Some(usage.output_tokens);
        self.cost_usd = Some(usage.cost_usd);
        self
    }

    /// Sets the validation issues.
    #[must_use]
    pub fn issues(mut self, issues: Vec<String>) -> Self {
        self.validation_issues = Some(issues);
        self
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

/// The normalized result of one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Producing stage.
    pub stage: StageId,
    /// Typed output.
    #[serde(default)]
    pub output_data: Option<StageOutput>,
    /// Primary text rendering.
    #[serde(default)]
    pub output_text: Option<String>,
    /// Tokens, cost and wall-clock duration.
    #[serde(flatten)]
    pub usage: Usage,
    /// Whether the stage skipped its work.
    #[serde(default)]
    pub skipped: bool,
    /// Soft-validation issues.
    #[serde(default)]
    pub validation_issues: Vec<String>,
    /// Number of generation attempts.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

const fn default_attempts() -> u32 {
    1
}

impl StageResult {
    /// Normalizes a handler outcome, filling safe defaults.
    #[must_use]
    pub fn from_outcome(stage: StageId, outcome: StageOutcome, duration_ms: u64) -> Self {
        Self {
            stage,
            output_data: outcome.output_data,
            output_text: outcome.output_text,
            usage: Usage {
                input_tokens: outcome.input_tokens.unwrap_or(0),
                output_tokens: outcome.output_tokens.unwrap_or(0),
                cost_usd: outcome.cost_usd.unwrap_or(0.0),
                duration_ms,
            },
            skipped: outcome.skipped,
            validation_issues: outcome.validation_issues.unwrap_or_default(),
            attempts: outcome.attempts.unwrap_or(1),
        }
    }

    /// Returns true if the output invariant holds: some output unless skipped.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.skipped || self.output_data.is_some() || self.output_text.is_some()
    }

    /// Returns true if no soft-validation issues remain.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_issues.is_empty()
    }

    /// Borrows the typed output.
    #[must_use]
    pub fn output<T: StageOutputKind>(&self) -> Option<&T> {
        self.output_data.as_ref().and_then(T::from_output)
    }

    /// Input tokens.
    #[must_use]
    pub const fn input_tokens(&self) -> u64 {
        self.usage.input_tokens
    }

    /// Output tokens.
    #[must_use]
    pub const fn output_tokens(&self) -> u64 {
        self.usage.output_tokens
    }

    /// Cost in USD.
    #[must_use]
    pub const fn cost_usd(&self) -> f64 {
        self.usage.cost_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_outcome_fills_defaults() {
        let result = StageResult::from_outcome(
            StageId::EmailCampaign,
            StageOutcome::default().text("hello"),
            12,
        );

        assert_eq!(result.input_tokens(), 0);
        assert_eq!(result.output_tokens(), 0);
        assert!(result.cost_usd().abs() < f64::EPSILON);
        assert_eq!(result.usage.duration_ms, 12);
        assert!(result.validation_issues.is_empty());
        assert_eq!(result.attempts, 1);
        assert!(result.has_output());
    }

    #[test]
    fn test_has_output_requires_data_unless_skipped() {
        let empty = StageResult::from_outcome(StageId::Headlines, StageOutcome::default(), 0);
        assert!(!empty.has_output());

        let skipped = StageResult::from_outcome(
            StageId::Preprocessing,
            StageOutcome::skipped(PreprocessedTranscript::skipped(10)),
            0,
        );
        assert!(skipped.has_output());
        assert!(skipped.skipped);
    }

    #[test]
    fn test_typed_output_lookup() {
        let quotes = QuoteSet { quotes: Vec::new() };
        let result = StageResult::from_outcome(
            StageId::QuoteExtraction,
            StageOutcome::with_output(quotes.clone()),
            0,
        );

        assert_eq!(result.output::<QuoteSet>(), Some(&quotes));
        assert!(result.output::<TranscriptAnalysis>().is_none());
        assert_eq!(<QuoteSet as StageOutputKind>::STAGE, StageId::QuoteExtraction);
    }

    #[test]
    fn test_stage_output_variant_stage() {
        let output = StageOutput::Preprocessing(PreprocessedTranscript::default());
        assert_eq!(output.stage(), StageId::Preprocessing);
    }
}
