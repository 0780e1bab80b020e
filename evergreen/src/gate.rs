//! Size-based preprocessing gate.
//!
//! Token counts are estimated from character counts so the decision costs
//! nothing and needs no tokenizer.

use crate::config::PipelineSettings;
use serde::{Deserialize, Serialize};

/// Outcome of the gate for one transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether compression should run.
    pub needed: bool,
    /// Estimated token count of the transcript.
    pub estimated_tokens: usize,
    /// Threshold the estimate was compared against.
    pub threshold_tokens: usize,
}

/// Decides whether a transcript is long enough to need compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessingGate {
    threshold_tokens: usize,
    chars_per_token: usize,
}

impl Default for PreprocessingGate {
    fn default() -> Self {
        Self::new(8000, 4)
    }
}

impl PreprocessingGate {
    /// Creates a gate. A zero `chars_per_token` is treated as one.
    #[must_use]
    pub fn new(threshold_tokens: usize, chars_per_token: usize) -> Self {
        Self {
            threshold_tokens,
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Creates a gate from pipeline settings.
    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.preprocess_threshold_tokens, settings.chars_per_token)
    }

    /// Threshold in tokens.
    #[must_use]
    pub const fn threshold_tokens(&self) -> usize {
        self.threshold_tokens
    }

    /// `ceil(chars / chars_per_token)`, counting Unicode scalar values.
    #[must_use]
    pub fn estimate_tokens(&self, transcript: &str) -> usize {
        transcript.chars().count().div_ceil(self.chars_per_token)
    }

    /// Evaluates a transcript. Exactly-at-threshold does not compress.
    #[must_use]
    pub fn evaluate(&self, transcript: &str) -> GateDecision {
        let estimated_tokens = self.estimate_tokens(transcript);
        GateDecision {
            needed: estimated_tokens > self.threshold_tokens,
            estimated_tokens,
            threshold_tokens: self.threshold_tokens,
        }
    }
}

/// Evaluates a transcript against the default gate.
#[must_use]
pub fn gate(transcript: &str) -> GateDecision {
    PreprocessingGate::default().evaluate(transcript)
}
