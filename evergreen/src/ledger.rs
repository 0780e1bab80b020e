//! Cost and token ledger.
//!
//! Usage composes two ways. Sequential work (one stage after another, one
//! retry after another) sums everything including wall-clock time. Parallel
//! work (stages in a phase, platform branches) sums tokens and cost but only
//! takes the longest duration, because the branches overlapped in time.
//!
//! All functions here are pure and deterministic.

use serde::{Deserialize, Serialize};

/// Tokens, cost and wall-clock time for a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl Usage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        duration_ms: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cost_usd,
            duration_ms,
        }
    }

    /// Total tokens in both directions.
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Composes with work that ran after this one.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + next.input_tokens,
            output_tokens: self.output_tokens + next.output_tokens,
            cost_usd: self.cost_usd + next.cost_usd,
            duration_ms: self.duration_ms + next.duration_ms,
        }
    }

    /// Composes with work that ran concurrently with this one.
    #[must_use]
    pub fn alongside(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cost_usd: self.cost_usd + other.cost_usd,
            duration_ms: self.duration_ms.max(other.duration_ms),
        }
    }

    /// Replaces the duration, keeping tokens and cost.
    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Aggregates usage of work that ran one after another.
#[must_use]
pub fn sequential<I>(items: I) -> Usage
where
    I: IntoIterator<Item = Usage>,
{
    items.into_iter().fold(Usage::default(), Usage::then)
}

/// Aggregates usage of work that ran concurrently.
#[must_use]
pub fn parallel<I>(items: I) -> Usage
where
    I: IntoIterator<Item = Usage>,
{
    items.into_iter().fold(Usage::default(), Usage::alongside)
}

/// Prices for one model family, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Model name prefix this entry matches.
    pub prefix: &'static str,
    /// Input price per 1M tokens.
    pub input_per_m: f64,
    /// Output price per 1M tokens.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Cost of a call with the given token counts.
    #[must_use]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_m;
        input_cost + output_cost
    }
}

/// Known model prices. Matched by longest prefix so dated variants resolve.
pub const PRICING: &[ModelPricing] = &[
    ModelPricing {
        prefix: "claude-opus-4",
        input_per_m: 15.00,
        output_per_m: 75.00,
    },
    ModelPricing {
        prefix: "claude-sonnet-4",
        input_per_m: 3.00,
        output_per_m: 15.00,
    },
    ModelPricing {
        prefix: "claude-3-5-sonnet",
        input_per_m: 3.00,
        output_per_m: 15.00,
    },
    ModelPricing {
        prefix: "claude-haiku-4",
        input_per_m: 1.00,
        output_per_m: 5.00,
    },
    ModelPricing {
        prefix: "claude-3-5-haiku",
        input_per_m: 0.80,
        output_per_m: 4.00,
    },
    ModelPricing {
        prefix: "gpt-4.1-mini",
        input_per_m: 0.40,
        output_per_m: 1.60,
    },
    ModelPricing {
        prefix: "gpt-4.1-nano",
        input_per_m: 0.10,
        output_per_m: 0.40,
    },
    ModelPricing {
        prefix: "gpt-4.1",
        input_per_m: 2.00,
        output_per_m: 8.00,
    },
    ModelPricing {
        prefix: "gpt-4o-mini",
        input_per_m: 0.15,
        output_per_m: 0.60,
    },
    ModelPricing {
        prefix: "gpt-4o",
        input_per_m: 2.50,
        output_per_m: 10.00,
    },
];

/// Looks up the price entry for a model.
#[must_use]
pub fn pricing_for(model: &str) -> Option<&'static ModelPricing> {
    PRICING
        .iter()
        .filter(|p| model.starts_with(p.prefix))
        .max_by_key(|p| p.prefix.len())
}

/// Cost of a call. Unknown models cost nothing rather than failing the stage.
#[must_use]
pub fn cost_for(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    pricing_for(model).map_or(0.0, |p| p.cost(input_tokens, output_tokens))
}
