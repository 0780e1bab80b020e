//! Validation-driven retry for generative stages.
//!
//! A generative call is parsed and checked against soft structural rules.
//! If it falls short and attempts remain, the call is repeated with the
//! violated constraints appended to the prompt. When attempts run out the
//! best candidate seen is returned together with its remaining issues; the
//! run carries on.
//!
//! A response that cannot be parsed on any attempt still does not fail the
//! stage: the raw text of the last reply is kept with no typed value and a
//! "response could not be parsed" issue.

use super::fanout::Metered;
use crate::config::PipelineSettings;
use crate::errors::EvergreenError;
use crate::events::{types, EventSink};
use crate::invoker::{InvokeOptions, Invocation, ModelInvoker};
use crate::ledger::Usage;
use crate::validation::ValidationVerdict;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

/// How many times a generative call may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Stop early when two consecutive responses are identical.
    pub stop_on_stagnation: bool,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            stop_on_stagnation: true,
        }
    }
}

impl GenerationPolicy {
    /// Reads the policy from pipeline settings.
    #[must_use]
    pub const fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.generative_max_retries,
            stop_on_stagnation: settings.stop_on_stagnation,
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome of a validated generation.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    /// The accepted (or best) value; `None` when no reply parsed.
    pub value: Option<T>,
    /// Text of the reply `value` came from, or of the last reply.
    pub raw: String,
    /// Issues left on `value`; empty when it passed.
    pub issues: Vec<String>,
    /// Attempts made.
    pub attempts: u32,
    /// Sequential usage across every attempt.
    pub usage: Usage,
}

impl<T> Generated<T> {
    /// Returns true if the value passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.value.is_some() && self.issues.is_empty()
    }

    /// Maps the typed value, keeping everything else.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Generated<U> {
        Generated {
            value: self.value.map(f),
            raw: self.raw,
            issues: self.issues,
            attempts: self.attempts,
            usage: self.usage,
        }
    }
}

impl<T> Metered for Generated<T> {
    fn usage(&self) -> Usage {
        self.usage
    }
}

/// SHA-256 hex digest of a response, used to detect stagnation.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends the violated constraints to the original prompt.
#[must_use]
pub fn retry_prompt(prompt: &str, issues: &[String]) -> String {
    let mut out = String::with_capacity(prompt.len() + 64 * issues.len());
    out.push_str(prompt);
    out.push_str("\n\nIMPORTANT: your previous response did not meet these requirements. Fix every one of them:");
    for issue in issues {
        out.push_str("\n- ");
        out.push_str(issue);
    }
    out
}

/// One generative call site: invoker, options and retry policy.
pub struct GenerationLoop<'a> {
    invoker: &'a dyn ModelInvoker,
    options: &'a InvokeOptions,
    policy: GenerationPolicy,
    events: &'a dyn EventSink,
    run_id: Uuid,
}

impl std::fmt::Debug for GenerationLoop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLoop")
            .field("tag", &self.options.tag)
            .field("policy", &self.policy)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl<'a> GenerationLoop<'a> {
    /// Creates a loop for one call site.
    #[must_use]
    pub fn new(
        invoker: &'a dyn ModelInvoker,
        options: &'a InvokeOptions,
        policy: GenerationPolicy,
        events: &'a dyn EventSink,
        run_id: Uuid,
    ) -> Self {
        Self {
            invoker,
            options,
            policy,
            events,
            run_id,
        }
    }

    /// Generates until `validate` passes or attempts run out.
    ///
    /// Among invalid candidates the one with the fewest issues wins; ties go
    /// to the later attempt.
    ///
    /// If no attempt produced a parseable value, the result carries no value,
    /// the last reply's text, and the parse failure as its issue.
    ///
    /// # Errors
    ///
    /// Provider errors propagate unchanged.
    pub async fn run<T, P, V>(
        &self,
        prompt: &str,
        parse: P,
        validate: V,
    ) -> Result<Generated<T>, EvergreenError>
    where
        T: Send,
        P: Fn(&Invocation) -> Result<T, String> + Send + Sync,
        V: Fn(&T) -> ValidationVerdict + Send + Sync,
    {
        let tag = self.options.tag.as_str();
        let max_attempts = self.policy.max_attempts();
        let mut usage = Usage::default();
        let mut best: Option<(T, String, Vec<String>)> = None;
        let mut last_issues: Vec<String> = Vec::new();
        let mut last_raw = String::new();
        let mut previous: Option<String> = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            let attempt_prompt = if attempts == 1 {
                prompt.to_string()
            } else {
                retry_prompt(prompt, &last_issues)
            };

            let invocation = self.invoker.invoke(&attempt_prompt, self.options).await?;
            usage = usage.then(invocation.usage());

            let raw = invocation.as_text();
            let digest = fingerprint(&raw);
            let stagnant = previous.as_deref() == Some(digest.as_str());
            previous = Some(digest);

            last_issues = match parse(&invocation) {
                Ok(value) => {
                    let verdict = validate(&value);
                    if verdict.valid {
                        debug!(run_id = %self.run_id, tag, attempts, "Generation accepted");
                        return Ok(Generated {
                            value: Some(value),
                            raw,
                            issues: Vec::new(),
                            attempts,
                            usage,
                        });
                    }
                    let issues = verdict.issues;
                    if best.as_ref().map_or(true, |(_, _, held)| issues.len() <= held.len()) {
                        best = Some((value, raw.clone(), issues.clone()));
                    }
                    issues
                }
                Err(reason) => vec![format!("response could not be parsed: {reason}")],
            };
            last_raw = raw;

            if stagnant && self.policy.stop_on_stagnation {
                warn!(
                    run_id = %self.run_id,
                    tag,
                    attempts,
                    "Identical response on retry; stopping early"
                );
                break;
            }
            if attempts < max_attempts {
                warn!(
                    run_id = %self.run_id,
                    tag,
                    attempt = attempts,
                    issues = last_issues.len(),
                    "Generation failed validation, retrying"
                );
                self.events.try_emit(
                    types::STAGE_RETRY,
                    serde_json::json!({
                        "run_id": self.run_id.to_string(),
                        "tag": tag,
                        "attempt": attempts,
                        "issues": last_issues,
                    }),
                );
            }
        }

        let generated = match best {
            Some((value, raw, issues)) => Generated {
                value: Some(value),
                raw,
                issues,
                attempts,
                usage,
            },
            None => Generated {
                value: None,
                raw: last_raw,
                issues: last_issues,
                attempts,
                usage,
            },
        };
        warn!(
            run_id = %self.run_id,
            tag,
            attempts,
            parsed = generated.value.is_some(),
            issues = generated.issues.len(),
            "Generation kept with validation issues"
        );
        Ok(generated)
    }
}
