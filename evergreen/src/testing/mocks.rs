//! A scripted model invoker for pipeline tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::core::Provider;
use crate::errors::{EvergreenError, ProviderError, StatusClass};
use crate::invoker::{InvokeOptions, Invocation, ModelInvoker};
use crate::ledger;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this invocation.
    Respond(Invocation),
    /// Fail with this provider error.
    Fail(ProviderError),
}

/// A call the invoker received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Invocation tag (`slug` or `slug:branch`).
    pub tag: String,
    /// Requested model.
    pub model: String,
    /// Full prompt.
    pub prompt: String,
    /// Whether a response schema was attached.
    pub has_schema: bool,
}

/// Replies by invocation tag.
///
/// Lookup order for a tag such as `social_content:twitter`: the queue for
/// the exact tag, the default for the exact tag, then the same two for the
/// base tag `social_content`. Queued replies are used once; defaults repeat.
/// Token counts left at zero are estimated at four characters per token and
/// priced from the model table.
#[derive(Debug)]
pub struct ScriptedInvoker {
    provider: Provider,
    queued: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    defaults: Mutex<HashMap<String, ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedInvoker {
    /// Creates an invoker with no script.
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            queued: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleeps before every reply.
    #[must_use]
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// Queues a one-shot reply for a tag.
    pub fn push(&self, tag: impl Into<String>, invocation: Invocation) {
        self.push_reply(tag, ScriptedReply::Respond(invocation));
    }

    /// Queues a one-shot failure for a tag.
    pub fn push_failure(&self, tag: impl Into<String>, error: ProviderError) {
        self.push_reply(tag, ScriptedReply::Fail(error));
    }

    fn push_reply(&self, tag: impl Into<String>, reply: ScriptedReply) {
        self.queued.lock().entry(tag.into()).or_default().push_back(reply);
    }

    /// Sets the repeating reply for a tag.
    pub fn set_default(&self, tag: impl Into<String>, invocation: Invocation) {
        self.defaults
            .lock()
            .insert(tag.into(), ScriptedReply::Respond(invocation));
    }

    /// Makes every call for a tag fail.
    pub fn fail_always(&self, tag: impl Into<String>, error: ProviderError) {
        self.defaults.lock().insert(tag.into(), ScriptedReply::Fail(error));
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls whose tag equals `tag` or starts with `tag:`.
    #[must_use]
    pub fn calls_for(&self, tag: &str) -> Vec<RecordedCall> {
        let branch = format!("{tag}:");
        self.calls
            .lock()
            .iter()
            .filter(|call| call.tag == tag || call.tag.starts_with(&branch))
            .cloned()
            .collect()
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_reply(&self, tag: &str) -> Option<ScriptedReply> {
        let base = tag.split_once(':').map(|(base, _)| base);
        let candidates = std::iter::once(tag).chain(base);
        for candidate in candidates {
            if let Some(reply) = self
                .queued
                .lock()
                .get_mut(candidate)
                .and_then(VecDeque::pop_front)
            {
                return Some(reply);
            }
            if let Some(reply) = self.defaults.lock().get(candidate) {
                return Some(reply.clone());
            }
        }
        None
    }
}

fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(4) as u64
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, EvergreenError> {
        self.calls.lock().push(RecordedCall {
            tag: options.tag.clone(),
            model: options.model.clone(),
            prompt: prompt.to_string(),
            has_schema: options.output_schema.is_some(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(&options.tag) {
            Some(ScriptedReply::Respond(mut invocation)) => {
                if invocation.input_tokens == 0 && invocation.output_tokens == 0 {
                    invocation.input_tokens = estimate_tokens(prompt);
                    invocation.output_tokens = estimate_tokens(&invocation.as_text());
                    invocation.cost_usd = ledger::cost_for(
                        &options.model,
                        invocation.input_tokens,
                        invocation.output_tokens,
                    );
                }
                if invocation.duration_ms == 0 {
                    invocation.duration_ms = self.delay.map_or(1, |d| d.as_millis() as u64);
                }
                Ok(invocation)
            }
            Some(ScriptedReply::Fail(error)) => Err(error.into()),
            None => Err(ProviderError::new(
                self.provider,
                StatusClass::BadRequest,
                format!("no scripted reply for '{}'", options.tag),
            )
            .into()),
        }
    }
}
