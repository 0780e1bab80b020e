//! Model invocation.
//!
//! Stages talk to models only through the [`ModelInvoker`] trait. Provider
//! back-ends differ in transport, never in shape: every call returns an
//! [`Invocation`] with text and/or a structured value plus usage.

pub mod backoff;
pub mod classify;
#[cfg(feature = "http")]
pub mod http;
mod retrying;

pub use backoff::{Backoff, RetryConfig};
pub use classify::{classify_status, is_token_limit_message, normalize_overflow};
#[cfg(feature = "http")]
pub use http::ChatCompletionsInvoker;
pub use retrying::RetryingInvoker;

use crate::core::Provider;
use crate::errors::EvergreenError;
use crate::ledger::Usage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOptions {
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// JSON schema the response must follow, if structured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Label identifying the call site, e.g. `social_content:linkedin`.
    #[serde(default)]
    pub tag: String,
}

impl InvokeOptions {
    /// Creates options for a model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2048,
            output_schema: None,
            tag: String::new(),
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the completion token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Requests a structured response following a schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Sets the call-site tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

/// A completed model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Free-text response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Schema-constrained response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost in USD.
    pub cost_usd: f64,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl Invocation {
    /// A text response.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A structured response.
    #[must_use]
    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            structured: Some(value),
            ..Self::default()
        }
    }

    /// Sets token counts and cost.
    #[must_use]
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost_usd = cost_usd;
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Usage of this call.
    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage::new(
            self.input_tokens,
            self.output_tokens,
            self.cost_usd,
            self.duration_ms,
        )
    }

    /// The response as text, rendering structured values as JSON.
    #[must_use]
    pub fn as_text(&self) -> String {
        match (&self.text, &self.structured) {
            (Some(text), _) => text.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Sends prompts to one model provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// The provider this invoker talks to.
    fn provider(&self) -> Provider;

    /// Sends a prompt.
    ///
    /// # Errors
    ///
    /// Returns a `Provider` error when the call fails.
    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, EvergreenError>;
}

/// One invoker per provider.
#[derive(Clone, Default)]
pub struct InvokerSet {
    invokers: HashMap<Provider, Arc<dyn ModelInvoker>>,
}

impl std::fmt::Debug for InvokerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokerSet")
            .field("providers", &self.invokers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InvokerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the invoker for a provider, replacing any previous one.
    pub fn insert(&mut self, provider: Provider, invoker: Arc<dyn ModelInvoker>) {
        self.invokers.insert(provider, invoker);
    }

    /// Sets the invoker for a provider.
    #[must_use]
    pub fn with(mut self, provider: Provider, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.insert(provider, invoker);
        self
    }

    /// Returns true if the provider has an invoker.
    #[must_use]
    pub fn contains(&self, provider: Provider) -> bool {
        self.invokers.contains_key(&provider)
    }

    /// Gets the invoker for a provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no invoker is registered.
    pub fn get(&self, provider: Provider) -> Result<&Arc<dyn ModelInvoker>, EvergreenError> {
        self.invokers.get(&provider).ok_or_else(|| {
            EvergreenError::Config(format!("no model invoker registered for provider '{provider}'"))
        })
    }

    /// Wraps every invoker in a [`RetryingInvoker`].
    #[must_use]
    pub fn with_retry(self, config: &RetryConfig) -> Self {
        let invokers = self
            .invokers
            .into_iter()
            .map(|(provider, inner)| {
                let wrapped: Arc<dyn ModelInvoker> =
                    Arc::new(RetryingInvoker::new(inner, config.clone()));
                (provider, wrapped)
            })
            .collect();
        Self { invokers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_usage() {
        let invocation = Invocation::text("hello")
            .with_usage(10, 20, 0.5)
            .with_duration_ms(40);
        let usage = invocation.usage();

        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.duration_ms, 40);
    }

    #[test]
    fn test_as_text_prefers_text() {
        assert_eq!(Invocation::text("a").as_text(), "a");
        assert_eq!(
            Invocation::structured(serde_json::json!({"k": 1})).as_text(),
            r#"{"k":1}"#
        );
        assert_eq!(Invocation::default().as_text(), "");
    }

    #[test]
    fn test_invoker_set_missing_provider() {
        let set = InvokerSet::new();
        let err = set.get(Provider::OpenAi).err().unwrap();
        assert!(matches!(err, EvergreenError::Config(_)));
    }

    #[tokio::test]
    async fn test_mock_invoker_in_set() {
        let mut mock = MockModelInvoker::new();
        mock.expect_provider().return_const(Provider::Anthropic);
        mock.expect_invoke()
            .returning(|_, _| Ok(Invocation::text("mocked")));

        let set = InvokerSet::new().with(Provider::Anthropic, Arc::new(mock));
        let invoker = set.get(Provider::Anthropic).unwrap();

        let result = invoker
            .invoke("prompt", &InvokeOptions::new("claude-sonnet-4-5"))
            .await
            .unwrap();
        assert_eq!(result.text.as_deref(), Some("mocked"));
        assert_eq!(invoker.provider(), Provider::Anthropic);
    }
}
