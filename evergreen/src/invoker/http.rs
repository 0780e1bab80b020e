//! Generic chat-completions back-end over HTTP.
//!
//! Both providers expose an OpenAI-compatible `/chat/completions` endpoint,
//! so one client covers them; the provider tag only selects credentials,
//! base URL and error attribution.

use super::classify::classify_response;
use super::{InvokeOptions, Invocation, ModelInvoker};
use crate::config::HttpProviderSettings;
use crate::core::Provider;
use crate::errors::{EvergreenError, ProviderError, StatusClass};
use crate::ledger;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

/// Chat-completions invoker for one provider.
#[derive(Debug, Clone)]
pub struct ChatCompletionsInvoker {
    client: Client,
    provider: Provider,
    endpoint: String,
    api_key: String,
}

impl ChatCompletionsInvoker {
    /// Creates an invoker with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        provider: Provider,
        settings: &HttpProviderSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, EvergreenError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| EvergreenError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            provider,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Creates an invoker reading the API key from the configured env var.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the variable is unset.
    pub fn from_env(
        provider: Provider,
        settings: &HttpProviderSettings,
    ) -> Result<Self, EvergreenError> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            EvergreenError::Config(format!(
                "environment variable {} is not set (API key for {provider})",
                settings.api_key_env
            ))
        })?;
        Self::new(provider, settings, api_key)
    }

    fn request_body(prompt: &str, options: &InvokeOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if let Some(ref schema) = options.output_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "stage_output", "schema": schema },
            });
        }
        body
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        let class = if err.is_timeout() {
            StatusClass::Timeout
        } else if err.is_connect() || err.is_request() {
            StatusClass::Network
        } else {
            StatusClass::Unknown
        };
        ProviderError::new(self.provider, class, err.to_string())
    }

    fn malformed(&self, detail: &str) -> EvergreenError {
        ProviderError::new(
            self.provider,
            StatusClass::Unknown,
            format!("malformed response: {detail}"),
        )
        .into()
    }
}

#[async_trait]
impl ModelInvoker for ChatCompletionsInvoker {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, EvergreenError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(prompt, options))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(self.provider, status.as_u16(), &body).into());
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| self.malformed(&e.to_string()))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let content = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| self.malformed("no message content"))?;
        let input_tokens = raw["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = raw["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        let cost_usd = ledger::cost_for(&options.model, input_tokens, output_tokens);

        debug!(
            provider = %self.provider,
            model = %options.model,
            tag = %options.tag,
            input_tokens,
            output_tokens,
            duration_ms,
            "Model call completed"
        );

        let structured = options
            .output_schema
            .as_ref()
            .and_then(|_| serde_json::from_str::<Value>(content).ok());
        let invocation = match structured {
            Some(value) => Invocation::structured(value),
            None => Invocation::text(content),
        };
        Ok(invocation
            .with_usage(input_tokens, output_tokens, cost_usd)
            .with_duration_ms(duration_ms))
    }
}
