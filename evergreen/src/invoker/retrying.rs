//! Transient-failure retry wrapper.

use super::backoff::{Backoff, RetryConfig};
use super::{InvokeOptions, Invocation, ModelInvoker};
use crate::core::Provider;
use crate::errors::EvergreenError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retries transient provider errors with backoff; passes everything else
/// through on the first failure.
///
/// Once attempts are exhausted the last transient error is returned; the
/// stage runner reports it as a terminal `ProcessingError`.
pub struct RetryingInvoker {
    inner: Arc<dyn ModelInvoker>,
    config: RetryConfig,
}

impl std::fmt::Debug for RetryingInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInvoker")
            .field("provider", &self.inner.provider())
            .field("config", &self.config)
            .finish()
    }
}

impl RetryingInvoker {
    /// Wraps an invoker.
    #[must_use]
    pub fn new(inner: Arc<dyn ModelInvoker>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ModelInvoker for RetryingInvoker {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, EvergreenError> {
        let mut backoff = Backoff::new();
        loop {
            match self.inner.invoke(prompt, options).await {
                Ok(invocation) => return Ok(invocation),
                Err(err) if err.is_transient() => match backoff.next_delay(&self.config) {
                    Some(delay) => {
                        debug!(
                            provider = %self.provider(),
                            tag = %options.tag,
                            attempt = backoff.attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying after transient provider error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            provider = %self.provider(),
                            tag = %options.tag,
                            attempts = self.config.max_attempts,
                            error = %err,
                            "Provider retries exhausted"
                        );
                        return Err(err);
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, StatusClass};
    use crate::invoker::MockModelInvoker;
    use mockall::Sequence;

    fn fast_config(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .without_jitter()
    }

    fn transient() -> EvergreenError {
        ProviderError::new(Provider::OpenAi, StatusClass::RateLimited, "slow down").into()
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mut mock = MockModelInvoker::new();
        let mut seq = Sequence::new();
        mock.expect_provider().return_const(Provider::OpenAi);
        mock.expect_invoke()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(transient()));
        mock.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Invocation::text("done")));

        let invoker = RetryingInvoker::new(Arc::new(mock), fast_config(3));
        let result = invoker
            .invoke("p", &InvokeOptions::new("gpt-4.1-mini"))
            .await
            .unwrap();

        assert_eq!(result.text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let mut mock = MockModelInvoker::new();
        mock.expect_provider().return_const(Provider::OpenAi);
        mock.expect_invoke().times(2).returning(|_, _| Err(transient()));

        let invoker = RetryingInvoker::new(Arc::new(mock), fast_config(2));
        let err = invoker
            .invoke("p", &InvokeOptions::new("gpt-4.1-mini"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EvergreenError::Provider(ref e) if e.status_class == StatusClass::RateLimited
        ));
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let mut mock = MockModelInvoker::new();
        mock.expect_provider().return_const(Provider::Anthropic);
        mock.expect_invoke()
            .times(1)
            .returning(|_, _| Err(ProviderError::token_limit(Provider::Anthropic).into()));

        let invoker = RetryingInvoker::new(Arc::new(mock), fast_config(5));
        let err = invoker
            .invoke("p", &InvokeOptions::new("claude-sonnet-4-5"))
            .await
            .unwrap_err();

        assert!(err.is_token_limit());
    }
}
