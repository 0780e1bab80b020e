//! Per-stage execution wrapper.

use crate::context::ProcessingContext;
use crate::core::{StageId, StageResult};
use crate::errors::{EvergreenError, ProcessingError};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::invoker::normalize_overflow;
use crate::ledger::Usage;
use crate::metering::{record_detached, NoOpMeter, UsageMeter, UsageRecord};
use crate::observability::SpanTimer;
use crate::registry::StageDescriptor;
use crate::stages::{dispatch, StageEnv, StageServices};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Runs one stage: resolve, dispatch, time, normalize, classify, log, meter.
#[derive(Clone)]
pub struct StageRunner {
    services: Arc<StageServices>,
    meter: Arc<dyn UsageMeter>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner with no-op metering and events.
    #[must_use]
    pub fn new(services: Arc<StageServices>) -> Self {
        Self {
            services,
            meter: Arc::new(NoOpMeter),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the usage meter.
    #[must_use]
    pub fn with_meter(mut self, meter: Arc<dyn UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs a stage by numeric id.
    ///
    /// An id outside the registered set fails before anything is logged,
    /// metered or emitted.
    ///
    /// # Errors
    ///
    /// Validation and processing errors pass through unchanged. Provider
    /// errors pass through unless they are transient, which means retries
    /// ran out; those and every non-domain error are wrapped in a
    /// `ProcessingError` for the stage.
    pub async fn run(
        &self,
        stage_id: u8,
        ctx: &Arc<ProcessingContext>,
    ) -> Result<StageResult, EvergreenError> {
        let stage = StageId::from_number(stage_id)
            .ok_or_else(|| ProcessingError::unknown_stage(stage_id, ctx.run_id))?;
        self.run_stage(stage, ctx).await
    }

    /// Runs a known stage.
    ///
    /// # Errors
    ///
    /// See [`StageRunner::run`].
    pub async fn run_stage(
        &self,
        stage: StageId,
        ctx: &Arc<ProcessingContext>,
    ) -> Result<StageResult, EvergreenError> {
        let descriptor = ctx.registry.get(stage).clone();
        let run_id = ctx.run_id;
        self.events.try_emit(
            types::STAGE_STARTED,
            json!({"run_id": run_id.to_string(), "stage": stage.slug()}),
        );

        let env = StageEnv::new(Arc::clone(ctx), descriptor.clone(), Arc::clone(&self.services));
        let timer = SpanTimer::start(stage.slug());
        let outcome = dispatch(&env).await;
        let duration_ms = timer.finish();

        let result = outcome.and_then(|outcome| {
            let result = StageResult::from_outcome(stage, outcome, duration_ms);
            if result.has_output() {
                Ok(result)
            } else {
                Err(ProcessingError::new(stage, run_id, "stage produced no output").into())
            }
        });

        match result {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    stage = %stage,
                    provider = %descriptor.provider,
                    model = %descriptor.model,
                    duration_ms,
                    input_tokens = result.input_tokens(),
                    output_tokens = result.output_tokens(),
                    cost_usd = result.cost_usd(),
                    skipped = result.skipped,
                    attempts = result.attempts,
                    issues = result.validation_issues.len(),
                    "Stage completed"
                );
                self.meter(ctx, &descriptor, result.usage, true);
                let event = if result.skipped {
                    types::STAGE_SKIPPED
                } else {
                    types::STAGE_COMPLETED
                };
                self.events.try_emit(
                    event,
                    json!({
                        "run_id": run_id.to_string(),
                        "stage": stage.slug(),
                        "duration_ms": duration_ms,
                        "validation_issues": result.validation_issues,
                    }),
                );
                Ok(result)
            }
            Err(err) => {
                let err = classify_failure(stage, run_id, err);
                error!(
                    run_id = %run_id,
                    stage = %stage,
                    provider = %descriptor.provider,
                    duration_ms,
                    error_kind = err.kind(),
                    token_limit = err.is_token_limit(),
                    error = %err,
                    "Stage failed"
                );
                self.meter(ctx, &descriptor, Usage::default().with_duration(duration_ms), false);
                self.events.try_emit(
                    types::STAGE_FAILED,
                    json!({
                        "run_id": run_id.to_string(),
                        "stage": stage.slug(),
                        "duration_ms": duration_ms,
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    fn meter(
        &self,
        ctx: &ProcessingContext,
        descriptor: &StageDescriptor,
        usage: Usage,
        success: bool,
    ) {
        let record = UsageRecord {
            run_id: ctx.run_id,
            stage: descriptor.id,
            provider: descriptor.provider,
            model: descriptor.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: usage.cost_usd,
            latency_ms: usage.duration_ms,
            success,
            recorded_at: Utc::now(),
        };
        drop(record_detached(Arc::clone(&self.meter), record));
    }
}

/// Maps a handler error onto what callers of the runner see.
///
/// Overflow wording from any invoker becomes the token-limit error. A
/// transient provider error reaching this layer has already used up its
/// retries and is reported as a terminal `ProcessingError`. Other domain
/// errors pass through; everything else is wrapped.
fn classify_failure(stage: StageId, run_id: Uuid, err: EvergreenError) -> EvergreenError {
    match err {
        EvergreenError::Provider(provider) => {
            let provider = normalize_overflow(provider);
            if provider.is_transient() {
                ProcessingError::retries_exhausted(stage, run_id, provider.into()).into()
            } else {
                provider.into()
            }
        }
        err if err.is_domain() => err,
        err => ProcessingError::wrap(stage, run_id, err).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvergreenSettings;
    use crate::errors::{PipelineFailure, ProviderError, StatusClass, TOKEN_LIMIT_HINT};
    use crate::events::CollectingEventSink;
    use crate::invoker::{InvokerSet, MockModelInvoker, ModelInvoker, RetryConfig, RetryingInvoker};
    use crate::metering::{CollectingMeter, MockUsageMeter};
    use crate::prompts::PromptRenderer;
    use crate::registry::StageRegistry;
    use crate::core::Provider;

    fn context() -> Arc<ProcessingContext> {
        let settings = EvergreenSettings::default();
        let registry = Arc::new(StageRegistry::standard(&settings).unwrap());
        Arc::new(ProcessingContext::new("a short transcript", Arc::new(settings), registry))
    }

    fn services(mock: MockModelInvoker) -> Arc<StageServices> {
        let mock: Arc<dyn ModelInvoker> = Arc::new(mock);
        let invokers = InvokerSet::new()
            .with(Provider::Anthropic, Arc::clone(&mock))
            .with(Provider::OpenAi, mock);
        Arc::new(StageServices::new(invokers, PromptRenderer::builtin()))
    }

    async fn settle() {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_unknown_stage_has_no_side_effects() {
        let events = Arc::new(CollectingEventSink::new());
        let mut meter = MockUsageMeter::new();
        meter.expect_record().never();
        let runner = StageRunner::new(services(MockModelInvoker::new()))
            .with_meter(Arc::new(meter))
            .with_events(events.clone());
        let ctx = context();

        let err = runner.run(42, &ctx).await.unwrap_err();
        match err {
            EvergreenError::Processing(e) => {
                assert_eq!(e.stage_id, 42);
                assert_eq!(e.run_id, ctx.run_id);
            }
            other => panic!("unexpected error: {other}"),
        }
        settle().await;
        assert!(events.is_empty());
        assert!(ctx.previous_stages.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_stage_is_metered_and_reported() {
        let events = Arc::new(CollectingEventSink::new());
        let meter = Arc::new(CollectingMeter::new());
        let runner = StageRunner::new(services(MockModelInvoker::new()))
            .with_meter(meter.clone())
            .with_events(events.clone());

        let result = runner.run(0, &context()).await.unwrap();
        assert!(result.skipped);
        assert!(result.has_output());

        settle().await;
        assert_eq!(events.types(), vec![types::STAGE_STARTED, types::STAGE_SKIPPED]);
        let records = meter.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].stage, StageId::Preprocessing);
    }

    #[tokio::test]
    async fn test_provider_error_passes_through() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .returning(|_, _| Err(ProviderError::token_limit(Provider::Anthropic).into()));
        let meter = Arc::new(CollectingMeter::new());
        let runner = StageRunner::new(services(mock)).with_meter(meter.clone());

        let err = runner.run(1, &context()).await.unwrap_err();
        match err {
            EvergreenError::Provider(e) => {
                assert!(e.is_token_limit);
                assert_eq!(e.status_class, StatusClass::ContentTooLong);
            }
            other => panic!("unexpected error: {other}"),
        }
        settle().await;
        assert!(!meter.records()[0].success);
    }

    #[tokio::test]
    async fn test_overflow_wording_is_reported_as_token_limit() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke().returning(|_, _| {
            Err(ProviderError::new(
                Provider::Anthropic,
                StatusClass::BadRequest,
                "prompt is too long: 210000 tokens > 200000 maximum",
            )
            .into())
        });
        let runner = StageRunner::new(services(mock));
        let ctx = context();

        let err = runner.run(1, &ctx).await.unwrap_err();
        assert!(err.is_token_limit());
        assert!(matches!(
            err,
            EvergreenError::Provider(ref e) if e.status_class == StatusClass::ContentTooLong
        ));
        let failure = PipelineFailure::new(ctx.run_id, err).with_stage(StageId::TranscriptAnalysis);
        assert_eq!(failure.hint(), Some(TOKEN_LIMIT_HINT));
    }

    #[tokio::test]
    async fn test_exhausted_transient_error_is_terminal() {
        let mut mock = MockModelInvoker::new();
        mock.expect_provider().return_const(Provider::Anthropic);
        mock.expect_invoke().times(2).returning(|_, _| {
            let err =
                ProviderError::new(Provider::Anthropic, StatusClass::RateLimited, "slow down");
            Err(err.into())
        });
        let retry = RetryConfig::new()
            .with_max_attempts(2)
            .with_base_delay_ms(1)
            .without_jitter();
        let invoker: Arc<dyn ModelInvoker> = Arc::new(RetryingInvoker::new(Arc::new(mock), retry));
        let invokers = InvokerSet::new()
            .with(Provider::Anthropic, Arc::clone(&invoker))
            .with(Provider::OpenAi, invoker);
        let services = StageServices::new(invokers, PromptRenderer::builtin());
        let runner = StageRunner::new(Arc::new(services));

        let err = runner.run(1, &context()).await.unwrap_err();
        assert_eq!(err.kind(), "processing");
        assert!(!err.is_transient());
        match err {
            EvergreenError::Processing(e) => {
                assert_eq!(e.stage_name, "Transcript Analysis");
                assert!(e.message.starts_with("retries exhausted"));
                assert!(matches!(
                    e.cause.as_deref(),
                    Some(EvergreenError::Provider(p)) if p.status_class == StatusClass::RateLimited
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_domain_error_is_wrapped() {
        let runner = StageRunner::new(Arc::new(StageServices::new(
            InvokerSet::new(),
            PromptRenderer::builtin(),
        )));

        let err = runner.run(1, &context()).await.unwrap_err();
        match err {
            EvergreenError::Processing(e) => {
                assert_eq!(e.stage_id, 1);
                assert_eq!(e.stage_name, "Transcript Analysis");
                assert!(matches!(e.cause.as_deref(), Some(EvergreenError::Config(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failing_meter_never_fails_stage() {
        let mut meter = MockUsageMeter::new();
        meter
            .expect_record()
            .returning(|_| Err(EvergreenError::Internal("meter down".to_string())));
        let runner =
            StageRunner::new(services(MockModelInvoker::new())).with_meter(Arc::new(meter));

        assert!(runner.run(0, &context()).await.is_ok());
        settle().await;
    }
}
