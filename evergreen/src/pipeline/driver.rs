//! Pipeline driver: transcript and settings in, run report out.

use super::runner::StageRunner;
use super::scheduler::{PhaseScheduler, RunReport};
use crate::config::EvergreenSettings;
use crate::context::ProcessingContext;
use crate::core::{Provider, StageResult};
use crate::errors::{EvergreenError, PipelineFailure};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::invoker::{InvokerSet, ModelInvoker};
use crate::metering::{NoOpMeter, UsageMeter};
use crate::observability::SpanTimer;
use crate::prompts::{BuiltinTemplates, PromptRenderer, TemplateCache, TemplateSource};
use crate::registry::StageRegistry;
use crate::stages::StageServices;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    settings: EvergreenSettings,
    invokers: InvokerSet,
    meter: Arc<dyn UsageMeter>,
    events: Arc<dyn EventSink>,
    templates: Arc<dyn TemplateSource>,
    cache: Arc<TemplateCache>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            settings: EvergreenSettings::default(),
            invokers: InvokerSet::new(),
            meter: Arc::new(NoOpMeter),
            events: Arc::new(NoOpEventSink),
            templates: Arc::new(BuiltinTemplates),
            cache: Arc::new(TemplateCache::new()),
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("settings", &self.settings)
            .field("invokers", &self.invokers)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a builder with default settings and no invokers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EvergreenSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Registers the invoker for one provider.
    #[must_use]
    pub fn with_invoker(mut self, provider: Provider, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invokers.insert(provider, invoker);
        self
    }

    /// Replaces every registered invoker.
    #[must_use]
    pub fn with_invokers(mut self, invokers: InvokerSet) -> Self {
        self.invokers = invokers;
        self
    }

    /// Sets the usage meter.
    #[must_use]
    pub fn with_meter(mut self, meter: Arc<dyn UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    /// Sets the event sink shared by the driver, scheduler, runner and stages.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the template source and the cache the renderer should use.
    #[must_use]
    pub fn with_templates(
        mut self,
        source: Arc<dyn TemplateSource>,
        cache: Arc<TemplateCache>,
    ) -> Self {
        self.templates = source;
        self.cache = cache;
        self
    }

    /// Validates everything and assembles the pipeline.
    ///
    /// Every invoker is wrapped in the provider retry policy from the
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for invalid settings or a missing provider,
    /// and a `Registry` error if the stage graph is inconsistent.
    pub fn build(self) -> Result<Pipeline, EvergreenError> {
        self.settings.validate()?;
        let registry = StageRegistry::standard(&self.settings)?;

        let missing: Vec<String> = [Provider::Anthropic, Provider::OpenAi]
            .into_iter()
            .filter(|provider| !self.invokers.contains(*provider))
            .map(|provider| provider.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EvergreenError::Config(format!(
                "no model invoker registered for: {}",
                missing.join(", ")
            )));
        }

        let invokers = self.invokers.with_retry(&self.settings.pipeline.provider_retry);
        let prompts = PromptRenderer::new(self.templates, self.cache);
        let services =
            Arc::new(StageServices::new(invokers, prompts).with_events(Arc::clone(&self.events)));
        let runner = Arc::new(
            StageRunner::new(services)
                .with_meter(self.meter)
                .with_events(Arc::clone(&self.events)),
        );
        let scheduler =
            PhaseScheduler::new(Arc::clone(&runner)).with_events(Arc::clone(&self.events));

        Ok(Pipeline {
            settings: Arc::new(self.settings),
            registry: Arc::new(registry),
            runner,
            scheduler,
            events: self.events,
        })
    }
}

/// A ready-to-run pipeline.
///
/// Cheap to share: every run gets its own [`ProcessingContext`], so one
/// pipeline can serve concurrent runs.
pub struct Pipeline {
    settings: Arc<EvergreenSettings>,
    registry: Arc<StageRegistry>,
    runner: Arc<StageRunner>,
    scheduler: PhaseScheduler,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The validated settings.
    #[must_use]
    pub fn settings(&self) -> &EvergreenSettings {
        &self.settings
    }

    /// The stage registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Creates a fresh context for a transcript.
    #[must_use]
    pub fn new_context(&self, transcript: impl Into<String>) -> Arc<ProcessingContext> {
        Arc::new(ProcessingContext::new(
            transcript,
            Arc::clone(&self.settings),
            Arc::clone(&self.registry),
        ))
    }

    /// Runs every phase over a transcript with a fresh run id.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable failure.
    pub async fn run(&self, transcript: impl Into<String>) -> Result<RunReport, PipelineFailure> {
        self.run_with_id(Uuid::new_v4(), transcript).await
    }

    /// Runs every phase under a caller-supplied run id.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable failure.
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        transcript: impl Into<String>,
    ) -> Result<RunReport, PipelineFailure> {
        let ctx = Arc::new(ProcessingContext::with_run_id(
            run_id,
            transcript,
            Arc::clone(&self.settings),
            Arc::clone(&self.registry),
        ));
        let timer = SpanTimer::start("pipeline");
        info!(
            run_id = %run_id,
            transcript_chars = ctx.raw_transcript.len(),
            draft_mode = ?self.settings.draft_mode,
            social_mode = ?self.settings.social_mode,
            "Pipeline started"
        );
        self.events.try_emit(
            types::PIPELINE_STARTED,
            json!({"run_id": run_id.to_string(), "transcript_chars": ctx.raw_transcript.len()}),
        );

        match self.scheduler.run(ctx).await {
            Ok(report) => {
                let duration_ms = timer.finish();
                info!(
                    run_id = %run_id,
                    duration_ms,
                    input_tokens = report.total_usage.input_tokens,
                    output_tokens = report.total_usage.output_tokens,
                    cost_usd = report.total_usage.cost_usd,
                    issues = report.validation_issues().len(),
                    "Pipeline completed"
                );
                self.events.try_emit(
                    types::PIPELINE_COMPLETED,
                    json!({
                        "run_id": run_id.to_string(),
                        "duration_ms": duration_ms,
                        "usage": report.total_usage,
                    }),
                );
                Ok(report)
            }
            Err(failure) => {
                let duration_ms = timer.finish();
                error!(
                    run_id = %run_id,
                    duration_ms,
                    stage = failure.stage_name(),
                    hint = failure.hint(),
                    error = %failure.error,
                    "Pipeline failed"
                );
                self.events
                    .try_emit(types::PIPELINE_FAILED, json!(failure.to_dict()));
                Err(failure)
            }
        }
    }

    /// Runs a single stage by numeric id against an existing context.
    ///
    /// The result is returned, not committed; callers driving stages by
    /// hand append it to `ctx.previous_stages` themselves.
    ///
    /// # Errors
    ///
    /// See [`StageRunner::run`].
    pub async fn run_stage(
        &self,
        stage_id: u8,
        ctx: &Arc<ProcessingContext>,
    ) -> Result<StageResult, EvergreenError> {
        self.runner.run(stage_id, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::MockModelInvoker;
    use crate::core::StageId;

    fn mock() -> Arc<dyn ModelInvoker> {
        Arc::new(MockModelInvoker::new())
    }

    #[test]
    fn test_build_requires_both_providers() {
        let err = Pipeline::builder()
            .with_invoker(Provider::Anthropic, mock())
            .build()
            .unwrap_err();
        match err {
            EvergreenError::Config(message) => assert!(message.contains("openai")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_build_rejects_invalid_settings() {
        let settings = EvergreenSettings::default().with_platforms(Vec::new());
        let result = Pipeline::builder()
            .with_settings(settings)
            .with_invoker(Provider::Anthropic, mock())
            .with_invoker(Provider::OpenAi, mock())
            .build();
        assert!(matches!(result, Err(EvergreenError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stage_by_number() {
        let pipeline = Pipeline::builder()
            .with_invoker(Provider::Anthropic, mock())
            .with_invoker(Provider::OpenAi, mock())
            .build()
            .unwrap();
        let ctx = pipeline.new_context("a short transcript");

        let result = pipeline.run_stage(0, &ctx).await.unwrap();
        assert_eq!(result.stage, StageId::Preprocessing);
        assert!(result.skipped);
        assert!(ctx.previous_stages.is_empty());

        assert!(matches!(
            pipeline.run_stage(10, &ctx).await,
            Err(EvergreenError::Processing(_))
        ));
    }
}
