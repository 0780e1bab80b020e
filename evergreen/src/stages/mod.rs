//! Stage handlers.
//!
//! Each stage is a module exposing `run(&StageEnv) -> Result<StageOutcome>`.
//! [`dispatch`] maps a [`StageId`] to its handler with an exhaustive match,
//! so adding a stage without a handler does not compile.

mod analysis;
mod draft;
mod email;
mod format;
mod headlines;
mod outline;
mod paragraphs;
mod preprocess;
mod quotes;
mod refine;
mod social;

pub use analysis::EPISODE_FORMATS;
pub use quotes::QUOTE_USAGES;

use crate::config::EvergreenSettings;
use crate::context::ProcessingContext;
use crate::contracts::parse_structured;
use crate::core::{StageId, StageOutcome};
use crate::errors::{EvergreenError, ValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::invoker::{InvokeOptions, InvokerSet, ModelInvoker};
use crate::ledger::Usage;
use crate::pipeline::{GenerationLoop, GenerationPolicy};
use crate::prompts::{PromptRenderer, VarsBuilder};
use crate::registry::StageDescriptor;
use crate::validation::Validator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Collaborators shared by every stage handler.
pub struct StageServices {
    /// One invoker per provider.
    pub invokers: InvokerSet,
    /// Prompt template renderer.
    pub prompts: PromptRenderer,
    /// Receives retry events from generative stages.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageServices")
            .field("invokers", &self.invokers)
            .field("prompts", &self.prompts)
            .finish_non_exhaustive()
    }
}

impl StageServices {
    /// Creates services with a no-op event sink.
    #[must_use]
    pub fn new(invokers: InvokerSet, prompts: PromptRenderer) -> Self {
        Self {
            invokers,
            prompts,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

/// Everything one stage run can see. Cheap to clone into branch tasks.
#[derive(Debug, Clone)]
pub struct StageEnv {
    /// Shared read view of the run.
    pub ctx: Arc<ProcessingContext>,
    /// The running stage.
    pub descriptor: StageDescriptor,
    /// Shared collaborators.
    pub services: Arc<StageServices>,
}

impl StageEnv {
    /// Creates an environment for one stage.
    #[must_use]
    pub fn new(
        ctx: Arc<ProcessingContext>,
        descriptor: StageDescriptor,
        services: Arc<StageServices>,
    ) -> Self {
        Self {
            ctx,
            descriptor,
            services,
        }
    }

    /// The running stage.
    #[must_use]
    pub const fn id(&self) -> StageId {
        self.descriptor.id
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    /// Run settings.
    #[must_use]
    pub fn settings(&self) -> &EvergreenSettings {
        &self.ctx.settings
    }

    /// The invoker for this stage's provider.
    pub fn invoker(&self) -> Result<&dyn ModelInvoker, EvergreenError> {
        self.services
            .invokers
            .get(self.descriptor.provider)
            .map(|invoker| &**invoker)
    }

    /// Invocation options from the descriptor. `branch` distinguishes
    /// fan-out calls, giving tags like `social_content:twitter`.
    #[must_use]
    pub fn options(&self, branch: Option<&str>) -> InvokeOptions {
        let slug = self.id().slug();
        let tag = branch.map_or_else(|| slug.to_string(), |b| format!("{slug}:{b}"));
        InvokeOptions::new(self.descriptor.model.clone())
            .with_temperature(self.descriptor.temperature)
            .with_max_tokens(self.descriptor.max_tokens)
            .with_tag(tag)
    }

    /// Renders a template, supplying the brand voice as `voice`.
    pub fn render(&self, template: &str, vars: VarsBuilder) -> Result<String, EvergreenError> {
        let brand = &self.settings().brand;
        let voice_vars = VarsBuilder::new()
            .set("brand_name", &brand.name)
            .set("tone", &brand.tone)
            .set("audience", &brand.audience)
            .set("avoid", brand.avoid.join(", "))
            .build();
        let voice = self.services.prompts.render("voice", &voice_vars)?;
        self.services
            .prompts
            .render(template, &vars.set("voice", voice).build())
    }

    /// Retry policy for generative calls.
    #[must_use]
    pub fn policy(&self) -> GenerationPolicy {
        GenerationPolicy::from_settings(&self.settings().pipeline)
    }

    /// A retry loop for one generative call site.
    pub fn generation<'a>(
        &'a self,
        options: &'a InvokeOptions,
    ) -> Result<GenerationLoop<'a>, EvergreenError> {
        Ok(GenerationLoop::new(
            self.invoker()?,
            options,
            self.policy(),
            self.services.events.as_ref(),
            self.run_id(),
        ))
    }

    /// One schema-constrained call whose result must pass `validator`.
    ///
    /// # Errors
    ///
    /// Provider errors propagate; an unparseable response or any rule
    /// violation is a `ValidationError`.
    pub async fn extract<T>(
        &self,
        prompt: &str,
        schema: serde_json::Value,
        validator: &Validator,
    ) -> Result<(T, Usage), EvergreenError>
    where
        T: DeserializeOwned + Serialize,
    {
        let options = self.options(None).with_schema(schema);
        let invocation = self.invoker()?.invoke(prompt, &options).await?;
        let value: T = parse_structured(&invocation).map_err(|e| {
            ValidationError::new(
                self.id().slug(),
                format!("response is not valid structured output: {e}"),
            )
        })?;
        validator.enforce(&value)?;
        debug!(run_id = %self.run_id(), stage = %self.id(), "Structured output accepted");
        Ok((value, invocation.usage()))
    }
}

/// Runs the handler for the environment's stage.
///
/// # Errors
///
/// Propagates the handler's error.
pub async fn dispatch(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    match env.id() {
        StageId::Preprocessing => preprocess::run(env).await,
        StageId::TranscriptAnalysis => analysis::run(env).await,
        StageId::QuoteExtraction => quotes::run(env).await,
        StageId::BlogOutline => outline::run(env).await,
        StageId::ParagraphDetails => paragraphs::run(env).await,
        StageId::Headlines => headlines::run(env).await,
        StageId::DraftGeneration => draft::run(env).await,
        StageId::Refinement => refine::run(env).await,
        StageId::SocialContent => social::run(env).await,
        StageId::EmailCampaign => email::run(env).await,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::invoker::{Invocation, MockModelInvoker};

    #[tokio::test]
    async fn test_options_tag_and_sampling() {
        let ctx = context_with(EvergreenSettings::default(), "hello", Vec::new());
        let env = env_for(ctx, StageId::SocialContent, Arc::new(MockModelInvoker::new()));

        let options = env.options(Some("twitter"));
        assert_eq!(options.tag, "social_content:twitter");
        assert_eq!(options.model, env.descriptor.model);
        assert_eq!(env.options(None).tag, "social_content");
    }

    #[tokio::test]
    async fn test_render_injects_voice() {
        let ctx = context_with(EvergreenSettings::default(), "hello", Vec::new());
        let env = env_for(ctx, StageId::Headlines, Arc::new(MockModelInvoker::new()));
        let brand = env.settings().brand.name.clone();

        let prompt = env
            .render(
                "headlines",
                VarsBuilder::new().set("episode_crux", "crux").set("outline", "outline"),
            )
            .unwrap();
        assert!(prompt.contains(&brand));
        assert!(prompt.contains("crux"));
    }

    #[tokio::test]
    async fn test_extract_rejects_unparseable_output() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .returning(|_, _| Ok(Invocation::text("no json here")));
        let ctx = context_with(EvergreenSettings::default(), "hello", Vec::new());
        let env = env_for(ctx, StageId::TranscriptAnalysis, Arc::new(mock));

        let err = env
            .extract::<crate::core::TranscriptAnalysis>(
                "p",
                serde_json::json!({}),
                &Validator::new("x"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EvergreenError::Validation(_)));
    }
}
