//! Phase-by-phase execution of the stage graph.

use super::fanout::fan_out;
use super::runner::StageRunner;
use super::topology::{PhasePlan, STANDARD_PLAN};
use crate::context::ProcessingContext;
use crate::core::{Phase, StageId, StageOutputKind, StageResult};
use crate::errors::{EvergreenError, PipelineFailure};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::ledger::{self, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Lifecycle of one execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Not started.
    #[default]
    Pending,
    /// Stages launched.
    Running,
    /// Every stage succeeded and was committed.
    Completed,
    /// A stage failed; the run stops here.
    Failed,
}

impl PhaseState {
    /// Returns true once the phase can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Checks whether `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running) | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What happened in one execution phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Label such as `plan[4,5]`.
    pub label: String,
    /// Logical phase.
    pub phase: Phase,
    /// Member stages.
    pub stages: Vec<StageId>,
    /// Current state.
    pub state: PhaseState,
    /// Parallel aggregate of the member stages.
    pub usage: Usage,
    /// When the phase was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase settled.
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseReport {
    /// A pending report for a plan entry.
    #[must_use]
    pub fn pending(plan: &PhasePlan) -> Self {
        Self {
            label: plan.label(),
            phase: plan.phase,
            stages: plan.stages.to_vec(),
            state: PhaseState::Pending,
            usage: Usage::default(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Moves to `next`, stamping the start or finish time.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an illegal transition.
    pub fn transition(&mut self, next: PhaseState) -> Result<(), EvergreenError> {
        if !self.state.can_transition_to(next) {
            return Err(EvergreenError::Internal(format!(
                "phase {} cannot move from {} to {}",
                self.label, self.state, next
            )));
        }
        let now = Utc::now();
        if next == PhaseState::Running {
            self.started_at = Some(now);
        } else {
            self.finished_at = Some(now);
        }
        self.state = next;
        Ok(())
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage results in completion-phase order.
    pub results: Vec<StageResult>,
    /// Per-phase reports in execution order.
    pub phases: Vec<PhaseReport>,
    /// Sequential aggregate over the phases.
    pub total_usage: Usage,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Result of one stage.
    #[must_use]
    pub fn get(&self, stage: StageId) -> Option<&StageResult> {
        self.results.iter().find(|result| result.stage == stage)
    }

    /// Typed output lookup.
    #[must_use]
    pub fn output<T: StageOutputKind>(&self) -> Option<&T> {
        self.get(T::STAGE).and_then(StageResult::output::<T>)
    }

    /// Every soft-validation issue, prefixed with the stage slug.
    #[must_use]
    pub fn validation_issues(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|result| {
                result
                    .validation_issues
                    .iter()
                    .map(move |issue| format!("{}: {issue}", result.stage.slug()))
            })
            .collect()
    }

    /// Returns true if no stage reported issues.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(StageResult::is_valid)
    }
}

/// Runs plan entries in order, stages within an entry concurrently.
///
/// A phase's results are committed to the context only after every member
/// has settled, so siblings never observe each other.
#[derive(Clone)]
pub struct PhaseScheduler {
    runner: Arc<StageRunner>,
    events: Arc<dyn EventSink>,
    plan: &'static [PhasePlan],
}

impl fmt::Debug for PhaseScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.plan.iter().map(PhasePlan::label).collect();
        f.debug_struct("PhaseScheduler")
            .field("runner", &self.runner)
            .field("plan", &labels)
            .finish_non_exhaustive()
    }
}

impl PhaseScheduler {
    /// Creates a scheduler over the standard plan.
    #[must_use]
    pub fn new(runner: Arc<StageRunner>) -> Self {
        Self {
            runner,
            events: Arc::new(NoOpEventSink),
            plan: &STANDARD_PLAN,
        }
    }

    /// Sets the event sink for phase events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the plan.
    #[must_use]
    pub fn with_plan(mut self, plan: &'static [PhasePlan]) -> Self {
        self.plan = plan;
        self
    }

    /// The plan in use.
    #[must_use]
    pub fn plan(&self) -> &'static [PhasePlan] {
        self.plan
    }

    /// Runs every phase against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, tagged with its stage and phase.
    pub async fn run(&self, ctx: Arc<ProcessingContext>) -> Result<RunReport, PipelineFailure> {
        let run_id = ctx.run_id;
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(StageId::COUNT);
        let mut phases = Vec::with_capacity(self.plan.len());

        for plan in self.plan {
            let report = self.run_phase(plan, &ctx, &mut results).await?;
            phases.push(report);
        }

        let total_usage = ledger::sequential(phases.iter().map(|phase| phase.usage));
        Ok(RunReport {
            run_id,
            results,
            phases,
            total_usage,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_phase(
        &self,
        plan: &PhasePlan,
        ctx: &Arc<ProcessingContext>,
        results: &mut Vec<StageResult>,
    ) -> Result<PhaseReport, PipelineFailure> {
        let run_id = ctx.run_id;
        let label = plan.label();
        let fail =
            |error: EvergreenError| PipelineFailure::new(run_id, error).with_phase(label.clone());

        let mut report = PhaseReport::pending(plan);
        report.transition(PhaseState::Running).map_err(fail)?;
        info!(run_id = %run_id, phase = %label, "Phase started");
        self.events.try_emit(
            types::PHASE_STARTED,
            json!({"run_id": run_id.to_string(), "phase": label, "stages": plan.stages}),
        );

        let branches: Vec<_> = plan
            .stages
            .iter()
            .map(|&stage| {
                let runner = Arc::clone(&self.runner);
                let ctx = Arc::clone(ctx);
                async move { runner.run_stage(stage, &ctx).await }
            })
            .collect();

        match fan_out(branches).await {
            Ok(joined) => {
                for result in &joined.items {
                    ctx.previous_stages.append(result.clone()).map_err(fail)?;
                }
                results.extend(joined.items);
                report.usage = joined.usage;
                report.transition(PhaseState::Completed).map_err(fail)?;
                info!(
                    run_id = %run_id,
                    phase = %label,
                    cost_usd = report.usage.cost_usd,
                    duration_ms = report.usage.duration_ms,
                    "Phase completed"
                );
                self.events.try_emit(
                    types::PHASE_COMPLETED,
                    json!({
                        "run_id": run_id.to_string(),
                        "phase": label,
                        "usage": report.usage,
                    }),
                );
                Ok(report)
            }
            Err(failure) => {
                let stage = plan.stages[failure.index];
                report.transition(PhaseState::Failed).map_err(fail)?;
                error!(
                    run_id = %run_id,
                    phase = %label,
                    stage = %stage,
                    error = %failure.error,
                    "Phase failed"
                );
                self.events.try_emit(
                    types::PHASE_FAILED,
                    json!({
                        "run_id": run_id.to_string(),
                        "phase": label,
                        "stage": stage.slug(),
                        "error": failure.error.to_string(),
                    }),
                );
                Err(PipelineFailure::new(run_id, failure.error)
                    .with_stage(stage)
                    .with_phase(label))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvergreenSettings;
    use crate::core::Provider;
    use crate::errors::ProviderError;
    use crate::events::CollectingEventSink;
    use crate::invoker::{InvokerSet, MockModelInvoker, ModelInvoker};
    use crate::prompts::PromptRenderer;
    use crate::registry::StageRegistry;
    use crate::stages::StageServices;
    use pretty_assertions::assert_eq;

    static GATE_ONLY: [PhasePlan; 1] = [PhasePlan {
        phase: Phase::Pregate,
        stages: &[StageId::Preprocessing],
    }];

    static GATE_THEN_EXTRACT: [PhasePlan; 2] = [
        PhasePlan {
            phase: Phase::Pregate,
            stages: &[StageId::Preprocessing],
        },
        PhasePlan {
            phase: Phase::Extract,
            stages: &[StageId::TranscriptAnalysis, StageId::QuoteExtraction],
        },
    ];

    fn context() -> Arc<ProcessingContext> {
        let settings = EvergreenSettings::default();
        let registry = Arc::new(StageRegistry::standard(&settings).unwrap());
        Arc::new(ProcessingContext::new("short transcript", Arc::new(settings), registry))
    }

    fn runner(mock: MockModelInvoker) -> Arc<StageRunner> {
        let mock: Arc<dyn ModelInvoker> = Arc::new(mock);
        let invokers = InvokerSet::new()
            .with(Provider::Anthropic, Arc::clone(&mock))
            .with(Provider::OpenAi, mock);
        Arc::new(StageRunner::new(Arc::new(StageServices::new(
            invokers,
            PromptRenderer::builtin(),
        ))))
    }

    #[test]
    fn test_phase_state_transitions() {
        assert!(PhaseState::Pending.can_transition_to(PhaseState::Running));
        assert!(PhaseState::Running.can_transition_to(PhaseState::Failed));
        assert!(!PhaseState::Pending.can_transition_to(PhaseState::Completed));
        assert!(!PhaseState::Completed.can_transition_to(PhaseState::Running));
        assert!(PhaseState::Failed.is_terminal());
    }

    #[test]
    fn test_report_rejects_illegal_transition() {
        let mut report = PhaseReport::pending(&GATE_ONLY[0]);
        assert!(report.transition(PhaseState::Completed).is_err());
        report.transition(PhaseState::Running).unwrap();
        assert!(report.started_at.is_some());
        report.transition(PhaseState::Completed).unwrap();
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_commits_phase_results() {
        let events = Arc::new(CollectingEventSink::new());
        let scheduler = PhaseScheduler::new(runner(MockModelInvoker::new()))
            .with_plan(&GATE_ONLY)
            .with_events(events.clone());
        let ctx = context();

        let report = scheduler.run(Arc::clone(&ctx)).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.phases[0].state, PhaseState::Completed);
        assert_eq!(report.phases[0].label, "pregate[0]");
        assert!(ctx.previous_stages.contains(StageId::Preprocessing));
        assert!(report.is_clean());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(events.types(), vec![types::PHASE_STARTED, types::PHASE_COMPLETED]);
    }

    #[tokio::test]
    async fn test_failure_names_stage_and_phase() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .returning(|_, _| Err(ProviderError::token_limit(Provider::Anthropic).into()));
        let scheduler = PhaseScheduler::new(runner(mock)).with_plan(&GATE_THEN_EXTRACT);
        let ctx = context();

        let failure = scheduler.run(Arc::clone(&ctx)).await.unwrap_err();
        assert_eq!(failure.run_id, ctx.run_id);
        assert_eq!(failure.phase.as_deref(), Some("extract[1,2]"));
        assert!(matches!(
            failure.stage,
            Some(StageId::TranscriptAnalysis | StageId::QuoteExtraction)
        ));
        assert!(failure.hint().is_some());
        // The failed phase commits nothing.
        assert!(!ctx.previous_stages.contains(StageId::TranscriptAnalysis));
        assert!(!ctx.previous_stages.contains(StageId::QuoteExtraction));
        assert!(ctx.previous_stages.contains(StageId::Preprocessing));
    }

    #[test]
    fn test_standard_plan_is_default() {
        let scheduler = PhaseScheduler::new(runner(MockModelInvoker::new()));
        assert_eq!(scheduler.plan().len(), 7);
    }
}
