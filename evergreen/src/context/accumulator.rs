//! Append-only store of completed stage results.

use crate::core::{StageId, StageOutputKind, StageResult};
use crate::errors::EvergreenError;
use std::sync::{Arc, OnceLock};

/// One write-once slot per stage, indexed by [`StageId`].
///
/// Each slot is written at most once and never mutated afterwards, so
/// concurrent readers need no lock. Writing a slot twice is an error.
#[derive(Debug, Default)]
pub struct PreviousStages {
    slots: [OnceLock<Arc<StageResult>>; StageId::COUNT],
}

impl PreviousStages {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed stage result.
    ///
    /// # Errors
    ///
    /// Returns `SlotConflict` if the stage already has a result.
    pub fn append(&self, result: StageResult) -> Result<(), EvergreenError> {
        let stage = result.stage;
        self.slots[stage.index()]
            .set(Arc::new(result))
            .map_err(|_| EvergreenError::SlotConflict(stage))
    }

    /// Gets a stage's result.
    #[must_use]
    pub fn get(&self, stage: StageId) -> Option<&Arc<StageResult>> {
        self.slots[stage.index()].get()
    }

    /// Returns true if the stage has completed.
    #[must_use]
    pub fn contains(&self, stage: StageId) -> bool {
        self.get(stage).is_some()
    }

    /// Typed output lookup; the slot is fixed by the output type.
    #[must_use]
    pub fn output<T: StageOutputKind>(&self) -> Option<&T> {
        self.get(T::STAGE).and_then(|result| result.output::<T>())
    }

    /// Completed results in stage order.
    pub fn results(&self) -> impl Iterator<Item = &Arc<StageResult>> {
        self.slots.iter().filter_map(OnceLock::get)
    }

    /// Number of completed stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results().count()
    }

    /// Returns true if no stage has completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
