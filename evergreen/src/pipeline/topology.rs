//! The fixed execution plan.
//!
//! Seven execution phases over the five logical phases. Stages inside one
//! plan entry never depend on each other; every dependency edge points to an
//! earlier entry.

use crate::core::{Phase, StageId};
use std::fmt;

/// One execution phase: a set of stages launched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    /// Logical phase the members belong to.
    pub phase: Phase,
    /// Member stages, launched concurrently.
    pub stages: &'static [StageId],
}

impl PhasePlan {
    /// Label such as `plan[4,5]`.
    #[must_use]
    pub fn label(&self) -> String {
        let ids: Vec<String> = self.stages.iter().map(|s| s.number().to_string()).collect();
        format!("{}[{}]", self.phase, ids.join(","))
    }
}

impl fmt::Display for PhasePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The standard plan, in execution order.
pub const STANDARD_PLAN: [PhasePlan; 7] = [
    PhasePlan {
        phase: Phase::Pregate,
        stages: &[StageId::Preprocessing],
    },
    PhasePlan {
        phase: Phase::Extract,
        stages: &[StageId::TranscriptAnalysis, StageId::QuoteExtraction],
    },
    PhasePlan {
        phase: Phase::Plan,
        stages: &[StageId::BlogOutline],
    },
    PhasePlan {
        phase: Phase::Plan,
        stages: &[StageId::ParagraphDetails, StageId::Headlines],
    },
    PhasePlan {
        phase: Phase::Write,
        stages: &[StageId::DraftGeneration],
    },
    PhasePlan {
        phase: Phase::Write,
        stages: &[StageId::Refinement],
    },
    PhasePlan {
        phase: Phase::Distribute,
        stages: &[StageId::SocialContent, StageId::EmailCampaign],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_labels() {
        let labels: Vec<String> = STANDARD_PLAN.iter().map(PhasePlan::label).collect();
        assert_eq!(
            labels,
            vec![
                "pregate[0]",
                "extract[1,2]",
                "plan[3]",
                "plan[4,5]",
                "write[6]",
                "write[7]",
                "distribute[8,9]",
            ]
        );
    }

    #[test]
    fn test_every_stage_planned_once_in_order() {
        let planned: Vec<StageId> = STANDARD_PLAN
            .iter()
            .flat_map(|p| p.stages.iter().copied())
            .collect();
        assert_eq!(planned, StageId::ALL.to_vec());
    }

    #[test]
    fn test_members_share_logical_phase() {
        for plan in STANDARD_PLAN {
            assert!(plan.stages.iter().all(|s| s.phase() == plan.phase), "{plan}");
        }
    }
}
