//! Test assertions for stage results and run reports.

use crate::core::{StageId, StageResult};
use crate::pipeline::RunReport;

/// Asserts that a result carries output and no validation issues.
pub fn assert_stage_clean(result: &StageResult) {
    assert!(
        result.has_output(),
        "Expected stage '{}' to have output",
        result.stage.slug()
    );
    assert!(
        result.is_valid(),
        "Expected stage '{}' to be valid, got issues: {:?}",
        result.stage.slug(),
        result.validation_issues
    );
}

/// Asserts that a result was skipped.
pub fn assert_stage_skipped(result: &StageResult) {
    assert!(
        result.skipped,
        "Expected stage '{}' to be skipped",
        result.stage.slug()
    );
}

/// Asserts that a result kept its output but reported issues.
pub fn assert_stage_degraded(result: &StageResult) {
    assert!(
        result.has_output() && !result.validation_issues.is_empty(),
        "Expected stage '{}' to have output with issues, got {} issues",
        result.stage.slug(),
        result.validation_issues.len()
    );
}

/// Asserts that every stage produced a result, in phase order.
pub fn assert_all_stages_ran(report: &RunReport) {
    let ran: Vec<StageId> = report.results.iter().map(|r| r.stage).collect();
    assert_eq!(
        ran,
        StageId::ALL.to_vec(),
        "Expected every stage in order, got {ran:?}"
    );
}

/// Asserts that the report's total cost equals the sum of stage costs.
pub fn assert_cost_reconciles(report: &RunReport) {
    let sum: f64 = report.results.iter().map(StageResult::cost_usd).sum();
    assert!(
        (report.total_usage.cost_usd - sum).abs() < 1e-9,
        "Expected total cost {} to equal stage sum {sum}",
        report.total_usage.cost_usd
    );
}
