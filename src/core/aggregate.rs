//! Outcome aggregation into the run summary.

use crate::domain::{OverallStatus, RunSummary, VolumeOutcome};

/// Classify a run from its success count.
///
/// A run with no volumes is a `Fault`: an empty filter must not report success.
pub fn classify(succeeded: usize, total: usize) -> OverallStatus {
    if total > 0 && succeeded == total {
        OverallStatus::Successful
    } else if succeeded > 0 {
        OverallStatus::Partial
    } else {
        OverallStatus::Fault
    }
}

/// Tally outcomes into a summary
pub fn aggregate(total_instances: usize, outcomes: &[VolumeOutcome]) -> RunSummary {
    let total_volumes = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = total_volumes - succeeded;

    let error_messages = outcomes
        .iter()
        .filter_map(|o| o.error_detail.clone())
        .collect();

    RunSummary {
        total_instances,
        total_volumes,
        succeeded,
        failed,
        overall_status: classify(succeeded, total_volumes),
        error_messages,
    }
}
