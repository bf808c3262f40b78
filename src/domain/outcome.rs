//! Per-volume outcomes and the run-level summary derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::work_item::WorkItem;

/// Terminal status of one volume's workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of processing a single work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeOutcome {
    pub work_item: WorkItem,

    pub status: OutcomeStatus,

    /// Human-readable failure description (only for failed outcomes)
    pub error_detail: Option<String>,

    /// Snapshot created for this volume, even if a later step failed
    pub snapshot_id: Option<String>,
}

impl VolumeOutcome {
    pub fn success(work_item: WorkItem, snapshot_id: String) -> Self {
        Self {
            work_item,
            status: OutcomeStatus::Success,
            error_detail: None,
            snapshot_id: Some(snapshot_id),
        }
    }

    pub fn failed(work_item: WorkItem, error: String, snapshot_id: Option<String>) -> Self {
        Self {
            work_item,
            status: OutcomeStatus::Failed,
            error_detail: Some(error),
            snapshot_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Run-level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Successful,
    Partial,
    Fault,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "Successful",
            Self::Partial => "Partial",
            Self::Fault => "Fault",
        }
    }

    /// Whether the error notification must be sent
    pub fn has_errors(&self) -> bool {
        !matches!(self, Self::Successful)
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_instances: usize,
    pub total_volumes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub overall_status: OverallStatus,
    pub error_messages: Vec<String>,
}

impl RunSummary {
    /// Summary for a run whose discovery pass failed: nothing was processed
    pub fn discovery_fault(error: String) -> Self {
        Self {
            total_instances: 0,
            total_volumes: 0,
            succeeded: 0,
            failed: 0,
            overall_status: OverallStatus::Fault,
            error_messages: vec![error],
        }
    }

    /// Fixed-width totals block used in logs and notifications
    pub fn totals_block(&self) -> String {
        format!(
            "[=] Total Instances          : {}\n\
             [=] Total volumes to process : {}\n\
             [=] Total volumes failed     : {}\n\
             [=] Total volumes success    : {}\n",
            self.total_instances, self.total_volumes, self.failed, self.succeeded
        )
    }
}
