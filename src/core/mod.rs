//! Core orchestration logic.
//!
//! This module contains:
//! - Naming: collision-free snapshot names
//! - Inventory: instance discovery into work items
//! - Workflow: the per-volume stop/snapshot/tag/restart machine
//! - Aggregate: outcome classification
//! - Notifier: summary and error messages
//! - Orchestrator: Main execution engine

pub mod aggregate;
pub mod inventory;
pub mod naming;
pub mod notifier;
pub mod orchestrator;
pub mod workflow;

// Re-export commonly used types
pub use aggregate::{aggregate, classify};
pub use inventory::{derive_tags, discover, DiscoveryError, Inventory};
pub use naming::{
    increment_token, next_name, snapshot_date, NameResolver, NamingError, SnapshotNameRequest,
};
pub use notifier::{error_notification, summary_notification, NotifyError, Notifier};
pub use orchestrator::{BackupRequest, Orchestrator, RunReport};
pub use workflow::{VolumeFailure, VolumeState, VolumeWorkflow, WorkflowSettings};
