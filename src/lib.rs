//! volsnap - Snapshot orchestration for instance-attached volumes
//!
//! Discovers instances matching a filter, snapshots every attached
//! volume with a collision-free name, copies the instance's tags onto
//! each snapshot, and reports a run summary to notification topics.
//!
//! # Architecture
//!
//! A run is a single pass:
//! - Discovery turns the filtered instances into one work item per volume
//! - Each work item runs through its own stop/snapshot/tag/restart workflow
//! - A failed volume never aborts the others
//! - Outcomes are aggregated into Successful, Partial or Fault
//!
//! # Modules
//!
//! - `adapters`: Provider and publisher integrations (`aws` CLI, webhooks)
//! - `core`: Naming, discovery, workflow, aggregation, notification
//! - `domain`: Data structures (WorkItem, VolumeOutcome, RunDirectives)
//! - `config`: `.volsnap/config.yaml` plus environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Snapshot every volume of tagged production instances
//! volsnap run --tag tag:Env=prod --sns-arn arn:aws:sns:eu-west-1:111122223333:backup
//!
//! # Handle a trigger event
//! echo '{"instances": ["i-0abc"], "stop": true}' | volsnap event
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{AwsCli, ComputeProvider, Publisher, SnapshotQuery};
pub use config::ResolvedConfig;
pub use core::{BackupRequest, Orchestrator, RunReport};
pub use domain::{
    DiscoveryFilter, OverallStatus, RunDirectives, RunSummary, TriggerEvent, VolumeOutcome,
    WorkItem,
};
