//! Domain types for volsnap.
//!
//! This module contains the core data structures:
//! - WorkItem: one volume to back up
//! - Outcome: per-volume results and the run summary
//! - Directives: discovery filter, run directives, trigger context

pub mod directives;
pub mod outcome;
pub mod work_item;

// Re-export commonly used types
pub use directives::{
    CorrelationContext, DirectiveError, DiscoveryFilter, RunDirectives, TriggerEvent,
};
pub use outcome::{OutcomeStatus, OverallStatus, RunSummary, VolumeOutcome};
pub use work_item::{InstanceState, Tag, WorkItem, NAME_TAG, RESERVED_TAG_PREFIX};
