//! Per-volume workflow: stop → verify → snapshot → tag → restart.
//!
//! Every failure is contained to the volume it happened on and becomes
//! a `Failed` outcome; nothing here aborts the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ComputeProvider, ProviderError};
use crate::domain::{RunDirectives, Tag, VolumeOutcome, WorkItem};

/// Marks snapshots created by this tool
pub const SCRIPTED_TAG: &str = "Scripted";

/// Records `{instance state}:{protected}` at snapshot time
pub const STATE_PROTECTED_TAG: &str = "State:Protected";

/// Identity written into snapshot descriptions
pub fn program_identity() -> String {
    format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Tag values keep the capitalised booleans earlier snapshots carry
fn tag_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Runner settings that do not come from the run directives
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Written into every snapshot description
    pub program: String,

    /// Fixed pause before snapshot, tag and start calls
    pub backoff: Duration,

    /// Instances processed at the same time (1 = strictly sequential)
    pub max_concurrency: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            program: program_identity(),
            backoff: Duration::from_millis(100),
            max_concurrency: 1,
        }
    }
}

/// Workflow states, in the only order they can be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolumeState {
    Pending,
    Stopping,
    Ready,
    Snapshotting,
    Tagging,
    Restarting,
    Done,
}

/// Why a volume's workflow failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeFailure {
    #[error("no snapshot name available: {0}")]
    NameUnavailable(String),

    #[error("error waiting for instance {instance_id} to stop: {source}")]
    StopWait {
        instance_id: String,
        source: ProviderError,
    },

    #[error("instance {instance_id} required to be stopped but is {state}")]
    NotStopped { instance_id: String, state: String },

    #[error("unable to create snapshot of {volume_id} on {instance_id} ({device_name}): {source}")]
    SnapshotCreate {
        instance_id: String,
        volume_id: String,
        device_name: String,
        source: ProviderError,
    },

    #[error("snapshot {snapshot_id} of {volume_id} was not accepted (state: {state})")]
    SnapshotRejected {
        volume_id: String,
        snapshot_id: String,
        state: String,
    },

    #[error("rate limited writing tags on snapshot {snapshot_id}: {source}")]
    TagRateLimited {
        snapshot_id: String,
        source: ProviderError,
    },

    #[error("error writing tags on snapshot {snapshot_id}: {source}")]
    TagWrite {
        snapshot_id: String,
        source: ProviderError,
    },
}

impl VolumeFailure {
    /// Snapshot left behind by the failed workflow, if one was created
    pub fn snapshot_id(&self) -> Option<&str> {
        match self {
            Self::SnapshotRejected { snapshot_id, .. }
            | Self::TagRateLimited { snapshot_id, .. }
            | Self::TagWrite { snapshot_id, .. } => Some(snapshot_id),
            _ => None,
        }
    }
}

/// Runs the workflow for work items against a compute provider
#[derive(Clone)]
pub struct VolumeWorkflow {
    provider: Arc<dyn ComputeProvider>,
    directives: Arc<RunDirectives>,
    settings: Arc<WorkflowSettings>,
}

impl VolumeWorkflow {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        directives: RunDirectives,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            provider,
            directives: Arc::new(directives),
            settings: Arc::new(settings),
        }
    }

    /// Snapshot description for an item
    pub fn description(&self, item: &WorkItem) -> String {
        let description = format!(
            "Script {} [Instance ID = {}] [Stop : {}] [Stopped : {}] [State : {}] {}",
            self.settings.program,
            item.instance_id,
            self.directives.stop_before_snapshot,
            self.directives.require_already_stopped,
            item.instance_state,
            self.directives.label.as_deref().unwrap_or_default(),
        );
        description.trim_end().to_string()
    }

    /// Tags written to a new snapshot
    pub fn snapshot_tags(&self, item: &WorkItem) -> Vec<Tag> {
        let mut tags: Vec<Tag> = item
            .tags
            .iter()
            .filter(|t| !t.is_reserved())
            .cloned()
            .collect();
        tags.push(Tag::new(SCRIPTED_TAG, tag_bool(true)));
        tags.push(Tag::new(
            STATE_PROTECTED_TAG,
            format!(
                "{}:{}",
                item.instance_state,
                tag_bool(self.directives.protected)
            ),
        ));
        tags
    }

    /// Process every item; returns exactly one outcome per item, in input order
    pub async fn run_all(&self, items: Vec<WorkItem>) -> Vec<VolumeOutcome> {
        let total = items.len();

        let outcomes = if self.settings.max_concurrency <= 1 {
            let mut outcomes = Vec::with_capacity(total);
            for item in &items {
                outcomes.push(self.run_item(item).await);
            }
            outcomes
        } else {
            self.run_concurrent(items).await
        };

        debug_assert_eq!(outcomes.len(), total);
        outcomes
    }

    /// Instances run in parallel; volumes of one instance stay sequential
    /// because stop and start act on the whole instance.
    async fn run_concurrent(&self, items: Vec<WorkItem>) -> Vec<VolumeOutcome> {
        let mut group_of: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<(usize, WorkItem)>> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let group = *group_of.entry(item.instance_id.clone()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push((index, item.clone()));
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks = JoinSet::new();

        for group in groups {
            let workflow = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut outcomes = Vec::with_capacity(group.len());
                for (index, item) in group {
                    let outcome = workflow.run_item(&item).await;
                    outcomes.push((index, outcome));
                }
                outcomes
            });
        }

        let mut slots: Vec<Option<VolumeOutcome>> = vec![None; items.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        slots[index] = Some(outcome);
                    }
                }
                Err(e) => error!(error = %e, "Volume worker aborted"),
            }
        }

        // A worker that panicked still owes an outcome for each of its items
        slots
            .into_iter()
            .zip(items)
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| {
                    VolumeOutcome::failed(item, "volume worker aborted".to_string(), None)
                })
            })
            .collect()
    }

    /// Process one item to completion
    #[instrument(skip(self, item), fields(instance_id = %item.instance_id, volume_id = %item.volume_id))]
    pub async fn run_item(&self, item: &WorkItem) -> VolumeOutcome {
        info!(
            device = %item.device_name,
            root_device = item.is_root_device,
            "Snapshot volume"
        );

        if let Some(fault) = &item.name_fault {
            let failure = VolumeFailure::NameUnavailable(fault.clone());
            error!(error = %failure, "Skipping volume");
            return VolumeOutcome::failed(item.clone(), failure.to_string(), None);
        }

        let mut state = VolumeState::Pending;
        let result = self.snapshot_volume(item, &mut state).await;

        if self.directives.restarts_instance() {
            advance(&mut state, VolumeState::Restarting);
            self.restart(item).await;
        }
        advance(&mut state, VolumeState::Done);

        match result {
            Ok(snapshot_id) => VolumeOutcome::success(item.clone(), snapshot_id),
            Err(failure) => {
                error!(error = %failure, "Volume snapshot failed");
                let snapshot_id = failure.snapshot_id().map(str::to_string);
                VolumeOutcome::failed(item.clone(), failure.to_string(), snapshot_id)
            }
        }
    }

    /// Stopping → Ready → Snapshotting → Tagging; returns the snapshot id
    async fn snapshot_volume(
        &self,
        item: &WorkItem,
        state: &mut VolumeState,
    ) -> Result<String, VolumeFailure> {
        let directives = &self.directives;

        let mut stopped_here = false;
        if directives.stop_before_snapshot {
            advance(state, VolumeState::Stopping);
            self.stop(item).await?;
            stopped_here = true;
        }

        let eligible = (directives.require_already_stopped && item.instance_state.is_stopped())
            || (directives.stop_before_snapshot && stopped_here)
            || (!directives.stop_before_snapshot && !directives.require_already_stopped);
        if !eligible {
            return Err(VolumeFailure::NotStopped {
                instance_id: item.instance_id.clone(),
                state: item.instance_state.to_string(),
            });
        }
        advance(state, VolumeState::Ready);

        advance(state, VolumeState::Snapshotting);
        tokio::time::sleep(self.settings.backoff).await;
        let created = self
            .provider
            .create_snapshot(&item.volume_id, &self.description(item))
            .await
            .map_err(|source| VolumeFailure::SnapshotCreate {
                instance_id: item.instance_id.clone(),
                volume_id: item.volume_id.clone(),
                device_name: item.device_name.clone(),
                source,
            })?;

        if !created.state.is_accepted() {
            return Err(VolumeFailure::SnapshotRejected {
                volume_id: item.volume_id.clone(),
                snapshot_id: created.snapshot_id,
                state: created.state.as_str().to_string(),
            });
        }
        info!(
            snapshot_id = %created.snapshot_id,
            name = %item.instance_name,
            "Snapshot created"
        );

        advance(state, VolumeState::Tagging);
        self.tag(item, &created.snapshot_id).await?;

        Ok(created.snapshot_id)
    }

    async fn stop(&self, item: &WorkItem) -> Result<(), VolumeFailure> {
        let to_failure = |source| VolumeFailure::StopWait {
            instance_id: item.instance_id.clone(),
            source,
        };

        info!("Stopping instance");
        self.provider
            .stop_instance(&item.instance_id)
            .await
            .map_err(to_failure)?;

        info!("Waiting until the instance is stopped");
        self.provider
            .wait_until_stopped(&item.instance_id)
            .await
            .map_err(to_failure)
    }

    /// One tagging attempt. A throttled attempt waits out the backoff
    /// and is still recorded as a failure.
    async fn tag(&self, item: &WorkItem, snapshot_id: &str) -> Result<(), VolumeFailure> {
        let tags = self.snapshot_tags(item);

        match self.provider.create_tags(snapshot_id, &tags).await {
            Ok(()) => {
                debug!(snapshot_id, count = tags.len(), "Snapshot tagged");
                Ok(())
            }
            Err(source) if source.is_throttled() => {
                warn!(
                    snapshot_id,
                    backoff_ms = self.settings.backoff.as_millis() as u64,
                    "Tag write throttled, waiting"
                );
                tokio::time::sleep(self.settings.backoff).await;
                Err(VolumeFailure::TagRateLimited {
                    snapshot_id: snapshot_id.to_string(),
                    source,
                })
            }
            Err(source) => Err(VolumeFailure::TagWrite {
                snapshot_id: snapshot_id.to_string(),
                source,
            }),
        }
    }

    /// Fire-and-forget: a failed start is logged but does not change the outcome
    async fn restart(&self, item: &WorkItem) {
        tokio::time::sleep(self.settings.backoff).await;
        match self.provider.start_instance(&item.instance_id).await {
            Ok(()) => info!("Instance start requested"),
            Err(e) => warn!(error = %e, "Failed to start instance"),
        }
    }
}

fn advance(state: &mut VolumeState, next: VolumeState) {
    debug_assert!(next > *state, "workflow moved from {:?} to {:?}", state, next);
    debug!(from = ?state, to = ?next, "Workflow transition");
    *state = next;
}
