//! Shared test fixtures: an in-memory compute provider and a recording publisher.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;

use volsnap::adapters::{
    BlockDevice, ComputeProvider, CreatedSnapshot, Instance, Notification, ProviderError,
    Publisher, SnapshotQuery, SnapshotState,
};
use volsnap::core::WorkflowSettings;
use volsnap::domain::{DiscoveryFilter, InstanceState, Tag, NAME_TAG};

pub const OWNER: &str = "111122223333";

/// Provider calls, in the order they were made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeInstances,
    SnapshotNames(String),
    Stop(String),
    WaitStopped(String),
    Start(String),
    CreateSnapshot(String),
    CreateTags(String),
}

/// Failures the fake injects, keyed by instance or volume id
#[derive(Debug, Default)]
pub struct Faults {
    pub describe: bool,
    pub name_query: bool,
    pub stop_wait: HashSet<String>,
    pub start: HashSet<String>,
    pub snapshot: HashSet<String>,
    pub snapshot_error_state: HashSet<String>,
    pub tags_throttled: HashSet<String>,
    pub tags_error: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct FakeSnapshot {
    pub snapshot_id: String,
    pub volume_id: String,
    pub owner_id: String,
    pub description: String,
    pub tags: Vec<Tag>,
}

impl FakeSnapshot {
    pub fn name(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == NAME_TAG)
            .map(|t| t.value.as_str())
    }
}

#[derive(Default)]
struct CloudState {
    instances: Vec<Instance>,
    snapshots: Vec<FakeSnapshot>,
    calls: Vec<Call>,
}

/// In-memory cloud with call recording and failure injection
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    pub faults: Faults,
}

impl FakeCloud {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            state: Mutex::new(CloudState {
                instances,
                ..Default::default()
            }),
            faults: Faults::default(),
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn snapshots(&self) -> Vec<FakeSnapshot> {
        self.state.lock().unwrap().snapshots.clone()
    }

    /// Seed a snapshot that already carries a name
    pub fn add_named_snapshot(&self, volume_id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let snapshot_id = format!("snap-seed{}", state.snapshots.len());
        state.snapshots.push(FakeSnapshot {
            snapshot_id,
            volume_id: volume_id.to_string(),
            owner_id: OWNER.to_string(),
            description: String::new(),
            tags: vec![Tag::new(NAME_TAG, name)],
        });
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn volume_of(&self, snapshot_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .find(|s| s.snapshot_id == snapshot_id)
            .map(|s| s.volume_id.clone())
    }
}

fn api_error(operation: &str, message: &str) -> ProviderError {
    ProviderError::Api {
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

fn matches(pattern: &str, value: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(value))
        .unwrap_or(false)
}

fn selected(instance: &Instance, filter: &DiscoveryFilter) -> bool {
    let id_ok =
        filter.instance_ids.is_empty() || filter.instance_ids.contains(&instance.instance_id);
    // Filter names are provider filter names, e.g. `tag:Env`
    let tags_ok = filter.tag_matches.iter().all(|(name, pattern)| {
        let key = name.strip_prefix("tag:").unwrap_or(name);
        instance
            .tags
            .iter()
            .any(|t| t.key == key && matches(pattern, &t.value))
    });
    id_ok && tags_ok
}

#[async_trait]
impl SnapshotQuery for FakeCloud {
    async fn snapshot_names(
        &self,
        owner_id: &str,
        volume_id: &str,
        name_pattern: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.record(Call::SnapshotNames(volume_id.to_string()));
        if self.faults.name_query {
            return Err(api_error("describe-snapshots", "AccessDenied"));
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.owner_id == owner_id && s.volume_id == volume_id)
            .filter_map(|s| s.name())
            .filter(|name| matches(name_pattern, name))
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ComputeProvider for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    async fn describe_instances(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Instance>, ProviderError> {
        self.record(Call::DescribeInstances);
        if self.faults.describe {
            return Err(ProviderError::Unavailable {
                operation: "describe-instances".to_string(),
                message: "could not connect to the endpoint".to_string(),
            });
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .filter(|i| selected(i, filter))
            .cloned()
            .collect())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.record(Call::Stop(instance_id.to_string()));
        Ok(())
    }

    async fn wait_until_stopped(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.record(Call::WaitStopped(instance_id.to_string()));
        if self.faults.stop_wait.contains(instance_id) {
            return Err(api_error("wait instance-stopped", "Max attempts exceeded"));
        }
        Ok(())
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.record(Call::Start(instance_id.to_string()));
        if self.faults.start.contains(instance_id) {
            return Err(api_error("start-instances", "IncorrectInstanceState"));
        }
        Ok(())
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
    ) -> Result<CreatedSnapshot, ProviderError> {
        self.record(Call::CreateSnapshot(volume_id.to_string()));
        if self.faults.snapshot.contains(volume_id) {
            return Err(api_error("create-snapshot", "SnapshotLimitExceeded"));
        }

        let mut state = self.state.lock().unwrap();
        let snapshot_id = format!("snap-{:04}", state.snapshots.len());
        state.snapshots.push(FakeSnapshot {
            snapshot_id: snapshot_id.clone(),
            volume_id: volume_id.to_string(),
            owner_id: OWNER.to_string(),
            description: description.to_string(),
            tags: Vec::new(),
        });

        let snapshot_state = if self.faults.snapshot_error_state.contains(volume_id) {
            SnapshotState::Error
        } else {
            SnapshotState::Pending
        };
        Ok(CreatedSnapshot {
            snapshot_id,
            state: snapshot_state,
        })
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), ProviderError> {
        self.record(Call::CreateTags(resource_id.to_string()));

        let volume_id = self.volume_of(resource_id).unwrap_or_default();
        if self.faults.tags_throttled.contains(&volume_id) {
            return Err(ProviderError::Throttled {
                operation: "create-tags".to_string(),
                message: "RequestLimitExceeded".to_string(),
            });
        }
        if self.faults.tags_error.contains(&volume_id) {
            return Err(api_error("create-tags", "InvalidParameterValue"));
        }

        let mut state = self.state.lock().unwrap();
        if let Some(snapshot) = state
            .snapshots
            .iter_mut()
            .find(|s| s.snapshot_id == resource_id)
        {
            snapshot.tags.extend(tags.iter().cloned());
        }
        Ok(())
    }
}

/// Publisher that records every notification
#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingPublisher {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<(), ProviderError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), notification.clone()));
        Ok(())
    }
}

/// Instance with one volume per `(device, volume)` pair; the first is the root device
pub fn instance(id: &str, name: Option<&str>, state: InstanceState, devices: &[(&str, &str)]) -> Instance {
    let mut tags = vec![
        Tag::new("Env", "prod"),
        Tag::new("aws:cloudformation:stack-name", "web-stack"),
    ];
    if let Some(name) = name {
        tags.push(Tag::new(NAME_TAG, name));
    }

    Instance {
        instance_id: id.to_string(),
        owner_id: OWNER.to_string(),
        root_device_name: devices.first().map(|(device, _)| device.to_string()),
        state,
        tags,
        block_devices: devices
            .iter()
            .map(|(device, volume)| BlockDevice {
                device_name: device.to_string(),
                volume_id: Some(volume.to_string()),
            })
            .collect(),
    }
}

/// Settings with no pauses between provider calls
pub fn fast_settings(max_concurrency: usize) -> WorkflowSettings {
    WorkflowSettings {
        backoff: Duration::ZERO,
        max_concurrency,
        ..WorkflowSettings::default()
    }
}
