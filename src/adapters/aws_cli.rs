//! Compute and SNS adapter over the `aws` command-line client.
//!
//! Every call spawns `aws <service> <operation> ... --output json`,
//! bounded by a per-command timeout, and parses stdout as JSON.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{
    BlockDevice, ComputeProvider, CreatedSnapshot, Instance, Notification, ProviderError,
    Publisher, SnapshotQuery, SnapshotState,
};
use crate::domain::{DiscoveryFilter, InstanceState, Tag, NAME_TAG};

/// Error codes the provider uses for request-rate rejections
const THROTTLE_CODES: [&str; 3] = ["RequestLimitExceeded", "Throttling", "TooManyRequests"];

/// Adapter driving the `aws` binary
#[derive(Debug, Clone)]
pub struct AwsCli {
    /// Path to the aws binary (default: "aws")
    binary_path: String,
    region: Option<String>,
    profile: Option<String>,
    command_timeout: Duration,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCli {
    pub fn new() -> Self {
        Self {
            binary_path: "aws".to_string(),
            region: None,
            profile: None,
            command_timeout: Duration::from_secs(900),
        }
    }

    /// Create an adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::new()
        }
    }

    pub fn region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Arguments appended to every invocation
    fn global_args(&self) -> Vec<String> {
        let mut args = vec!["--output".to_string(), "json".to_string()];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Run one command and return its stdout
    async fn run(&self, operation: &str, args: Vec<String>) -> Result<String, ProviderError> {
        let mut full_args = args;
        full_args.extend(self.global_args());
        debug!(operation, args = ?full_args, "Invoking aws");

        let child = Command::new(&self.binary_path)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Unavailable {
                operation: operation.to_string(),
                message: format!("failed to spawn {}: {}", self.binary_path, e),
            })?;

        let output = timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Unavailable {
                operation: operation.to_string(),
                message: format!("timed out after {:?}", self.command_timeout),
            })?
            .map_err(|e| ProviderError::Unavailable {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(operation, stderr.trim()));
        }

        String::from_utf8(output.stdout).map_err(|_| ProviderError::Malformed {
            operation: operation.to_string(),
            message: "output is not valid UTF-8".to_string(),
        })
    }

    /// Run one command and deserialize its JSON output
    async fn run_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> Result<T, ProviderError> {
        let stdout = self.run(operation, args).await?;
        serde_json::from_str(&stdout).map_err(|e| ProviderError::Malformed {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

/// Map a failed command's stderr to a provider error
pub(crate) fn classify_failure(operation: &str, stderr: &str) -> ProviderError {
    let message = if stderr.is_empty() {
        "no error output".to_string()
    } else {
        stderr.to_string()
    };

    if THROTTLE_CODES.iter().any(|code| stderr.contains(code)) {
        ProviderError::Throttled {
            operation: operation.to_string(),
            message,
        }
    } else {
        ProviderError::Api {
            operation: operation.to_string(),
            message,
        }
    }
}

/// `--filters` JSON for an instance query
pub(crate) fn instance_filters(filter: &DiscoveryFilter) -> Option<String> {
    let mut filters = Vec::new();

    for (name, value) in &filter.tag_matches {
        filters.push(serde_json::json!({ "Name": name, "Values": [value] }));
    }
    if !filter.instance_ids.is_empty() {
        filters.push(serde_json::json!({
            "Name": "instance-id",
            "Values": filter.instance_ids,
        }));
    }

    if filters.is_empty() {
        None
    } else {
        Some(serde_json::Value::Array(filters).to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    owner_id: String,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    root_device_name: Option<String>,
    state: Option<RawInstanceState>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    block_device_mappings: Vec<RawBlockDeviceMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstanceState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBlockDeviceMapping {
    device_name: String,
    ebs: Option<RawEbs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEbs {
    volume_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSnapshotsResponse {
    #[serde(default)]
    snapshots: Vec<RawSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSnapshot {
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSnapshotResponse {
    snapshot_id: Option<String>,
    state: Option<String>,
}

/// Flatten reservations into instances, every instance of every reservation
fn into_instances(response: DescribeInstancesResponse) -> Vec<Instance> {
    response
        .reservations
        .into_iter()
        .flat_map(|reservation| {
            let owner_id = reservation.owner_id;
            reservation.instances.into_iter().map(move |raw| Instance {
                instance_id: raw.instance_id,
                owner_id: owner_id.clone(),
                root_device_name: raw.root_device_name,
                state: raw
                    .state
                    .map(|s| InstanceState::from_name(&s.name))
                    .unwrap_or_else(|| InstanceState::Other("unknown".to_string())),
                tags: raw.tags,
                block_devices: raw
                    .block_device_mappings
                    .into_iter()
                    .map(|m| BlockDevice {
                        device_name: m.device_name,
                        volume_id: m.ebs.and_then(|e| e.volume_id),
                    })
                    .collect(),
            })
        })
        .collect()
}

/// Strict reading of a create-snapshot response
fn into_created_snapshot(response: CreateSnapshotResponse) -> Result<CreatedSnapshot, ProviderError> {
    let snapshot_id = response
        .snapshot_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Malformed {
            operation: "create-snapshot".to_string(),
            message: "response carries no SnapshotId".to_string(),
        })?;

    let state = response
        .state
        .as_deref()
        .map(SnapshotState::from_name)
        .unwrap_or_else(|| SnapshotState::Other("missing".to_string()));

    Ok(CreatedSnapshot { snapshot_id, state })
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl SnapshotQuery for AwsCli {
    async fn snapshot_names(
        &self,
        owner_id: &str,
        volume_id: &str,
        name_pattern: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let filters = serde_json::json!([
            { "Name": format!("tag:{}", NAME_TAG), "Values": [name_pattern] },
            { "Name": "volume-id", "Values": [volume_id] },
        ])
        .to_string();

        let mut args = strings(&["ec2", "describe-snapshots", "--owner-ids", owner_id]);
        args.push("--filters".to_string());
        args.push(filters);

        let response: DescribeSnapshotsResponse =
            self.run_json("describe-snapshots", args).await?;

        Ok(response
            .snapshots
            .into_iter()
            .flat_map(|s| s.tags)
            .filter(|t| t.key == NAME_TAG)
            .map(|t| t.value)
            .collect())
    }
}

#[async_trait]
impl ComputeProvider for AwsCli {
    fn name(&self) -> &str {
        "aws-cli"
    }

    async fn describe_instances(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Instance>, ProviderError> {
        let mut args = strings(&["ec2", "describe-instances"]);
        if let Some(filters) = instance_filters(filter) {
            args.push("--filters".to_string());
            args.push(filters);
        }

        let response: DescribeInstancesResponse =
            self.run_json("describe-instances", args).await?;
        Ok(into_instances(response))
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.run(
            "stop-instances",
            strings(&["ec2", "stop-instances", "--instance-ids", instance_id]),
        )
        .await
        .map(|_| ())
    }

    async fn wait_until_stopped(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.run(
            "wait instance-stopped",
            strings(&["ec2", "wait", "instance-stopped", "--instance-ids", instance_id]),
        )
        .await
        .map(|_| ())
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.run(
            "start-instances",
            strings(&["ec2", "start-instances", "--instance-ids", instance_id]),
        )
        .await
        .map(|_| ())
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
    ) -> Result<CreatedSnapshot, ProviderError> {
        let args = strings(&[
            "ec2",
            "create-snapshot",
            "--volume-id",
            volume_id,
            "--description",
            description,
        ]);
        let response: CreateSnapshotResponse = self.run_json("create-snapshot", args).await?;
        into_created_snapshot(response)
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), ProviderError> {
        let tags_json = serde_json::to_string(tags).map_err(|e| ProviderError::Malformed {
            operation: "create-tags".to_string(),
            message: e.to_string(),
        })?;

        let mut args = strings(&["ec2", "create-tags", "--resources", resource_id]);
        args.push("--tags".to_string());
        args.push(tags_json);

        self.run("create-tags", args).await.map(|_| ())
    }
}

#[async_trait]
impl Publisher for AwsCli {
    async fn publish(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<(), ProviderError> {
        let mut args = strings(&[
            "sns",
            "publish",
            "--target-arn",
            topic,
            "--subject",
            notification.subject.as_str(),
            "--message-structure",
            "json",
        ]);
        args.push("--message".to_string());
        args.push(notification.body.to_structured_json());

        self.run("sns publish", args).await.map(|_| ())
    }
}
