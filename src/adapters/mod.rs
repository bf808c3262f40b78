//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the compute provider
//! (instances, volumes, snapshots) and for the notification endpoint.

pub mod aws_cli;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DiscoveryFilter, InstanceState, Tag};

// Re-export the concrete adapters
pub use aws_cli::AwsCli;
pub use webhook::{TopicRouter, WebhookPublisher};

/// An attached block device as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub device_name: String,

    /// Backing volume (absent for devices without block storage)
    pub volume_id: Option<String>,
}

/// A discovered compute instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,

    /// Account owning the instance (and its snapshots)
    pub owner_id: String,

    pub root_device_name: Option<String>,

    pub state: InstanceState,

    pub tags: Vec<Tag>,

    pub block_devices: Vec<BlockDevice>,
}

/// Provider-reported state of a snapshot creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    Pending,
    Completed,
    Error,
    Other(String),
}

impl SnapshotState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only these two states mean the provider accepted the snapshot
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }
}

/// Response to a snapshot creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSnapshot {
    pub snapshot_id: String,
    pub state: SnapshotState,
}

/// Errors returned by provider and publisher adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider rejected the call because of its request rate limit
    #[error("{operation} throttled: {message}")]
    Throttled { operation: String, message: String },

    /// The provider answered with an error
    #[error("{operation} failed: {message}")]
    Api { operation: String, message: String },

    /// The provider could not be reached (spawn failure, timeout, network)
    #[error("{operation} unavailable: {message}")]
    Unavailable { operation: String, message: String },

    /// The provider answered with something we could not interpret
    #[error("{operation} returned an unexpected response: {message}")]
    Malformed { operation: String, message: String },
}

impl ProviderError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// Lists existing snapshot names; the only capability the name resolver needs
#[async_trait]
pub trait SnapshotQuery: Send + Sync {
    /// `Name` tag values of snapshots owned by `owner_id`, taken from
    /// `volume_id`, whose name matches the wildcard `name_pattern`
    async fn snapshot_names(
        &self,
        owner_id: &str,
        volume_id: &str,
        name_pattern: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Compute provider operations used by discovery and the volume workflow
#[async_trait]
pub trait ComputeProvider: SnapshotQuery {
    /// Human-readable provider name
    fn name(&self) -> &str;

    async fn describe_instances(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Instance>, ProviderError>;

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Block until the provider reports the instance stopped (provider-defined timeout)
    async fn wait_until_stopped(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn start_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
    ) -> Result<CreatedSnapshot, ProviderError>;

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), ProviderError>;
}

/// Multi-channel message body (one rendering per delivery protocol)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub default: String,
    pub email: String,
    pub sms: String,
    #[serde(rename = "APNS")]
    pub apns: String,
    #[serde(rename = "GCM")]
    pub gcm: String,
}

impl MessageBody {
    /// Same text for every channel
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            email: text.clone(),
            sms: text.clone(),
            apns: serde_json::json!({ "aps": { "alert": text } }).to_string(),
            gcm: serde_json::json!({ "data": { "message": text } }).to_string(),
            default: text,
        }
    }

    /// Replace the SMS rendering with a short variant
    pub fn with_sms(mut self, sms: impl Into<String>) -> Self {
        self.sms = sms.into();
        self
    }

    /// The JSON document sent with `MessageStructure=json`
    pub fn to_structured_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.default.clone())
    }
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: MessageBody,
}

/// Publishes notifications to a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, notification: &Notification)
        -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_state_strict_acceptance() {
        assert!(SnapshotState::from_name("pending").is_accepted());
        assert!(SnapshotState::from_name("completed").is_accepted());
        assert!(!SnapshotState::from_name("error").is_accepted());
        assert!(!SnapshotState::from_name("").is_accepted());
        assert!(!SnapshotState::from_name("recoverable").is_accepted());
    }

    #[test]
    fn test_message_body_channels() {
        let body = MessageBody::new("done").with_sms("short");
        let json: serde_json::Value = serde_json::from_str(&body.to_structured_json()).unwrap();

        assert_eq!(json["default"], "done");
        assert_eq!(json["email"], "done");
        assert_eq!(json["sms"], "short");

        let apns: serde_json::Value =
            serde_json::from_str(json["APNS"].as_str().unwrap()).unwrap();
        assert_eq!(apns["aps"]["alert"], "done");
        let gcm: serde_json::Value = serde_json::from_str(json["GCM"].as_str().unwrap()).unwrap();
        assert_eq!(gcm["data"]["message"], "done");
    }

    #[test]
    fn test_throttle_classification() {
        let throttled = ProviderError::Throttled {
            operation: "create-tags".to_string(),
            message: "RequestLimitExceeded".to_string(),
        };
        assert!(throttled.is_throttled());
        assert_eq!(
            throttled.to_string(),
            "create-tags throttled: RequestLimitExceeded"
        );
    }
}
