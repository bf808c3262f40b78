//! Work items: one per attached volume considered for backup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag key carrying the human-readable snapshot name
pub const NAME_TAG: &str = "Name";

/// Tag key prefix reserved by the provider (never copied, never written)
pub const RESERVED_TAG_PREFIX: &str = "aws:";

/// A single key/value tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether the key uses the provider-reserved prefix
    pub fn is_reserved(&self) -> bool {
        self.key.starts_with(RESERVED_TAG_PREFIX)
    }
}

/// Lifecycle state of an instance as reported at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    Stopped,
    Other(String),
}

impl InstanceState {
    /// Parse the provider's state name
    pub fn from_name(name: &str) -> Self {
        match name {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Other(name) => name,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One volume to back up.
///
/// Built once by the inventory pass and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Backing volume id
    pub volume_id: String,

    /// Instance the volume is attached to
    pub instance_id: String,

    /// Generated snapshot name (also installed as the `Name` tag)
    pub instance_name: String,

    /// Device the volume is attached as (e.g. `/dev/xvda`)
    pub device_name: String,

    /// Whether this is the instance's root device
    pub is_root_device: bool,

    /// Tags to copy onto the snapshot, reserved keys already removed
    pub tags: Vec<Tag>,

    /// Instance state at discovery time
    pub instance_state: InstanceState,

    /// Set when no unique snapshot name could be produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_fault: Option<String>,
}
