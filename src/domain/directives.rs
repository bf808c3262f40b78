//! Inputs to a backup run: what to discover, how to snapshot it, and
//! the trigger's correlation context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which instances to back up.
///
/// Both parts are optional and combine with logical AND, as the
/// provider's instance filters do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    /// Explicit instance ids
    #[serde(default, rename = "instances")]
    pub instance_ids: Vec<String>,

    /// Provider filter name -> value (e.g. `tag:Owner` -> `ops`)
    #[serde(default, rename = "tags")]
    pub tag_matches: BTreeMap<String, String>,
}

impl DiscoveryFilter {
    /// Parse the JSON form accepted on the command line:
    /// `{"instances": ["i-1"], "tags": {"tag:Owner": "ops"}}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty() && self.tag_matches.is_empty()
    }
}

/// How each volume is processed and where results are reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDirectives {
    /// Stop the instance before the snapshot and start it afterwards
    pub stop_before_snapshot: bool,

    /// Only snapshot instances that are already stopped
    pub require_already_stopped: bool,

    /// Recorded in the `State:Protected` snapshot tag
    pub protected: bool,

    /// Free text appended to the snapshot description
    pub label: Option<String>,

    /// Topic receiving the run summary
    pub primary_topic: Option<String>,

    /// Topic receiving error details (falls back to the primary topic)
    pub error_topic: Option<String>,

    /// Log discovery and publish details at info level
    pub verbose: bool,
}

impl RunDirectives {
    /// Reject contradictory directives before anything touches the provider
    pub fn validate(&self) -> Result<(), DirectiveError> {
        if self.stop_before_snapshot && self.require_already_stopped {
            return Err(DirectiveError::ConflictingStopModes);
        }
        Ok(())
    }

    /// Whether the workflow restarts the instance after processing a volume
    pub fn restarts_instance(&self) -> bool {
        self.stop_before_snapshot || self.require_already_stopped
    }

    /// Apply an explicit stop-mode choice on top of configured values.
    ///
    /// The two modes are one setting: choosing one clears the other.
    /// Only choosing both at once is left for `validate` to reject.
    pub fn choose_stop_mode(&mut self, stop: Option<bool>, stopped: Option<bool>) {
        match (stop, stopped) {
            (Some(true), Some(true)) => {
                self.stop_before_snapshot = true;
                self.require_already_stopped = true;
            }
            (Some(true), _) => {
                self.stop_before_snapshot = true;
                self.require_already_stopped = false;
            }
            (_, Some(true)) => {
                self.stop_before_snapshot = false;
                self.require_already_stopped = true;
            }
            (stop, stopped) => {
                if let Some(stop) = stop {
                    self.stop_before_snapshot = stop;
                }
                if let Some(stopped) = stopped {
                    self.require_already_stopped = stopped;
                }
            }
        }
    }

    pub fn error_topic(&self) -> Option<&str> {
        self.error_topic
            .as_deref()
            .or(self.primary_topic.as_deref())
    }
}

/// Directive validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("stop and stopped are mutually exclusive: choose one of --stop or --stopped")]
    ConflictingStopModes,
}

/// Identifiers of the triggering invocation, echoed into notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub log_stream_id: Option<String>,
    pub log_group_id: Option<String>,
    pub request_id: Option<String>,
    pub memory_limit_mb: Option<u32>,

    /// Raw trigger event, as received
    pub event: Option<serde_json::Value>,
}

impl CorrelationContext {
    /// Read the invocation fields a function runtime exports to its environment
    pub fn from_env(request_id: Option<String>, event: Option<serde_json::Value>) -> Self {
        Self {
            log_stream_id: std::env::var("AWS_LAMBDA_LOG_STREAM_NAME").ok(),
            log_group_id: std::env::var("AWS_LAMBDA_LOG_GROUP_NAME").ok(),
            request_id,
            memory_limit_mb: std::env::var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
            event,
        }
    }
}

/// Event delivered by a trigger. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    pub instances: Vec<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub stop: Option<bool>,

    pub stopped: Option<bool>,

    pub verbose: Option<bool>,

    #[serde(rename = "sns-arn")]
    pub sns_arn: Option<String>,

    #[serde(rename = "sns-arn-error")]
    pub sns_arn_error: Option<String>,

    pub label: Option<String>,

    pub protected: Option<bool>,
}

impl TriggerEvent {
    pub fn filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            instance_ids: self.instances.clone(),
            tag_matches: self.tags.clone(),
        }
    }

    /// Overlay the event's fields on top of configured defaults
    pub fn directives(&self, defaults: &RunDirectives) -> RunDirectives {
        let mut directives = RunDirectives {
            stop_before_snapshot: defaults.stop_before_snapshot,
            require_already_stopped: defaults.require_already_stopped,
            protected: self.protected.unwrap_or(defaults.protected),
            label: self.label.clone().or_else(|| defaults.label.clone()),
            primary_topic: self
                .sns_arn
                .clone()
                .or_else(|| defaults.primary_topic.clone()),
            error_topic: self
                .sns_arn_error
                .clone()
                .or_else(|| defaults.error_topic.clone()),
            verbose: self.verbose.unwrap_or(defaults.verbose),
        };
        directives.choose_stop_mode(self.stop, self.stopped);
        directives
    }
}
