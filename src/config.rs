//! Configuration for volsnap.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (VOLSNAP_SNS_ARN, VOLSNAP_SNS_ARN_ERROR,
//!    VOLSNAP_AWS_REGION, VOLSNAP_AWS_PROFILE)
//! 3. Config file (.volsnap/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .volsnap/config.yaml
//! - Falls back to ~/.volsnap/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::AwsCli;
use crate::core::WorkflowSettings;
use crate::domain::RunDirectives;

const CONFIG_DIR: &str = ".volsnap";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsConfig {
    /// Topic receiving every run summary
    pub primary: Option<String>,
    /// Topic receiving error details
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    pub binary: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub command_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub stop: Option<bool>,
    pub stopped: Option<bool>,
    pub protected: Option<bool>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    pub api_backoff_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
}

/// Resolved `aws` adapter settings
#[derive(Debug, Clone, Serialize)]
pub struct AwsSettings {
    pub binary: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub command_timeout_seconds: u64,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            binary: "aws".to_string(),
            region: None,
            profile: None,
            command_timeout_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerSettings {
    pub api_backoff_ms: u64,
    pub max_concurrency: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            api_backoff_ms: 100,
            max_concurrency: 1,
        }
    }
}

/// Resolved configuration, passed explicitly to whoever needs it
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub aws: AwsSettings,
    pub runner: RunnerSettings,
    /// Directive defaults, overridden per run by flags or the trigger event
    pub defaults: RunDirectives,
}

impl ResolvedConfig {
    /// Build the `aws` CLI adapter
    pub fn aws_cli(&self) -> AwsCli {
        AwsCli::with_binary_path(self.aws.binary.clone())
            .region(self.aws.region.clone())
            .profile(self.aws.profile.clone())
            .command_timeout(Duration::from_secs(self.aws.command_timeout_seconds))
    }

    /// Workflow settings, with an optional concurrency override
    pub fn workflow_settings(&self, max_concurrency: Option<usize>) -> WorkflowSettings {
        WorkflowSettings {
            backoff: Duration::from_millis(self.runner.api_backoff_ms),
            max_concurrency: max_concurrency
                .unwrap_or(self.runner.max_concurrency)
                .max(1),
            ..WorkflowSettings::default()
        }
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let home_config = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge file values and environment lookups over the defaults
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_file, file) = match file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let mut resolved = ResolvedConfig {
        config_file,
        ..Default::default()
    };

    if let Some(file) = file {
        let aws_defaults = AwsSettings::default();
        resolved.aws = AwsSettings {
            binary: file.aws.binary.unwrap_or(aws_defaults.binary),
            region: file.aws.region,
            profile: file.aws.profile,
            command_timeout_seconds: file
                .aws
                .command_timeout_seconds
                .unwrap_or(aws_defaults.command_timeout_seconds),
        };

        let runner_defaults = RunnerSettings::default();
        resolved.runner = RunnerSettings {
            api_backoff_ms: file
                .runner
                .api_backoff_ms
                .unwrap_or(runner_defaults.api_backoff_ms),
            max_concurrency: file
                .runner
                .max_concurrency
                .unwrap_or(runner_defaults.max_concurrency),
        };

        resolved.defaults = RunDirectives {
            stop_before_snapshot: file.defaults.stop.unwrap_or(false),
            require_already_stopped: file.defaults.stopped.unwrap_or(false),
            protected: file.defaults.protected.unwrap_or(false),
            label: file.defaults.label,
            primary_topic: file.topics.primary,
            error_topic: file.topics.error,
            verbose: false,
        };
    }

    if let Some(arn) = env("VOLSNAP_SNS_ARN") {
        resolved.defaults.primary_topic = Some(arn);
    }
    if let Some(arn) = env("VOLSNAP_SNS_ARN_ERROR") {
        resolved.defaults.error_topic = Some(arn);
    }
    if let Some(region) = env("VOLSNAP_AWS_REGION") {
        resolved.aws.region = Some(region);
    }
    if let Some(profile) = env("VOLSNAP_AWS_PROFILE") {
        resolved.aws.profile = Some(profile);
    }

    resolved
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };
    Ok(resolve(file, process_env))
}

/// Load configuration from an explicit file (plus environment)
pub fn load_config_from(path: &Path) -> Result<ResolvedConfig> {
    let parsed = load_config_file(path)?;
    Ok(resolve(Some((path.to_path_buf(), parsed)), process_env))
}
