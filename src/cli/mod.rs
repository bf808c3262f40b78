//! Command-line interface for volsnap.
//!
//! Provides commands for running a snapshot pass interactively, handling
//! a trigger event, and inspecting the resolved configuration.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{BackupRequest, Orchestrator, RunReport};
use crate::domain::{
    CorrelationContext, DiscoveryFilter, OutcomeStatus, RunDirectives, TriggerEvent,
};

/// volsnap - Point-in-time snapshots of instance-attached volumes
#[derive(Parser, Debug)]
#[command(name = "volsnap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Explicit config file (skips discovery of .volsnap/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging and detailed failure output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot every volume of the matching instances
    Run(RunArgs),

    /// Handle a trigger event (JSON) and print the run result
    Event {
        /// Event file; reads stdin when omitted or "-"
        path: Option<PathBuf>,

        /// Request id echoed into the summary notification
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Discovery filter as JSON: {"instances": [..], "tags": {"tag:Key": "pattern"}}
    #[arg(long)]
    pub filter: Option<String>,

    /// Instance id to include (repeatable)
    #[arg(long = "instance", value_name = "ID")]
    pub instances: Vec<String>,

    /// Provider filter as NAME=VALUE, e.g. tag:Env=prod* (repeatable)
    #[arg(long = "tag", value_name = "NAME=VALUE", value_parser = parse_tag_match)]
    pub tags: Vec<(String, String)>,

    /// Stop each instance before its snapshot and start it afterwards
    #[arg(long, conflicts_with_all = ["stopped", "no_stop"])]
    pub stop: bool,

    /// Only snapshot instances that are already stopped
    #[arg(long, conflicts_with = "no_stop")]
    pub stopped: bool,

    /// Snapshot instances as they are, ignoring a configured stop mode
    #[arg(long)]
    pub no_stop: bool,

    /// Mark snapshots as protected
    #[arg(long, conflicts_with = "no_protected")]
    pub protected: bool,

    /// Do not mark snapshots as protected, even if configured
    #[arg(long)]
    pub no_protected: bool,

    /// Label appended to snapshot descriptions
    #[arg(long)]
    pub label: Option<String>,

    /// Topic for the run summary (SNS ARN or http(s) URL)
    #[arg(long)]
    pub sns_arn: Option<String>,

    /// Topic for error details (defaults to the summary topic)
    #[arg(long)]
    pub sns_arn_error: Option<String>,

    /// Instances processed at the same time
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl RunArgs {
    /// Build the discovery filter from --filter, --instance and --tag
    pub fn discovery_filter(&self) -> Result<DiscoveryFilter> {
        let mut filter = match &self.filter {
            Some(json) => DiscoveryFilter::from_json(json).context("Invalid --filter JSON")?,
            None => DiscoveryFilter::default(),
        };

        filter.instance_ids.extend(self.instances.iter().cloned());
        filter
            .tag_matches
            .extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(filter)
    }

    /// Overlay the flags on the configured defaults; an explicit flag always wins
    pub fn directives(&self, defaults: &RunDirectives, verbose: bool) -> RunDirectives {
        let protected = if self.protected {
            true
        } else if self.no_protected {
            false
        } else {
            defaults.protected
        };

        let mut directives = RunDirectives {
            stop_before_snapshot: defaults.stop_before_snapshot,
            require_already_stopped: defaults.require_already_stopped,
            protected,
            label: self.label.clone().or_else(|| defaults.label.clone()),
            primary_topic: self.sns_arn.clone().or_else(|| defaults.primary_topic.clone()),
            error_topic: self
                .sns_arn_error
                .clone()
                .or_else(|| defaults.error_topic.clone()),
            verbose: verbose || defaults.verbose,
        };

        if self.no_stop {
            directives.choose_stop_mode(Some(false), Some(false));
        } else {
            directives.choose_stop_mode(self.stop.then_some(true), self.stopped.then_some(true));
        }
        directives
    }
}

fn parse_tag_match(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => config::load_config_from(path)?,
            None => config::load_config()?,
        };

        match self.command {
            Commands::Run(args) => run_snapshots(&config, args, self.verbose).await,
            Commands::Event { path, request_id } => {
                handle_event(&config, path.as_deref(), request_id, self.verbose).await
            }
            Commands::Config => show_config(&config),
        }
    }
}

/// Interactive run: prints per-volume outcomes and the totals
async fn run_snapshots(config: &ResolvedConfig, args: RunArgs, verbose: bool) -> Result<()> {
    let filter = args.discovery_filter()?;
    let directives = args.directives(&config.defaults, verbose);
    directives.validate()?;

    let orchestrator =
        Orchestrator::from_config(config, config.workflow_settings(args.concurrency));
    let report = orchestrator
        .run(BackupRequest {
            filter,
            directives,
            context: None,
        })
        .await?;

    print_report(&report);
    println!("{}", report.result());
    finish(&report)
}

/// Trigger entry point: event JSON in, `{"result": ..}` out
async fn handle_event(
    config: &ResolvedConfig,
    path: Option<&Path>,
    request_id: Option<String>,
    verbose: bool,
) -> Result<()> {
    let raw = read_event(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("Trigger event is not valid JSON")?;
    let event: TriggerEvent =
        serde_json::from_value(value.clone()).context("Failed to parse trigger event")?;

    let mut directives = event.directives(&config.defaults);
    directives.verbose |= verbose;

    let orchestrator = Orchestrator::from_config(config, config.workflow_settings(None));
    let report = orchestrator
        .run(BackupRequest {
            filter: event.filter(),
            directives,
            context: Some(CorrelationContext::from_env(request_id, Some(value))),
        })
        .await?;

    println!("{}", report.result());
    finish(&report)
}

fn read_event(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file: {}", path.display())),
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read event from stdin")?;
            Ok(buffer)
        }
    }
}

/// Only a failed discovery makes the process exit non-zero
fn finish(report: &RunReport) -> Result<()> {
    match &report.discovery_error {
        Some(error) => anyhow::bail!("Discovery failed: {}", error),
        None => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        let item = &outcome.work_item;
        match outcome.status {
            OutcomeStatus::Success => println!(
                "  ✓ {} {} ({}) -> {}",
                item.instance_id,
                item.volume_id,
                item.device_name,
                outcome.snapshot_id.as_deref().unwrap_or("-")
            ),
            OutcomeStatus::Failed => println!(
                "  ✗ {} {} ({}): {}",
                item.instance_id,
                item.volume_id,
                item.device_name,
                outcome.error_detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!();
    print!("{}", report.summary.totals_block());
    eprintln!(
        "\n[Run {} {} in {:.1}s]",
        report.run_id,
        report.status(),
        report.elapsed.as_secs_f64()
    );
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    let none = "(none)";

    println!("volsnap configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("AWS CLI:");
    println!("  Binary:   {}", config.aws.binary);
    println!("  Region:   {}", config.aws.region.as_deref().unwrap_or(none));
    println!("  Profile:  {}", config.aws.profile.as_deref().unwrap_or(none));
    println!("  Timeout:  {}s", config.aws.command_timeout_seconds);
    println!();
    println!("Topics:");
    println!(
        "  Summary:  {}",
        config.defaults.primary_topic.as_deref().unwrap_or(none)
    );
    println!(
        "  Errors:   {}",
        config.defaults.error_topic().unwrap_or(none)
    );
    println!();
    println!("Defaults:");
    println!("  Stop:      {}", config.defaults.stop_before_snapshot);
    println!("  Stopped:   {}", config.defaults.require_already_stopped);
    println!("  Protected: {}", config.defaults.protected);
    println!("  Label:     {}", config.defaults.label.as_deref().unwrap_or(none));
    println!();
    println!("Runner:");
    println!("  API backoff:     {}ms", config.runner.api_backoff_ms);
    println!("  Max concurrency: {}", config.runner.max_concurrency);

    Ok(())
}
