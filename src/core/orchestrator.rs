//! Main orchestrator for snapshot runs.
//!
//! Coordinates discovery, the per-volume workflow, aggregation and
//! notification for one filtered set of instances.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::adapters::{ComputeProvider, Publisher, TopicRouter, WebhookPublisher};
use crate::config::ResolvedConfig;
use crate::domain::{
    CorrelationContext, DirectiveError, DiscoveryFilter, OverallStatus, RunDirectives,
    RunSummary, VolumeOutcome,
};

use super::aggregate::aggregate;
use super::inventory::discover;
use super::naming::{snapshot_date, NameResolver};
use super::notifier::Notifier;
use super::workflow::{VolumeWorkflow, WorkflowSettings};

/// Everything a single run needs from its caller
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub filter: DiscoveryFilter,
    pub directives: RunDirectives,

    /// Present only for triggered invocations
    pub context: Option<CorrelationContext>,
}

/// What a finished run reports back
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    pub outcomes: Vec<VolumeOutcome>,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,

    /// Set when discovery failed and nothing was processed
    pub discovery_error: Option<String>,
}

impl RunReport {
    pub fn status(&self) -> OverallStatus {
        self.summary.overall_status
    }

    /// The run's terminal value: `{"result": "<status>"}`
    pub fn result(&self) -> serde_json::Value {
        serde_json::json!({ "result": self.status().as_str() })
    }
}

/// Snapshot run orchestrator
pub struct Orchestrator {
    provider: Arc<dyn ComputeProvider>,
    notifier: Notifier,
    resolver: NameResolver,
    settings: WorkflowSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        publisher: Arc<dyn Publisher>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            provider,
            notifier: Notifier::new(publisher),
            resolver: NameResolver::new(),
            settings,
        }
    }

    /// Wire the `aws` CLI adapter and the topic router from configuration
    pub fn from_config(config: &ResolvedConfig, settings: WorkflowSettings) -> Self {
        let aws = Arc::new(config.aws_cli());
        let publisher = Arc::new(TopicRouter::new(
            aws.clone(),
            Arc::new(WebhookPublisher::from_env()),
        ));
        Self::new(aws, publisher, settings)
    }

    /// Execute one run.
    ///
    /// Only contradictory directives are returned as an error, before any
    /// provider call. Everything else, including a failed discovery,
    /// ends in a report.
    #[instrument(skip(self, request), fields(provider = %self.provider.name()))]
    pub async fn run(&self, request: BackupRequest) -> Result<RunReport, DirectiveError> {
        let BackupRequest {
            filter,
            directives,
            context,
        } = request;
        directives.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        let clock = Instant::now();
        info!(
            %run_id,
            stop = directives.stop_before_snapshot,
            stopped = directives.require_already_stopped,
            "Starting snapshot run"
        );

        let date = snapshot_date(started_at);
        let (summary, outcomes, discovery_error) = match discover(
            self.provider.as_ref(),
            &self.resolver,
            &filter,
            &date,
            directives.verbose,
        )
        .await
        {
            Ok(inventory) => {
                info!(
                    instances = inventory.total_instances,
                    volumes = inventory.items.len(),
                    "Discovery complete"
                );
                let workflow = VolumeWorkflow::new(
                    self.provider.clone(),
                    directives.clone(),
                    self.settings.clone(),
                );
                let outcomes = workflow.run_all(inventory.items).await;
                let summary = aggregate(inventory.total_instances, &outcomes);
                (summary, outcomes, None)
            }
            Err(e) => {
                error!(error = %e, "Discovery failed, nothing to snapshot");
                let message = e.to_string();
                (
                    RunSummary::discovery_fault(message.clone()),
                    Vec::new(),
                    Some(message),
                )
            }
        };

        info!(
            %run_id,
            status = %summary.overall_status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Snapshot run finished"
        );

        let elapsed = clock.elapsed();
        self.notifier
            .notify(&directives, &summary, started_at, elapsed, context.as_ref())
            .await;

        Ok(RunReport {
            run_id,
            summary,
            outcomes,
            started_at,
            elapsed,
            discovery_error,
        })
    }
}
