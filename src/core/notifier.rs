//! Best-effort run notifications.
//!
//! One summary message always goes to the primary topic; runs with
//! failures also send a detail message to the error topic. Publish
//! failures are logged and absorbed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{MessageBody, Notification, ProviderError, Publisher};
use crate::domain::{CorrelationContext, RunDirectives, RunSummary};

/// Notification failures (never propagated past the notifier)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("no {0} topic configured")]
    NoTopic(&'static str),

    #[error("unable to publish to {topic}: {source}")]
    Publish {
        topic: String,
        source: ProviderError,
    },
}

/// Format an elapsed duration as `H:MM:SS.mmm`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:03}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        elapsed.subsec_millis()
    )
}

fn format_start(start_time: DateTime<Local>) -> String {
    start_time.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

fn subject(summary: &RunSummary) -> String {
    format!("[Snapshot {}]", summary.overall_status)
}

/// Context lines echoed into the summary for triggered runs
fn context_block(context: &CorrelationContext) -> String {
    let unknown = "-";
    let mut block = String::new();
    if let Some(event) = &context.event {
        block.push_str(&format!("[+] Trigger event {}\n", event));
    }
    block.push_str("[~] For more information read context\n");
    block.push_str(&format!(
        "[~] Log stream name: {}\n",
        context.log_stream_id.as_deref().unwrap_or(unknown)
    ));
    block.push_str(&format!(
        "[~] Log group name: {}\n",
        context.log_group_id.as_deref().unwrap_or(unknown)
    ));
    block.push_str(&format!(
        "[~] Request ID: {}\n",
        context.request_id.as_deref().unwrap_or(unknown)
    ));
    block.push_str(&format!(
        "[~] Mem. limits(MB): {}\n",
        context
            .memory_limit_mb
            .map(|m| m.to_string())
            .unwrap_or_else(|| unknown.to_string())
    ));
    block
}

/// The summary message sent for every run
pub fn summary_notification(
    summary: &RunSummary,
    start_time: DateTime<Local>,
    elapsed: Duration,
    context: Option<&CorrelationContext>,
) -> Notification {
    let mut text = format!(
        "The snapshot of servers has been {}\nStart time: {}\nElapsed time {}\n{}",
        summary.overall_status,
        format_start(start_time),
        format_elapsed(elapsed),
        summary.totals_block()
    );
    if let Some(context) = context {
        text.push_str(&context_block(context));
    }

    Notification {
        subject: subject(summary),
        body: MessageBody::new(text),
    }
}

/// The detail message sent when any volume failed
pub fn error_notification(summary: &RunSummary, start_time: DateTime<Local>) -> Notification {
    let mut text = format!(
        "There are errors during the snapshot processing\n\
         Below the information of the processing job:\n\
         Start time  : {}\n",
        format_start(start_time)
    );
    for message in &summary.error_messages {
        text.push_str(&format!("\nerror: {}", message));
    }

    let sms = format!(
        "Snapshot status: {}\nThere are errors during the Snapshot\nLook in your e-mail for more information",
        summary.overall_status
    );

    Notification {
        subject: subject(summary),
        body: MessageBody::new(text).with_sms(sms),
    }
}

/// Publishes run notifications
pub struct Notifier {
    publisher: Arc<dyn Publisher>,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Send the summary (and, for failed runs, the detail) message.
    /// Never fails; each publish is attempted independently.
    pub async fn notify(
        &self,
        directives: &RunDirectives,
        summary: &RunSummary,
        start_time: DateTime<Local>,
        elapsed: Duration,
        context: Option<&CorrelationContext>,
    ) {
        let notification = summary_notification(summary, start_time, elapsed, context);
        if let Err(e) = self
            .send("primary", directives.primary_topic.as_deref(), &notification)
            .await
        {
            self.report(directives, &e);
        }

        if summary.overall_status.has_errors() {
            let notification = error_notification(summary, start_time);
            if let Err(e) = self
                .send("error", directives.error_topic(), &notification)
                .await
            {
                self.report(directives, &e);
            }
        }
    }

    async fn send(
        &self,
        kind: &'static str,
        topic: Option<&str>,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        let topic = topic.ok_or(NotifyError::NoTopic(kind))?;

        info!(topic, subject = %notification.subject, "Sending {} notification", kind);
        self.publisher
            .publish(topic, notification)
            .await
            .map_err(|source| NotifyError::Publish {
                topic: topic.to_string(),
                source,
            })
    }

    fn report(&self, directives: &RunDirectives, error: &NotifyError) {
        match error {
            NotifyError::NoTopic(_) => warn!("{}, skipping notification", error),
            _ if directives.verbose => warn!(error = ?error, "Unable to send notification"),
            _ => warn!(error = %error, "Unable to send notification"),
        }
    }
}
