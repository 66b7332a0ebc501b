//! Operator notification and campaign report delivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::campaign::report::CampaignReport;
use crate::delivery::transport::{EmailTransport, OutboundEmail};
use crate::error::ProviderError;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Operator notification channel. Raised on breaker-open and halted runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, severity: Severity, message: &str, context: serde_json::Value);
}

/// Writes alerts to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn alert(&self, severity: Severity, message: &str, context: serde_json::Value) {
        match severity {
            Severity::Info => info!(target: "outreach::alert", %context, "{message}"),
            Severity::Warning => warn!(target: "outreach::alert", %context, "{message}"),
            Severity::Critical => error!(target: "outreach::alert", %context, "{message}"),
        }
    }
}

/// Destination for finished campaign reports.
///
/// Fire-and-forget: a delivery failure is logged and never fails the run.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &CampaignReport) -> Result<(), ProviderError>;
}

/// Logs the report summary.
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn deliver(&self, report: &CampaignReport) -> Result<(), ProviderError> {
        info!(
            campaign_id = %report.campaign_id,
            channel = %report.channel,
            status = %report.status,
            attempted = report.total_attempted,
            success = report.total_success,
            failed = report.total_failed,
            skipped = report.total_skipped,
            queued = report.total_queued,
            "Campaign report"
        );
        Ok(())
    }
}

/// Emails the report to an operator address.
pub struct EmailReportSink {
    transport: Arc<dyn EmailTransport>,
    from: String,
    to: String,
}

impl EmailReportSink {
    pub fn new(transport: Arc<dyn EmailTransport>, from: String, to: String) -> Self {
        Self { transport, from, to }
    }
}

#[async_trait]
impl ReportSink for EmailReportSink {
    async fn deliver(&self, report: &CampaignReport) -> Result<(), ProviderError> {
        let subject = format!(
            "[{}] {} campaign {} ({} sent / {} failed)",
            report.status.as_str().to_uppercase(),
            report.channel,
            report.started_at.format("%Y-%m-%d"),
            report.total_success,
            report.total_failed
        );
        let text = report.summary_text();
        let email = OutboundEmail {
            from: self.from.clone(),
            from_name: None,
            to: self.to.clone(),
            subject,
            html: format!("<pre>{}</pre>", text),
            text,
            headers: Vec::new(),
        };
        self.transport.send_email(&email).await.map(|_| ())
    }
}
