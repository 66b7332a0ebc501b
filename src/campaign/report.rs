//! Campaign phases and the per-run report.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::leads::Channel;

/// Errors listed in the text summary.
const SUMMARY_ERROR_LIMIT: usize = 10;

/// Lifecycle of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Created,
    Selecting,
    Processing,
    Reporting,
    Completed,
    Halted,
}

impl CampaignPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Selecting => "selecting",
            Self::Processing => "processing",
            Self::Reporting => "reporting",
            Self::Completed => "completed",
            Self::Halted => "halted",
        }
    }
}

impl std::fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignPhase {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "selecting" => Ok(Self::Selecting),
            "processing" => Ok(Self::Processing),
            "reporting" => Ok(Self::Reporting),
            "completed" => Ok(Self::Completed),
            "halted" => Ok(Self::Halted),
            _ => Err(format!("Unknown campaign phase: {}", s)),
        }
    }
}

/// Summary of one orchestration run. Immutable once finalized.
///
/// `total_attempted == total_success + total_failed` always holds. Leads
/// the policy denied at selection and leads stopped before the transport
/// call count as skipped, broken down in `skipped_by_reason`. Leads handed
/// to the approval queue count as queued. Neither is an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign_id: Uuid,
    pub channel: Channel,
    /// `Completed` or `Halted` once finalized.
    pub status: CampaignPhase,
    pub dry_run: bool,
    pub approval_mode: bool,
    pub total_selected: u32,
    pub total_attempted: u32,
    pub total_success: u32,
    pub total_failed: u32,
    pub total_skipped: u32,
    pub total_queued: u32,
    /// Skip reason (`cooldown`, `domain_throttled`, `opted_out`, ...) to count.
    #[serde(default)]
    pub skipped_by_reason: BTreeMap<String, u32>,
    pub errors: Vec<String>,
    pub halt_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignReport {
    pub fn new(channel: Channel, dry_run: bool, approval_mode: bool) -> Self {
        Self {
            campaign_id: Uuid::new_v4(),
            channel,
            status: CampaignPhase::Created,
            dry_run,
            approval_mode,
            total_selected: 0,
            total_attempted: 0,
            total_success: 0,
            total_failed: 0,
            total_skipped: 0,
            total_queued: 0,
            skipped_by_reason: BTreeMap::new(),
            errors: Vec::new(),
            halt_reason: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_success(&mut self) {
        self.total_attempted += 1;
        self.total_success += 1;
    }

    pub fn record_failure(&mut self, error: String) {
        self.total_attempted += 1;
        self.total_failed += 1;
        self.errors.push(error);
    }

    pub fn record_skip(&mut self, reason: &str) {
        self.total_skipped += 1;
        *self.skipped_by_reason.entry(reason.to_string()).or_default() += 1;
    }

    pub fn is_consistent(&self) -> bool {
        self.total_attempted == self.total_success + self.total_failed
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_seconds())
    }

    /// Plain-text summary for operator emails.
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Campaign {} ({})", self.campaign_id, self.channel);
        let _ = writeln!(out, "Status: {}", self.status);
        if self.dry_run {
            let _ = writeln!(out, "Mode: DRY RUN (no messages were actually sent)");
        }
        if let Some(reason) = &self.halt_reason {
            let _ = writeln!(out, "Halt reason: {reason}");
        }
        let _ = writeln!(out, "Selected: {}", self.total_selected);
        let _ = writeln!(out, "Attempted: {}", self.total_attempted);
        let _ = writeln!(out, "Succeeded: {}", self.total_success);
        let _ = writeln!(out, "Failed: {}", self.total_failed);
        let _ = writeln!(out, "Skipped: {}", self.total_skipped);
        for (reason, count) in &self.skipped_by_reason {
            let _ = writeln!(out, "  {reason}: {count}");
        }
        let _ = writeln!(out, "Queued for approval: {}", self.total_queued);
        let _ = writeln!(out, "Started: {}", self.started_at.to_rfc3339());
        if let Some(end) = self.completed_at {
            let _ = writeln!(out, "Completed: {}", end.to_rfc3339());
        }
        if let Some(secs) = self.duration_secs() {
            let _ = writeln!(out, "Duration: {secs}s");
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nErrors ({} total):", self.errors.len());
            for e in self.errors.iter().take(SUMMARY_ERROR_LIMIT) {
                let _ = writeln!(out, "  - {e}");
            }
        }
        out
    }
}
