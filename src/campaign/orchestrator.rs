//! Campaign orchestrator — one run per channel through
//! `Created → Selecting → Processing → Reporting → Completed`, with `Halted`
//! reachable from any phase.
//!
//! Per lead: halt check, content, then either the approval queue or a slot
//! reservation, the send-time opt-out guard, a pending attempt, the gateway,
//! and the attempt outcome. A failing lead never aborts the batch. Systemic
//! failures (store unreachable, every provider's breaker open) halt the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::attempt::{AttemptStatus, OutreachAttempt};
use super::policy::{self, PolicyInput};
use super::report::{CampaignPhase, CampaignReport};
use super::state::{EngineState, HaltSwitch};
use crate::approval::{ApprovalGate, ApprovalStatus};
use crate::compliance::{AuditEntry, AuditLevel, AuditLogger, OptOutRegistry};
use crate::config::CampaignSettings;
use crate::content::{ContentPipeline, Message};
use crate::delivery::DeliveryGateway;
use crate::error::{ApprovalError, CampaignError, DatabaseError, DeliveryError};
use crate::leads::{Channel, ContactKind, Lead};
use crate::notify::{Notifier, ReportSink, Severity};
use crate::store::Database;

/// Bounds on candidates fetched per store page during selection.
const MIN_PAGE: u32 = 50;
const MAX_PAGE: u32 = 500;

/// What happened to one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum LeadOutcome {
    Sent,
    Failed(String),
    /// Not attempted: send-time guard, reservation denied, or run halted.
    Skipped(String),
    /// Handed to the approval queue.
    Queued,
    /// Systemic failure. `attempted` is set when an attempt row was written.
    Halted { reason: String, attempted: bool },
}

/// Collaborators shared by every run. All cheap to clone.
#[derive(Clone)]
pub struct CampaignServices {
    pub db: Arc<dyn Database>,
    pub state: Arc<EngineState>,
    pub pipeline: Arc<ContentPipeline>,
    pub gateway: Arc<DeliveryGateway>,
    pub approvals: Arc<ApprovalGate>,
    pub opt_outs: Arc<OptOutRegistry>,
    pub audit: Arc<AuditLogger>,
    pub notifier: Arc<dyn Notifier>,
    pub reports: Arc<dyn ReportSink>,
}

pub struct Orchestrator {
    services: CampaignServices,
    settings: CampaignSettings,
}

/// Per-run context handed to each lead task.
struct RunContext {
    campaign_id: Option<Uuid>,
    channel: Channel,
    /// Tripped by a systemic failure inside this run.
    halt: HaltSwitch,
}

impl Orchestrator {
    pub fn new(services: CampaignServices, settings: CampaignSettings) -> Self {
        Self { services, settings }
    }

    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    /// Execute one campaign run for `channel`.
    ///
    /// `Err` only when the run cannot start (overlap, operator halt). Every
    /// started run ends with a persisted report in `Completed` or `Halted`.
    pub async fn run(&self, channel: Channel) -> Result<CampaignReport, CampaignError> {
        if self.services.state.halt.is_halted() {
            return Err(CampaignError::HaltedByOperator);
        }
        let _guard = self
            .services
            .state
            .runs
            .try_start(channel)
            .ok_or(CampaignError::AlreadyRunning(channel))?;

        let mut report =
            CampaignReport::new(channel, self.settings.dry_run, self.settings.approval_mode);
        let ctx = RunContext {
            campaign_id: Some(report.campaign_id),
            channel,
            halt: HaltSwitch::new(),
        };
        info!(
            campaign_id = %report.campaign_id,
            %channel,
            dry_run = report.dry_run,
            approval_mode = report.approval_mode,
            "Campaign started"
        );

        if let Err(e) = self.services.db.insert_campaign(&report).await {
            return Ok(self.halt(report, format!("lead store unavailable: {e}")).await);
        }

        if channel == Channel::Call
            && let Some(window) = self.settings.call_window
            && !window.contains(Utc::now())
        {
            info!(%channel, "Outside call window, nothing to do");
            report.errors.push("outside call window".to_string());
            return Ok(self.finish(report).await);
        }

        if !self.settings.dry_run
            && !self.settings.approval_mode
            && !self.services.gateway.has_provider(channel)
        {
            let reason = DeliveryError::NoProviderConfigured { channel }.to_string();
            return Ok(self.halt(report, reason).await);
        }

        // ── Selecting ───────────────────────────────────────────────
        report.status = CampaignPhase::Selecting;
        let selected = match self.select(channel, &mut report).await {
            Ok(leads) => leads,
            Err(e) => {
                return Ok(self.halt(report, format!("lead store unavailable: {e}")).await);
            }
        };
        report.total_selected = selected.len() as u32;
        info!(campaign_id = %report.campaign_id, selected = selected.len(), "Leads selected");

        // ── Processing ──────────────────────────────────────────────
        report.status = CampaignPhase::Processing;
        let ctx = &ctx;
        let outcomes: Vec<(Uuid, LeadOutcome)> = stream::iter(selected)
            .map(move |lead| async move {
                let id = lead.id;
                (id, self.process_lead(ctx, lead).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        // ── Reporting ───────────────────────────────────────────────
        report.status = CampaignPhase::Reporting;
        let mut halt_reason = None;
        for (lead_id, outcome) in outcomes {
            match outcome {
                LeadOutcome::Sent => report.record_success(),
                LeadOutcome::Failed(e) => report.record_failure(format!("lead {lead_id}: {e}")),
                LeadOutcome::Skipped(reason) => {
                    debug!(%lead_id, %reason, "Lead skipped");
                    report.record_skip(&reason);
                }
                LeadOutcome::Queued => report.total_queued += 1,
                LeadOutcome::Halted { reason, attempted } => {
                    if attempted {
                        report.record_failure(format!("lead {lead_id}: {reason}"));
                    } else {
                        report.record_skip("halted");
                    }
                    halt_reason.get_or_insert(reason);
                }
            }
        }
        if halt_reason.is_none() && self.services.state.halt.is_halted() {
            halt_reason = Some(CampaignError::HaltedByOperator.to_string());
        }

        match halt_reason {
            Some(reason) => Ok(self.halt(report, reason).await),
            None => Ok(self.finish(report).await),
        }
    }

    /// Send an approved queue item through the same guard and gateway path.
    pub async fn approve_and_send(&self, item_id: Uuid) -> Result<LeadOutcome, CampaignError> {
        if self.services.state.halt.is_halted() {
            return Err(CampaignError::HaltedByOperator);
        }
        let item = self
            .services
            .approvals
            .get(item_id)
            .await
            .ok_or(ApprovalError::NotFound(item_id))?;
        if item.status != ApprovalStatus::Approved {
            return Err(ApprovalError::NotActionable {
                id: item_id,
                status: item.status.to_string(),
            }
            .into());
        }
        let lead = self
            .services
            .db
            .get_lead(item.lead_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "lead".into(),
                id: item.lead_id.to_string(),
            })?;

        let ctx = RunContext {
            campaign_id: None,
            channel: item.channel,
            halt: HaltSwitch::new(),
        };
        self.seed_rate(item.channel).await?;

        let outcome = if lead.undeliverable {
            LeadOutcome::Skipped("undeliverable".into())
        } else {
            self.deliver(&ctx, &lead, &item.message).await
        };

        match &outcome {
            LeadOutcome::Sent => {
                self.services.approvals.mark_sent(item_id).await?;
            }
            LeadOutcome::Halted { reason, .. } => {
                self.services
                    .notifier
                    .alert(
                        Severity::Critical,
                        &format!("Approved send halted: {reason}"),
                        serde_json::json!({ "item_id": item_id, "channel": item.channel.as_str() }),
                    )
                    .await;
            }
            _ => {}
        }
        info!(%item_id, outcome = ?outcome, "Approved item processed");
        Ok(outcome)
    }

    // ── Selection ───────────────────────────────────────────────────

    async fn seed_rate(&self, channel: Channel) -> Result<(), DatabaseError> {
        let rate = &self.services.state.rate;
        if !rate.is_seeded(channel) {
            let since = Utc::now() - chrono::Duration::hours(24);
            let past = self.services.db.attempt_times_since(channel, since).await?;
            rate.seed(channel, past);
        }
        Ok(())
    }

    /// Eligible leads for this run, at most the remaining daily allowance.
    ///
    /// Pages through the store until the allowance is filled or the eligible
    /// pool runs out. Policy denials are recorded on `report` as skips.
    async fn select(
        &self,
        channel: Channel,
        report: &mut CampaignReport,
    ) -> Result<Vec<Lead>, DatabaseError> {
        self.seed_rate(channel).await?;

        let now = Utc::now();
        let cap = self.settings.daily_cap(channel);
        let remaining = self.services.state.rate.remaining(channel, cap, now);
        if remaining <= 0 {
            info!(%channel, cap, "Daily cap already reached");
            return Ok(Vec::new());
        }

        let page_size = u32::try_from(remaining).unwrap_or(MAX_PAGE).clamp(MIN_PAGE, MAX_PAGE);
        let cutoff = now - self.settings.cooldown();
        let mut domain_counts: HashMap<String, u32> =
            self.services.state.rate.domain_counts(channel, now);
        let mut selected = Vec::new();
        let mut offset = 0;

        'pages: loop {
            let mut page = self
                .services
                .db
                .query_eligible(channel, cutoff, page_size, offset)
                .await?;
            let fetched = page.len() as u32;
            policy::prioritize(&mut page);

            for lead in page {
                if selected.len() as i64 >= remaining {
                    break 'pages;
                }
                if self.services.approvals.has_active_for_lead(lead.id).await {
                    report.record_skip("awaiting_approval");
                    continue;
                }
                let verdict = policy::is_eligible(&PolicyInput {
                    lead: &lead,
                    channel,
                    now,
                    daily_remaining: remaining - selected.len() as i64,
                    cooldown_days: self.settings.cooldown_days,
                    domain_counts: &domain_counts,
                    per_domain_limit: self.settings.per_domain_limit,
                });
                if let Some(reason) = verdict.reason {
                    report.record_skip(reason.as_str());
                    continue;
                }
                if channel == Channel::Email
                    && let Some(domain) = lead.email_domain()
                {
                    *domain_counts.entry(domain).or_default() += 1;
                }
                selected.push(lead);
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        if report.total_skipped > 0 {
            debug!(%channel, denied = ?report.skipped_by_reason, "Candidates filtered by policy");
        }
        Ok(selected)
    }

    // ── Processing ──────────────────────────────────────────────────

    fn halted(&self, ctx: &RunContext) -> bool {
        self.services.state.halt.is_halted() || ctx.halt.is_halted()
    }

    async fn process_lead(&self, ctx: &RunContext, lead: Lead) -> LeadOutcome {
        if self.halted(ctx) {
            return LeadOutcome::Skipped("halted".into());
        }

        let message = match self.services.pipeline.generate(&lead, ctx.channel).await {
            Ok(m) => m,
            Err(e) => return self.systemic(ctx, format!("lead store unavailable: {e}"), false),
        };

        if self.settings.approval_mode {
            return match self
                .services
                .approvals
                .enqueue(lead.id, ctx.channel, message)
                .await
            {
                Ok(_) => LeadOutcome::Queued,
                Err(e) => self.systemic(ctx, format!("approval queue unavailable: {e}"), false),
            };
        }

        self.deliver(ctx, &lead, &message).await
    }

    /// Reserve a slot, guard, record, send, and record the outcome.
    async fn deliver(&self, ctx: &RunContext, lead: &Lead, message: &Message) -> LeadOutcome {
        let s = &self.services;
        let channel = message.channel;
        let dry_run = self.settings.dry_run;
        let now = Utc::now();
        let domain = match channel {
            Channel::Email => lead.email_domain(),
            Channel::Call => None,
        };

        if self.halted(ctx) {
            return LeadOutcome::Skipped("halted".into());
        }
        if let Err(reason) = s.state.rate.try_acquire(
            channel,
            domain.as_deref(),
            self.settings.daily_cap(channel),
            self.settings.per_domain_limit,
            now,
        ) {
            return LeadOutcome::Skipped(reason.as_str().into());
        }

        let mut attempt =
            OutreachAttempt::pending(lead.id, ctx.campaign_id, channel, message, domain, dry_run);

        let kind = match channel {
            Channel::Email => ContactKind::Email,
            Channel::Call => ContactKind::Phone,
        };
        let contact = lead.contact_for(channel).unwrap_or_default();
        if s.opt_outs.is_opted_out(kind, contact).await {
            warn!(lead_id = %lead.id, "Lead opted out after selection, send blocked");
            let skipped = attempt.skip("opted_out");
            if let Err(e) = s.db.insert_attempt(&skipped).await {
                return self.systemic(ctx, format!("lead store unavailable: {e}"), false);
            }
            s.audit
                .record(
                    AuditEntry::new(AuditLevel::Warning, "campaign", "send_blocked_opted_out")
                        .lead(lead.id),
                )
                .await;
            return LeadOutcome::Skipped("opted_out".into());
        }

        if let Err(e) = s.db.insert_attempt(&attempt).await {
            return self.systemic(ctx, format!("lead store unavailable: {e}"), false);
        }

        if self.halted(ctx) {
            let skipped = attempt.skip("halted");
            self.complete(&skipped).await;
            return LeadOutcome::Skipped("halted".into());
        }

        let result = match s.gateway.send(message, lead, dry_run).await {
            Ok(result) => result,
            Err(e) => {
                attempt.status = AttemptStatus::Failed;
                attempt.error = Some(e.to_string());
                attempt.completed_at = Some(Utc::now());
                self.complete(&attempt).await;
                return match e {
                    DeliveryError::AllProvidersUnavailable { .. }
                    | DeliveryError::NoProviderConfigured { .. } => {
                        self.systemic(ctx, e.to_string(), true)
                    }
                    _ => {
                        warn!(lead_id = %lead.id, error = %e, "Delivery rejected");
                        LeadOutcome::Failed(e.to_string())
                    }
                };
            }
        };

        attempt.status = if result.success {
            AttemptStatus::Sent
        } else {
            AttemptStatus::Failed
        };
        attempt.provider = Some(result.provider.clone());
        attempt.provider_message_id = result.provider_message_id.clone();
        attempt.provider_response = result.raw_response.clone();
        attempt.error = result.failure.as_ref().map(|f| f.to_string());
        attempt.completed_at = Some(Utc::now());
        self.complete(&attempt).await;

        if result.success {
            // Dry runs keep cooldown bookkeeping identical to live runs.
            match s.db.record_contact(lead.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(lead_id = %lead.id, "Lead opted out during send, contact not recorded")
                }
                Err(e) => error!(lead_id = %lead.id, error = %e, "Failed to record contact"),
            }
            s.audit
                .record(
                    AuditEntry::new(AuditLevel::Info, "campaign", "outreach_sent")
                        .lead(lead.id)
                        .details(serde_json::json!({
                            "channel": channel.as_str(),
                            "provider": result.provider,
                            "dry_run": dry_run,
                            "content_hash": message.content_hash,
                        })),
                )
                .await;
            return LeadOutcome::Sent;
        }

        let failure = attempt.error.clone().unwrap_or_else(|| "unknown failure".into());
        if result.is_critical() {
            // Provider-level rejection such as bad credentials. The lead stays deliverable.
            return self.systemic(ctx, format!("provider rejected request: {failure}"), true);
        }
        if result.is_permanent() {
            warn!(lead_id = %lead.id, error = %failure, "Permanent failure, lead marked undeliverable");
            if let Err(e) = s.db.mark_undeliverable(lead.id).await {
                error!(lead_id = %lead.id, error = %e, "Failed to mark lead undeliverable");
            }
        } else {
            warn!(lead_id = %lead.id, kind = ?result.kind(), error = %failure, "Delivery failed");
        }
        LeadOutcome::Failed(failure)
    }

    async fn complete(&self, attempt: &OutreachAttempt) {
        match self.services.db.complete_attempt(attempt).await {
            Ok(true) => {}
            Ok(false) => warn!(attempt_id = %attempt.id, "Attempt already completed"),
            Err(e) => error!(attempt_id = %attempt.id, error = %e, "Failed to complete attempt"),
        }
    }

    /// Trip the run-local halt and report the lead as halted.
    fn systemic(&self, ctx: &RunContext, reason: String, attempted: bool) -> LeadOutcome {
        if !ctx.halt.is_halted() {
            error!(channel = %ctx.channel, %reason, "Critical failure, halting run");
        }
        ctx.halt.halt();
        LeadOutcome::Halted { reason, attempted }
    }

    // ── Finalizing ──────────────────────────────────────────────────

    async fn halt(&self, mut report: CampaignReport, reason: String) -> CampaignReport {
        error!(campaign_id = %report.campaign_id, phase = %report.status, %reason, "Campaign halted");
        report.status = CampaignPhase::Halted;
        report.halt_reason = Some(reason.clone());
        report.completed_at = Some(Utc::now());
        self.persist(&report).await;

        self.services
            .notifier
            .alert(
                Severity::Critical,
                &format!("{} campaign halted: {reason}", report.channel),
                serde_json::json!({
                    "campaign_id": report.campaign_id,
                    "attempted": report.total_attempted,
                    "failed": report.total_failed,
                }),
            )
            .await;
        self.dispatch(&report);
        report
    }

    async fn finish(&self, mut report: CampaignReport) -> CampaignReport {
        report.status = CampaignPhase::Completed;
        report.completed_at = Some(Utc::now());
        self.persist(&report).await;
        info!(
            campaign_id = %report.campaign_id,
            attempted = report.total_attempted,
            success = report.total_success,
            failed = report.total_failed,
            skipped = report.total_skipped,
            queued = report.total_queued,
            "Campaign completed"
        );
        self.dispatch(&report);
        report
    }

    async fn persist(&self, report: &CampaignReport) {
        if let Err(e) = self.services.db.update_campaign(report).await {
            error!(campaign_id = %report.campaign_id, error = %e, "Failed to persist campaign report");
        }
        self.services
            .audit
            .record(
                AuditEntry::new(AuditLevel::Info, "campaign", "campaign_finished").details(
                    serde_json::json!({
                        "campaign_id": report.campaign_id,
                        "status": report.status.as_str(),
                        "attempted": report.total_attempted,
                        "success": report.total_success,
                        "failed": report.total_failed,
                    }),
                ),
            )
            .await;
    }

    /// Fire-and-forget report delivery.
    fn dispatch(&self, report: &CampaignReport) {
        let sink = self.services.reports.clone();
        let report = report.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&report).await {
                warn!(campaign_id = %report.campaign_id, error = %e, "Report delivery failed");
            }
        });
    }
}
