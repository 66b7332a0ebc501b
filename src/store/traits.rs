//! `Database` trait — single async interface for all persistence.
//!
//! The lead store is the source of truth for caps, cooldown, and consent.
//! Everything the engine writes goes through here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::approval::model::{ApprovalItem, ApprovalStatus};
use crate::campaign::attempt::{AttemptCorrection, OutreachAttempt};
use crate::campaign::report::CampaignReport;
use crate::compliance::audit::AuditEntry;
use crate::compliance::opt_out::OptOutRecord;
use crate::content::{Message, UnsubscribeToken};
use crate::error::DatabaseError;
use crate::leads::{Channel, Lead};

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    /// Leads not opted out, not undeliverable, verified for `channel`, and
    /// last contacted before `cooldown_cutoff` (or never). Never-contacted
    /// first, then oldest contact first. `offset` pages through the same
    /// ordering; a page shorter than `limit` is the last one.
    async fn query_eligible(
        &self,
        channel: Channel,
        cooldown_cutoff: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Lead>, DatabaseError>;

    /// Bump `last_contacted_at`/`contact_count`. Re-checks `opted_out` in
    /// the same statement; returns `false` if the lead opted out meanwhile.
    async fn record_contact(&self, lead_id: Uuid, at: DateTime<Utc>)
    -> Result<bool, DatabaseError>;

    /// Leads whose primary email or phone equals the normalized `contact`.
    async fn leads_with_contact(&self, contact: &str) -> Result<Vec<Lead>, DatabaseError>;

    /// Permanently exclude a lead from future campaigns.
    async fn mark_undeliverable(&self, lead_id: Uuid) -> Result<(), DatabaseError>;

    /// Store the verification verdict and stamp `verified_at`.
    async fn update_verification(
        &self,
        lead_id: Uuid,
        email_verified: bool,
        phone_verified: bool,
        confidence: f64,
    ) -> Result<(), DatabaseError>;

    /// Contactable leads never run through verification, oldest first.
    async fn leads_pending_verification(&self, limit: u32) -> Result<Vec<Lead>, DatabaseError>;

    // ── Opt-outs ────────────────────────────────────────────────────

    /// Authoritative opt-out check on a normalized contact value.
    async fn is_opted_out(&self, contact: &str) -> Result<bool, DatabaseError>;

    /// Append an opt-out record and flag matching leads. Returns `false` if
    /// the contact had already opted out.
    async fn record_opt_out(&self, record: &OptOutRecord) -> Result<bool, DatabaseError>;

    async fn list_opt_outs(&self) -> Result<Vec<OptOutRecord>, DatabaseError>;

    // ── Messages and unsubscribe tokens ─────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError>;

    async fn insert_unsubscribe_token(&self, token: &UnsubscribeToken)
    -> Result<(), DatabaseError>;

    async fn resolve_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<UnsubscribeToken>, DatabaseError>;

    // ── Attempts ────────────────────────────────────────────────────

    async fn insert_attempt(&self, attempt: &OutreachAttempt) -> Result<(), DatabaseError>;

    /// Write the outcome of a pending attempt. Completed attempts are not
    /// touched; returns `false` if the attempt was not pending.
    async fn complete_attempt(&self, attempt: &OutreachAttempt) -> Result<bool, DatabaseError>;

    async fn get_attempt(&self, id: Uuid) -> Result<Option<OutreachAttempt>, DatabaseError>;

    async fn find_attempt_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<OutreachAttempt>, DatabaseError>;

    async fn list_attempts_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<OutreachAttempt>, DatabaseError>;

    async fn list_attempts_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<OutreachAttempt>, DatabaseError>;

    /// `(attempted_at, recipient_domain)` for every attempt since `since`.
    async fn attempt_times_since(
        &self,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, Option<String>)>, DatabaseError>;

    async fn insert_correction(&self, correction: &AttemptCorrection)
    -> Result<(), DatabaseError>;

    async fn list_corrections(
        &self,
        attempt_id: Uuid,
    ) -> Result<Vec<AttemptCorrection>, DatabaseError>;

    // ── Approval queue ──────────────────────────────────────────────

    async fn insert_approval_item(&self, item: &ApprovalItem) -> Result<(), DatabaseError>;

    async fn update_approval_item(&self, item: &ApprovalItem) -> Result<(), DatabaseError>;

    async fn get_approval_item(&self, id: Uuid) -> Result<Option<ApprovalItem>, DatabaseError>;

    async fn list_approval_items(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalItem>, DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, report: &CampaignReport) -> Result<(), DatabaseError>;

    async fn update_campaign(&self, report: &CampaignReport) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignReport>, DatabaseError>;

    /// Most recently started campaign for `channel`.
    async fn latest_campaign(
        &self,
        channel: Channel,
    ) -> Result<Option<CampaignReport>, DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError>;

    async fn list_audit(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError>;

    /// Delete audit rows older than `cutoff`. Returns rows removed.
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
