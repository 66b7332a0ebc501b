//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 UTC strings with microsecond precision so they order correctly
//! as text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::approval::model::{ApprovalItem, ApprovalStatus};
use crate::campaign::attempt::{AttemptCorrection, AttemptStatus, OutreachAttempt};
use crate::campaign::report::{CampaignPhase, CampaignReport};
use crate::compliance::audit::{AuditEntry, AuditLevel};
use crate::compliance::opt_out::OptOutRecord;
use crate::content::{GenerationMethod, Message, UnsubscribeToken};
use crate::error::DatabaseError;
use crate::leads::{Channel, ContactKind, Lead};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_optional_uuid(s: Option<String>) -> Option<Uuid> {
    s.and_then(|s| Uuid::parse_str(&s).ok())
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text(dt.map(|d| fmt_ts(&d)))
}

fn bool_int(b: bool) -> i64 {
    i64::from(b)
}

fn query_err(ctx: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{ctx}: {e}"))
}

fn to_json(value: &impl serde::Serialize) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Column order for lead queries:
/// 0:id, 1:source, 2:business_name, 3:city, 4:category, 5:website,
/// 6:primary_email, 7:primary_phone, 8:email_verified, 9:phone_verified,
/// 10:verification_confidence, 11:opted_out, 12:opted_out_at,
/// 13:opted_out_method, 14:undeliverable, 15:last_contacted_at,
/// 16:contact_count, 17:created_at
const LEAD_COLUMNS: &str = "id, source, business_name, city, category, website, primary_email, primary_phone, email_verified, phone_verified, verification_confidence, opted_out, opted_out_at, opted_out_method, undeliverable, last_contacted_at, contact_count, created_at";

fn row_to_lead(row: &libsql::Row) -> Result<Lead, libsql::Error> {
    let id: String = row.get(0)?;
    let opted_out_method: Option<String> = row.get(13).ok();
    let created: String = row.get(17)?;
    Ok(Lead {
        id: parse_uuid(&id),
        source: row.get(1)?,
        business_name: row.get(2)?,
        city: row.get(3)?,
        category: row.get(4)?,
        website: row.get(5).ok(),
        primary_email: row.get(6).ok(),
        primary_phone: row.get(7).ok(),
        email_verified: row.get::<i64>(8)? != 0,
        phone_verified: row.get::<i64>(9)? != 0,
        verification_confidence: row.get(10)?,
        opted_out: row.get::<i64>(11)? != 0,
        opted_out_at: parse_optional_datetime(&row.get(12).ok()),
        opted_out_method: opted_out_method.and_then(|m| m.parse().ok()),
        undeliverable: row.get::<i64>(14)? != 0,
        last_contacted_at: parse_optional_datetime(&row.get(15).ok()),
        contact_count: u32::try_from(row.get::<i64>(16)?).unwrap_or(0),
        created_at: parse_datetime(&created),
    })
}

const MESSAGE_COLUMNS: &str = "id, lead_id, channel, subject, html_body, text_body, method, unsubscribe_token, unsubscribe_url, content_hash, created_at";

fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let id: String = row.get(0)?;
    let lead_id: String = row.get(1)?;
    let channel: String = row.get(2)?;
    let method: String = row.get(6)?;
    let created: String = row.get(10)?;
    Ok(Message {
        id: parse_uuid(&id),
        lead_id: parse_uuid(&lead_id),
        channel: channel.parse().unwrap_or(Channel::Email),
        subject: row.get(3)?,
        html_body: row.get(4)?,
        text_body: row.get(5)?,
        method: method.parse().unwrap_or(GenerationMethod::Template),
        unsubscribe_token: row.get(7)?,
        unsubscribe_url: row.get(8)?,
        content_hash: row.get(9)?,
        created_at: parse_datetime(&created),
    })
}

/// 0:id, 1:lead_id, 2:campaign_id, 3:channel, 4:message_id, 5:content_hash,
/// 6:recipient_domain, 7:status, 8:provider, 9:provider_message_id,
/// 10:provider_response, 11:error, 12:dry_run, 13:attempted_at, 14:completed_at
const ATTEMPT_COLUMNS: &str = "id, lead_id, campaign_id, channel, message_id, content_hash, recipient_domain, status, provider, provider_message_id, provider_response, error, dry_run, attempted_at, completed_at";

fn row_to_attempt(row: &libsql::Row) -> Result<OutreachAttempt, libsql::Error> {
    let id: String = row.get(0)?;
    let lead_id: String = row.get(1)?;
    let channel: String = row.get(3)?;
    let status: String = row.get(7)?;
    let response: Option<String> = row.get(10).ok();
    let attempted: String = row.get(13)?;
    Ok(OutreachAttempt {
        id: parse_uuid(&id),
        lead_id: parse_uuid(&lead_id),
        campaign_id: parse_optional_uuid(row.get(2).ok()),
        channel: channel.parse().unwrap_or(Channel::Email),
        message_id: parse_optional_uuid(row.get(4).ok()),
        content_hash: row.get(5).ok(),
        recipient_domain: row.get(6).ok(),
        status: status.parse().unwrap_or(AttemptStatus::Failed),
        provider: row.get(8).ok(),
        provider_message_id: row.get(9).ok(),
        provider_response: response.and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get(11).ok(),
        dry_run: row.get::<i64>(12)? != 0,
        attempted_at: parse_datetime(&attempted),
        completed_at: parse_optional_datetime(&row.get(14).ok()),
    })
}

const APPROVAL_COLUMNS: &str =
    "id, lead_id, channel, payload, status, reviewer, reviewed_at, created_at, expires_at, updated_at";

fn row_to_approval(row: &libsql::Row) -> Result<Option<ApprovalItem>, libsql::Error> {
    let id: String = row.get(0)?;
    let lead_id: String = row.get(1)?;
    let channel: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created: String = row.get(7)?;
    let expires: String = row.get(8)?;
    let updated: String = row.get(9)?;

    // A payload that no longer deserializes cannot be sent; skip it.
    let Ok(message) = serde_json::from_str::<Message>(&payload) else {
        tracing::warn!(item_id = %id, "Unreadable approval payload");
        return Ok(None);
    };

    Ok(Some(ApprovalItem {
        id: parse_uuid(&id),
        lead_id: parse_uuid(&lead_id),
        channel: channel.parse().unwrap_or(Channel::Email),
        message,
        status: status.parse().unwrap_or(ApprovalStatus::Pending),
        reviewer: row.get(5).ok(),
        reviewed_at: parse_optional_datetime(&row.get(6).ok()),
        created_at: parse_datetime(&created),
        expires_at: parse_datetime(&expires),
        updated_at: parse_datetime(&updated),
    }))
}

const CAMPAIGN_COLUMNS: &str = "id, channel, status, dry_run, approval_mode, total_selected, total_attempted, total_success, total_failed, total_skipped, total_queued, errors, halt_reason, started_at, completed_at, skipped_by_reason";

fn row_to_campaign(row: &libsql::Row) -> Result<CampaignReport, libsql::Error> {
    let id: String = row.get(0)?;
    let channel: String = row.get(1)?;
    let status: String = row.get(2)?;
    let errors: String = row.get(11)?;
    let started: String = row.get(13)?;
    let skipped_by_reason: String = row.get(15)?;
    let count = |i: i32| -> Result<u32, libsql::Error> {
        Ok(u32::try_from(row.get::<i64>(i)?).unwrap_or(0))
    };
    Ok(CampaignReport {
        campaign_id: parse_uuid(&id),
        channel: channel.parse().unwrap_or(Channel::Email),
        status: status.parse().unwrap_or(CampaignPhase::Halted),
        dry_run: row.get::<i64>(3)? != 0,
        approval_mode: row.get::<i64>(4)? != 0,
        total_selected: count(5)?,
        total_attempted: count(6)?,
        total_success: count(7)?,
        total_failed: count(8)?,
        total_skipped: count(9)?,
        total_queued: count(10)?,
        errors: serde_json::from_str(&errors).unwrap_or_default(),
        halt_reason: row.get(12).ok(),
        started_at: parse_datetime(&started),
        completed_at: parse_optional_datetime(&row.get(14).ok()),
        skipped_by_reason: serde_json::from_str(&skipped_by_reason).unwrap_or_default(),
    })
}

const AUDIT_COLUMNS: &str = "id, level, component, action, lead_id, actor, details, created_at";

fn row_to_audit(row: &libsql::Row) -> Result<AuditEntry, libsql::Error> {
    let id: String = row.get(0)?;
    let level: String = row.get(1)?;
    let details: String = row.get(6)?;
    let created: String = row.get(7)?;
    Ok(AuditEntry {
        id: parse_uuid(&id),
        level: level.parse().unwrap_or(AuditLevel::Info),
        component: row.get(2)?,
        action: row.get(3)?,
        lead_id: parse_optional_uuid(row.get(4).ok()),
        actor: row.get(5).ok(),
        details: serde_json::from_str(&details).unwrap_or_default(),
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        let now = fmt_ts(&Utc::now());
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO leads ({LEAD_COLUMNS}, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                ),
                params![
                    lead.id.to_string(),
                    lead.source.clone(),
                    lead.business_name.clone(),
                    lead.city.clone(),
                    lead.category.clone(),
                    opt_text(lead.website.clone()),
                    opt_text(lead.primary_email.clone()),
                    opt_text(lead.primary_phone.clone()),
                    bool_int(lead.email_verified),
                    bool_int(lead.phone_verified),
                    lead.verification_confidence,
                    bool_int(lead.opted_out),
                    opt_ts(lead.opted_out_at),
                    opt_text(lead.opted_out_method.map(|m| m.as_str().to_string())),
                    bool_int(lead.undeliverable),
                    opt_ts(lead.last_contacted_at),
                    i64::from(lead.contact_count),
                    fmt_ts(&lead.created_at),
                    now,
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                s if s.contains("UNIQUE") => DatabaseError::Constraint(format!("insert_lead: {s}")),
                s => DatabaseError::Query(format!("insert_lead: {s}")),
            })?;
        debug!(lead_id = %lead.id, "Lead inserted");
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_lead"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row).map_err(query_err("get_lead row"))?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lead: {e}"))),
        }
    }

    async fn query_eligible(
        &self,
        channel: Channel,
        cooldown_cutoff: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Lead>, DatabaseError> {
        let (contact_col, verified_col) = match channel {
            Channel::Email => ("primary_email", "email_verified"),
            Channel::Call => ("primary_phone", "phone_verified"),
        };
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads
             WHERE opted_out = 0 AND undeliverable = 0
               AND {contact_col} IS NOT NULL AND {contact_col} != ''
               AND {verified_col} = 1
               AND (last_contacted_at IS NULL OR last_contacted_at <= ?1)
             ORDER BY last_contacted_at IS NOT NULL, last_contacted_at ASC, created_at ASC, id ASC
             LIMIT ?2 OFFSET ?3"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![fmt_ts(&cooldown_cutoff), i64::from(limit), i64::from(offset)])
            .await
            .map_err(query_err("query_eligible"))?;

        let mut leads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            leads.push(row_to_lead(&row).map_err(query_err("query_eligible row"))?);
        }
        Ok(leads)
    }

    async fn record_contact(
        &self,
        lead_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let ts = fmt_ts(&at);
        let changed = self
            .conn()
            .execute(
                "UPDATE leads SET last_contacted_at = ?1, contact_count = contact_count + 1, updated_at = ?1
                 WHERE id = ?2 AND opted_out = 0",
                params![ts, lead_id.to_string()],
            )
            .await
            .map_err(query_err("record_contact"))?;
        Ok(changed > 0)
    }

    async fn leads_with_contact(&self, contact: &str) -> Result<Vec<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEAD_COLUMNS} FROM leads WHERE primary_email = ?1 OR primary_phone = ?1"
                ),
                params![contact.to_string()],
            )
            .await
            .map_err(query_err("leads_with_contact"))?;

        let mut leads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            leads.push(row_to_lead(&row).map_err(query_err("leads_with_contact row"))?);
        }
        Ok(leads)
    }

    async fn mark_undeliverable(&self, lead_id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE leads SET undeliverable = 1, updated_at = ?1 WHERE id = ?2",
                params![fmt_ts(&Utc::now()), lead_id.to_string()],
            )
            .await
            .map_err(query_err("mark_undeliverable"))?;
        debug!(lead_id = %lead_id, "Lead marked undeliverable");
        Ok(())
    }

    async fn update_verification(
        &self,
        lead_id: Uuid,
        email_verified: bool,
        phone_verified: bool,
        confidence: f64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE leads SET email_verified = ?1, phone_verified = ?2, verification_confidence = ?3,
                     verified_at = ?4, updated_at = ?4
                 WHERE id = ?5",
                params![
                    bool_int(email_verified),
                    bool_int(phone_verified),
                    confidence,
                    fmt_ts(&Utc::now()),
                    lead_id.to_string()
                ],
            )
            .await
            .map_err(query_err("update_verification"))?;
        Ok(())
    }

    async fn leads_pending_verification(&self, limit: u32) -> Result<Vec<Lead>, DatabaseError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads
             WHERE verified_at IS NULL AND email_verified = 0 AND phone_verified = 0
               AND opted_out = 0 AND undeliverable = 0
               AND (primary_email IS NOT NULL OR primary_phone IS NOT NULL)
             ORDER BY created_at ASC
             LIMIT ?1"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![i64::from(limit)])
            .await
            .map_err(query_err("leads_pending_verification"))?;

        let mut leads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            leads.push(row_to_lead(&row).map_err(query_err("leads_pending_verification row"))?);
        }
        Ok(leads)
    }

    // ── Opt-outs ────────────────────────────────────────────────────

    async fn is_opted_out(&self, contact: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS(SELECT 1 FROM opt_outs WHERE contact = ?1)
                     OR EXISTS(SELECT 1 FROM leads WHERE opted_out = 1
                               AND (primary_email = ?1 OR primary_phone = ?1))",
                params![contact.to_string()],
            )
            .await
            .map_err(query_err("is_opted_out"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(query_err("is_opted_out row"))? != 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_opted_out: {e}"))),
        }
    }

    async fn record_opt_out(&self, record: &OptOutRecord) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let ts = fmt_ts(&record.opted_out_at);
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO opt_outs (id, contact, contact_kind, method, source_lead_id, opted_out_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.contact.clone(),
                    record.kind.as_str(),
                    record.method.as_str(),
                    opt_text(record.source_lead_id.map(|id| id.to_string())),
                    ts.clone(),
                ],
            )
            .await
            .map_err(query_err("record_opt_out"))?;

        // Also catches leads imported after the original opt-out.
        let flagged = conn
            .execute(
                "UPDATE leads SET opted_out = 1, opted_out_at = ?1, opted_out_method = ?2, updated_at = ?1
                 WHERE opted_out = 0 AND (primary_email = ?3 OR primary_phone = ?3)",
                params![ts, record.method.as_str(), record.contact.clone()],
            )
            .await
            .map_err(query_err("record_opt_out flag leads"))?;

        debug!(inserted, flagged, "Opt-out recorded");
        Ok(inserted > 0)
    }

    async fn list_opt_outs(&self) -> Result<Vec<OptOutRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, contact, contact_kind, method, source_lead_id, opted_out_at
                 FROM opt_outs ORDER BY opted_out_at ASC",
                (),
            )
            .await
            .map_err(query_err("list_opt_outs"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parse = || -> Result<OptOutRecord, libsql::Error> {
                let id: String = row.get(0)?;
                let kind: String = row.get(2)?;
                let method: String = row.get(3)?;
                let at: String = row.get(5)?;
                Ok(OptOutRecord {
                    id: parse_uuid(&id),
                    contact: row.get(1)?,
                    kind: kind.parse().unwrap_or(ContactKind::Email),
                    method: method
                        .parse()
                        .unwrap_or(crate::compliance::opt_out::OptOutMethod::Link),
                    source_lead_id: parse_optional_uuid(row.get(4).ok()),
                    opted_out_at: parse_datetime(&at),
                })
            };
            out.push(parse().map_err(query_err("list_opt_outs row"))?);
        }
        Ok(out)
    }

    // ── Messages and unsubscribe tokens ─────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    message.id.to_string(),
                    message.lead_id.to_string(),
                    message.channel.as_str(),
                    message.subject.clone(),
                    message.html_body.clone(),
                    message.text_body.clone(),
                    message.method.as_str(),
                    message.unsubscribe_token.clone(),
                    message.unsubscribe_url.clone(),
                    message.content_hash.clone(),
                    fmt_ts(&message.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_message"))?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_message"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_message(&row).map_err(query_err("get_message row"))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn insert_unsubscribe_token(
        &self,
        token: &UnsubscribeToken,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO unsubscribe_tokens (token, contact, contact_kind, lead_id, message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    token.token.clone(),
                    token.contact.clone(),
                    token.kind.as_str(),
                    opt_text(token.lead_id.map(|id| id.to_string())),
                    opt_text(token.message_id.map(|id| id.to_string())),
                    fmt_ts(&token.created_at),
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                s if s.contains("UNIQUE") => {
                    DatabaseError::Constraint(format!("insert_unsubscribe_token: {s}"))
                }
                s => DatabaseError::Query(format!("insert_unsubscribe_token: {s}")),
            })?;
        Ok(())
    }

    async fn resolve_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<UnsubscribeToken>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT token, contact, contact_kind, lead_id, message_id, created_at
                 FROM unsubscribe_tokens WHERE token = ?1",
                params![token.to_string()],
            )
            .await
            .map_err(query_err("resolve_unsubscribe_token"))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("resolve_unsubscribe_token: {e}"))),
        };
        let parse = || -> Result<UnsubscribeToken, libsql::Error> {
            let kind: String = row.get(2)?;
            let created: String = row.get(5)?;
            Ok(UnsubscribeToken {
                token: row.get(0)?,
                contact: row.get(1)?,
                kind: kind.parse().unwrap_or(ContactKind::Email),
                lead_id: parse_optional_uuid(row.get(3).ok()),
                message_id: parse_optional_uuid(row.get(4).ok()),
                created_at: parse_datetime(&created),
            })
        };
        Ok(Some(parse().map_err(query_err("resolve_unsubscribe_token row"))?))
    }

    // ── Attempts ────────────────────────────────────────────────────

    async fn insert_attempt(&self, attempt: &OutreachAttempt) -> Result<(), DatabaseError> {
        let response = attempt
            .provider_response
            .as_ref()
            .map(to_json)
            .transpose()?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO outreach_attempts ({ATTEMPT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    attempt.id.to_string(),
                    attempt.lead_id.to_string(),
                    opt_text(attempt.campaign_id.map(|id| id.to_string())),
                    attempt.channel.as_str(),
                    opt_text(attempt.message_id.map(|id| id.to_string())),
                    opt_text(attempt.content_hash.clone()),
                    opt_text(attempt.recipient_domain.clone()),
                    attempt.status.as_str(),
                    opt_text(attempt.provider.clone()),
                    opt_text(attempt.provider_message_id.clone()),
                    opt_text(response),
                    opt_text(attempt.error.clone()),
                    bool_int(attempt.dry_run),
                    fmt_ts(&attempt.attempted_at),
                    opt_ts(attempt.completed_at),
                ],
            )
            .await
            .map_err(query_err("insert_attempt"))?;
        Ok(())
    }

    async fn complete_attempt(&self, attempt: &OutreachAttempt) -> Result<bool, DatabaseError> {
        let response = attempt
            .provider_response
            .as_ref()
            .map(to_json)
            .transpose()?;
        let changed = self
            .conn()
            .execute(
                "UPDATE outreach_attempts
                 SET status = ?1, provider = ?2, provider_message_id = ?3, provider_response = ?4,
                     error = ?5, completed_at = ?6
                 WHERE id = ?7 AND status = 'pending'",
                params![
                    attempt.status.as_str(),
                    opt_text(attempt.provider.clone()),
                    opt_text(attempt.provider_message_id.clone()),
                    opt_text(response),
                    opt_text(attempt.error.clone()),
                    opt_ts(attempt.completed_at),
                    attempt.id.to_string(),
                ],
            )
            .await
            .map_err(query_err("complete_attempt"))?;
        Ok(changed > 0)
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<OutreachAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM outreach_attempts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_attempt"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_attempt(&row).map_err(query_err("get_attempt row"))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_attempt: {e}"))),
        }
    }

    async fn find_attempt_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<OutreachAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM outreach_attempts WHERE provider_message_id = ?1
                     ORDER BY attempted_at DESC LIMIT 1"
                ),
                params![provider_message_id.to_string()],
            )
            .await
            .map_err(query_err("find_attempt_by_provider_id"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_attempt(&row).map_err(query_err("find_attempt_by_provider_id row"))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "find_attempt_by_provider_id: {e}"
            ))),
        }
    }

    async fn list_attempts_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<OutreachAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM outreach_attempts WHERE lead_id = ?1 ORDER BY attempted_at ASC"
                ),
                params![lead_id.to_string()],
            )
            .await
            .map_err(query_err("list_attempts_for_lead"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            out.push(row_to_attempt(&row).map_err(query_err("list_attempts_for_lead row"))?);
        }
        Ok(out)
    }

    async fn list_attempts_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<OutreachAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM outreach_attempts WHERE campaign_id = ?1 ORDER BY attempted_at ASC"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(query_err("list_attempts_for_campaign"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            out.push(row_to_attempt(&row).map_err(query_err("list_attempts_for_campaign row"))?);
        }
        Ok(out)
    }

    async fn attempt_times_since(
        &self,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, Option<String>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT attempted_at, recipient_domain FROM outreach_attempts
                 WHERE channel = ?1 AND attempted_at > ?2",
                params![channel.as_str(), fmt_ts(&since)],
            )
            .await
            .map_err(query_err("attempt_times_since"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let at: String = row.get(0).map_err(query_err("attempt_times_since row"))?;
            out.push((parse_datetime(&at), row.get(1).ok()));
        }
        Ok(out)
    }

    async fn insert_correction(
        &self,
        correction: &AttemptCorrection,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO attempt_corrections (id, attempt_id, event, status, payload, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    correction.id.to_string(),
                    correction.attempt_id.to_string(),
                    correction.event.clone(),
                    correction.status.as_str(),
                    to_json(&correction.payload)?,
                    fmt_ts(&correction.received_at),
                ],
            )
            .await
            .map_err(query_err("insert_correction"))?;
        Ok(())
    }

    async fn list_corrections(
        &self,
        attempt_id: Uuid,
    ) -> Result<Vec<AttemptCorrection>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, attempt_id, event, status, payload, received_at
                 FROM attempt_corrections WHERE attempt_id = ?1 ORDER BY received_at ASC",
                params![attempt_id.to_string()],
            )
            .await
            .map_err(query_err("list_corrections"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parse = || -> Result<AttemptCorrection, libsql::Error> {
                let id: String = row.get(0)?;
                let attempt: String = row.get(1)?;
                let status: String = row.get(3)?;
                let payload: String = row.get(4)?;
                let received: String = row.get(5)?;
                Ok(AttemptCorrection {
                    id: parse_uuid(&id),
                    attempt_id: parse_uuid(&attempt),
                    event: row.get(2)?,
                    status: status.parse().unwrap_or(AttemptStatus::Failed),
                    payload: serde_json::from_str(&payload).unwrap_or_default(),
                    received_at: parse_datetime(&received),
                })
            };
            out.push(parse().map_err(query_err("list_corrections row"))?);
        }
        Ok(out)
    }

    // ── Approval queue ──────────────────────────────────────────────

    async fn insert_approval_item(&self, item: &ApprovalItem) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO approval_items ({APPROVAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    item.id.to_string(),
                    item.lead_id.to_string(),
                    item.channel.as_str(),
                    to_json(&item.message)?,
                    item.status.as_str(),
                    opt_text(item.reviewer.clone()),
                    opt_ts(item.reviewed_at),
                    fmt_ts(&item.created_at),
                    fmt_ts(&item.expires_at),
                    fmt_ts(&item.updated_at),
                ],
            )
            .await
            .map_err(query_err("insert_approval_item"))?;
        Ok(())
    }

    async fn update_approval_item(&self, item: &ApprovalItem) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE approval_items SET payload = ?1, status = ?2, reviewer = ?3, reviewed_at = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    to_json(&item.message)?,
                    item.status.as_str(),
                    opt_text(item.reviewer.clone()),
                    opt_ts(item.reviewed_at),
                    fmt_ts(&item.updated_at),
                    item.id.to_string(),
                ],
            )
            .await
            .map_err(query_err("update_approval_item"))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "approval_item".into(),
                id: item.id.to_string(),
            });
        }
        debug!(item_id = %item.id, status = %item.status, "Approval item updated in DB");
        Ok(())
    }

    async fn get_approval_item(&self, id: Uuid) -> Result<Option<ApprovalItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {APPROVAL_COLUMNS} FROM approval_items WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_approval_item"))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_approval(&row).map_err(query_err("get_approval_item row")),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_approval_item: {e}"))),
        }
    }

    async fn list_approval_items(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalItem>, DatabaseError> {
        let conn = self.conn();
        let mut rows = match status {
            Some(s) => conn
                .query(
                    &format!(
                        "SELECT {APPROVAL_COLUMNS} FROM approval_items WHERE status = ?1 ORDER BY created_at ASC"
                    ),
                    params![s.as_str()],
                )
                .await,
            None => conn
                .query(
                    &format!("SELECT {APPROVAL_COLUMNS} FROM approval_items ORDER BY created_at ASC"),
                    (),
                )
                .await,
        }
        .map_err(query_err("list_approval_items"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Some(item) = row_to_approval(&row).map_err(query_err("list_approval_items row"))? {
                out.push(item);
            }
        }
        Ok(out)
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, report: &CampaignReport) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    report.campaign_id.to_string(),
                    report.channel.as_str(),
                    report.status.as_str(),
                    bool_int(report.dry_run),
                    bool_int(report.approval_mode),
                    i64::from(report.total_selected),
                    i64::from(report.total_attempted),
                    i64::from(report.total_success),
                    i64::from(report.total_failed),
                    i64::from(report.total_skipped),
                    i64::from(report.total_queued),
                    to_json(&report.errors)?,
                    opt_text(report.halt_reason.clone()),
                    fmt_ts(&report.started_at),
                    opt_ts(report.completed_at),
                    to_json(&report.skipped_by_reason)?,
                ],
            )
            .await
            .map_err(query_err("insert_campaign"))?;
        Ok(())
    }

    async fn update_campaign(&self, report: &CampaignReport) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE campaigns SET status = ?1, total_selected = ?2, total_attempted = ?3, total_success = ?4,
                     total_failed = ?5, total_skipped = ?6, total_queued = ?7, errors = ?8, halt_reason = ?9,
                     completed_at = ?10, skipped_by_reason = ?11
                 WHERE id = ?12",
                params![
                    report.status.as_str(),
                    i64::from(report.total_selected),
                    i64::from(report.total_attempted),
                    i64::from(report.total_success),
                    i64::from(report.total_failed),
                    i64::from(report.total_skipped),
                    i64::from(report.total_queued),
                    to_json(&report.errors)?,
                    opt_text(report.halt_reason.clone()),
                    opt_ts(report.completed_at),
                    to_json(&report.skipped_by_reason)?,
                    report.campaign_id.to_string(),
                ],
            )
            .await
            .map_err(query_err("update_campaign"))?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignReport>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_campaign"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_campaign(&row).map_err(query_err("get_campaign row"))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_campaign: {e}"))),
        }
    }

    async fn latest_campaign(
        &self,
        channel: Channel,
    ) -> Result<Option<CampaignReport>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE channel = ?1 ORDER BY started_at DESC LIMIT 1"
                ),
                params![channel.as_str()],
            )
            .await
            .map_err(query_err("latest_campaign"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_campaign(&row).map_err(query_err("latest_campaign row"))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("latest_campaign: {e}"))),
        }
    }

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO audit_logs ({AUDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    entry.id.to_string(),
                    entry.level.as_str(),
                    entry.component.clone(),
                    entry.action.clone(),
                    opt_text(entry.lead_id.map(|id| id.to_string())),
                    opt_text(entry.actor.clone()),
                    to_json(&entry.details)?,
                    fmt_ts(&entry.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_audit"))?;
        Ok(())
    }

    async fn list_audit(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY created_at DESC LIMIT ?1"),
                params![i64::from(limit)],
            )
            .await
            .map_err(query_err("list_audit"))?;

        let mut out = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            out.push(row_to_audit(&row).map_err(query_err("list_audit row"))?);
        }
        Ok(out)
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM audit_logs WHERE created_at < ?1",
                params![fmt_ts(&cutoff)],
            )
            .await
            .map_err(query_err("purge_audit_before"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::opt_out::OptOutMethod;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_lead(name: &str, email: &str) -> Lead {
        Lead::new(name, "Austin", "plumber").with_verified_email(email)
    }

    fn make_message(lead_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            lead_id,
            channel: Channel::Email,
            subject: "Website Solutions for Acme".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: "Hi".into(),
            method: GenerationMethod::Template,
            unsubscribe_token: Uuid::new_v4().to_string(),
            unsubscribe_url: "https://x.test/unsubscribe?token=t".into(),
            content_hash: "abc".into(),
            created_at: Utc::now(),
        }
    }

    // ── Lead tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_lead() {
        let db = test_db().await;
        let lead = make_lead("Acme Plumbing", "info@acme.test");
        db.insert_lead(&lead).await.unwrap();

        let fetched = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.business_name, "Acme Plumbing");
        assert_eq!(fetched.primary_email.as_deref(), Some("info@acme.test"));
        assert!(fetched.email_verified);
        assert!(!fetched.opted_out);
        assert_eq!(fetched.contact_count, 0);
        assert!(db.get_lead(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_lead_is_constraint_error() {
        let db = test_db().await;
        let lead = make_lead("Acme", "a@acme.test");
        db.insert_lead(&lead).await.unwrap();
        let err = db.insert_lead(&lead).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn query_eligible_filters_and_orders() {
        let db = test_db().await;
        let now = Utc::now();

        let fresh = make_lead("Fresh", "fresh@a.test");
        let mut old = make_lead("Old", "old@b.test");
        old.last_contacted_at = Some(now - chrono::Duration::days(90));
        let mut recent = make_lead("Recent", "recent@c.test");
        recent.last_contacted_at = Some(now - chrono::Duration::days(5));
        let mut opted = make_lead("Opted", "opted@d.test");
        opted.opted_out = true;
        let mut unverified = make_lead("Unverified", "u@e.test");
        unverified.email_verified = false;
        let mut dead = make_lead("Dead", "dead@f.test");
        dead.undeliverable = true;

        for l in [&old, &fresh, &recent, &opted, &unverified, &dead] {
            db.insert_lead(l).await.unwrap();
        }

        let cutoff = now - chrono::Duration::days(30);
        let eligible = db.query_eligible(Channel::Email, cutoff, 10, 0).await.unwrap();
        let names: Vec<_> = eligible.iter().map(|l| l.business_name.as_str()).collect();
        assert_eq!(names, vec!["Fresh", "Old"]);

        let first = db.query_eligible(Channel::Email, cutoff, 1, 0).await.unwrap();
        let second = db.query_eligible(Channel::Email, cutoff, 1, 1).await.unwrap();
        assert_eq!(first[0].business_name, "Fresh");
        assert_eq!(second[0].business_name, "Old");
        assert!(db.query_eligible(Channel::Email, cutoff, 1, 2).await.unwrap().is_empty());

        assert!(db.query_eligible(Channel::Call, cutoff, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_verification_excludes_checked_leads() {
        let db = test_db().await;
        let verified = make_lead("Verified", "v@a.test");
        let mut fresh = Lead::new("Fresh", "Austin", "plumber");
        fresh.primary_email = Some("fresh@b.test".into());
        let mut checked = Lead::new("Checked", "Austin", "plumber");
        checked.primary_email = Some("checked@c.test".into());
        let no_contact = Lead::new("Silent", "Austin", "plumber");
        for l in [&verified, &fresh, &checked, &no_contact] {
            db.insert_lead(l).await.unwrap();
        }
        db.update_verification(checked.id, false, false, 0.1).await.unwrap();

        let pending = db.leads_pending_verification(10).await.unwrap();
        let names: Vec<_> = pending.iter().map(|l| l.business_name.as_str()).collect();
        assert_eq!(names, vec!["Fresh"]);
    }

    #[tokio::test]
    async fn record_contact_rechecks_opt_out() {
        let db = test_db().await;
        let lead = make_lead("Acme", "a@acme.test");
        db.insert_lead(&lead).await.unwrap();

        assert!(db.record_contact(lead.id, Utc::now()).await.unwrap());
        let fetched = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.contact_count, 1);
        assert!(fetched.last_contacted_at.is_some());

        let record = OptOutRecord::new(ContactKind::Email, "a@acme.test", OptOutMethod::Link);
        db.record_opt_out(&record).await.unwrap();
        assert!(!db.record_contact(lead.id, Utc::now()).await.unwrap());
        assert_eq!(db.get_lead(lead.id).await.unwrap().unwrap().contact_count, 1);
    }

    #[tokio::test]
    async fn opted_out_flag_cannot_be_reset() {
        let db = test_db().await;
        let mut lead = make_lead("Acme", "a@acme.test");
        lead.opted_out = true;
        db.insert_lead(&lead).await.unwrap();

        let reset = db
            .conn()
            .execute(
                "UPDATE leads SET opted_out = 0 WHERE id = ?1",
                params![lead.id.to_string()],
            )
            .await;
        assert!(reset.is_err());
    }

    #[tokio::test]
    async fn opt_out_applies_to_leads_imported_later() {
        let db = test_db().await;
        let record = OptOutRecord::new(ContactKind::Email, "late@x.test", OptOutMethod::Sms);
        assert!(db.record_opt_out(&record).await.unwrap());

        let lead = make_lead("Late", "late@x.test");
        db.insert_lead(&lead).await.unwrap();
        assert!(db.is_opted_out("late@x.test").await.unwrap());

        // Re-recording still flags the new lead, but does not duplicate the record.
        assert!(!db.record_opt_out(&record).await.unwrap());
        assert!(db.get_lead(lead.id).await.unwrap().unwrap().opted_out);
        assert_eq!(db.list_opt_outs().await.unwrap().len(), 1);
    }

    // ── Attempt tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn attempt_completion_is_write_once() {
        let db = test_db().await;
        let lead = make_lead("Acme", "a@acme.test");
        let message = make_message(lead.id);
        let mut attempt = OutreachAttempt::pending(
            lead.id,
            None,
            Channel::Email,
            &message,
            Some("acme.test".into()),
            false,
        );
        db.insert_attempt(&attempt).await.unwrap();

        attempt.status = AttemptStatus::Sent;
        attempt.provider = Some("smtp".into());
        attempt.provider_message_id = Some("msg-1".into());
        attempt.provider_response = Some(serde_json::json!({"id": "msg-1"}));
        attempt.completed_at = Some(Utc::now());
        assert!(db.complete_attempt(&attempt).await.unwrap());

        attempt.status = AttemptStatus::Failed;
        assert!(!db.complete_attempt(&attempt).await.unwrap());

        let stored = db.find_attempt_by_provider_id("msg-1").await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Sent);
        assert_eq!(stored.provider_response.unwrap()["id"], "msg-1");
        assert_eq!(db.list_attempts_for_lead(lead.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attempt_times_window() {
        let db = test_db().await;
        let lead = make_lead("Acme", "a@acme.test");
        let message = make_message(lead.id);

        let recent = OutreachAttempt::pending(lead.id, None, Channel::Email, &message, Some("acme.test".into()), true);
        let mut old = OutreachAttempt::pending(lead.id, None, Channel::Email, &message, None, true);
        old.attempted_at = Utc::now() - chrono::Duration::hours(30);
        let call = OutreachAttempt::pending(lead.id, None, Channel::Call, &message, None, true);
        for a in [&recent, &old, &call] {
            db.insert_attempt(a).await.unwrap();
        }

        let since = Utc::now() - chrono::Duration::hours(24);
        let times = db.attempt_times_since(Channel::Email, since).await.unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].1.as_deref(), Some("acme.test"));
    }

    // ── Campaign tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn campaign_round_trip_and_latest() {
        let db = test_db().await;
        let mut first = CampaignReport::new(Channel::Email, true, false);
        first.started_at = Utc::now() - chrono::Duration::days(1);
        db.insert_campaign(&first).await.unwrap();

        let mut second = CampaignReport::new(Channel::Email, false, false);
        db.insert_campaign(&second).await.unwrap();
        second.record_success();
        second.record_failure("boom".into());
        second.record_skip("domain_throttled");
        second.record_skip("domain_throttled");
        second.status = CampaignPhase::Completed;
        second.completed_at = Some(Utc::now());
        db.update_campaign(&second).await.unwrap();

        let latest = db.latest_campaign(Channel::Email).await.unwrap().unwrap();
        assert_eq!(latest.campaign_id, second.campaign_id);
        assert_eq!(latest.total_attempted, 2);
        assert_eq!(latest.errors, vec!["boom".to_string()]);
        assert_eq!(latest.status, CampaignPhase::Completed);
        assert_eq!(latest.skipped_by_reason.get("domain_throttled"), Some(&2));
        assert!(db.latest_campaign(Channel::Call).await.unwrap().is_none());
    }

    // ── Approval tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn approval_item_round_trip() {
        let db = test_db().await;
        let lead_id = Uuid::new_v4();
        let mut item = ApprovalItem::new(lead_id, Channel::Email, make_message(lead_id), 7);
        db.insert_approval_item(&item).await.unwrap();

        item.status = ApprovalStatus::Rejected;
        item.reviewer = Some("dana".into());
        item.reviewed_at = Some(Utc::now());
        db.update_approval_item(&item).await.unwrap();

        let fetched = db.get_approval_item(item.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Rejected);
        assert_eq!(fetched.reviewer.as_deref(), Some("dana"));
        assert_eq!(fetched.message, item.message);

        assert!(db.list_approval_items(Some(ApprovalStatus::Pending)).await.unwrap().is_empty());
        assert_eq!(db.list_approval_items(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outreach.db");
        let lead = make_lead("Acme", "a@acme.test");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_lead(&lead).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_lead(lead.id).await.unwrap().is_some());
    }
}
