//! Opt-out registry — permanent, append-only consent withdrawals.
//!
//! Inputs arrive from several places:
//! - unsubscribe link clicks (token lookup)
//! - inbound email replies containing a removal keyword
//! - SMS replies (`STOP`)
//! - verbal requests during a call
//! - provider complaint/unsubscribe webhooks
//!
//! All of them end in `record()`, which writes one row per normalized contact
//! and flips `opted_out` on every lead sharing that contact.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit::{AuditEntry, AuditLevel, AuditLogger};
use crate::error::DatabaseError;
use crate::leads::ContactKind;
use crate::store::Database;

static OPT_OUT_KEYWORDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bunsubscribe\b",
        r"\bstop\b",
        r"\bremove me\b",
        r"\bopt[\s\-]?out\b",
        r"\bdo not (contact|email|call)\b",
        r"\bdon'?t (contact|email|call)\b",
        r"\bno more (emails|calls|messages)\b",
        r"\btake me off\b",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("opt-out keyword pattern"))
    .collect()
});

/// How the contact withdrew consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutMethod {
    Link,
    ReplyKeyword,
    CallRequest,
    Sms,
    /// Unsubscribe event forwarded by the email provider.
    Webhook,
    /// Spam complaint reported by the email provider.
    Complaint,
}

impl OptOutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::ReplyKeyword => "reply_keyword",
            Self::CallRequest => "call_request",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
            Self::Complaint => "complaint",
        }
    }
}

impl std::fmt::Display for OptOutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OptOutMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(Self::Link),
            "reply_keyword" => Ok(Self::ReplyKeyword),
            "call_request" => Ok(Self::CallRequest),
            "sms" => Ok(Self::Sms),
            "webhook" => Ok(Self::Webhook),
            "complaint" => Ok(Self::Complaint),
            _ => Err(format!("Unknown opt-out method: {}", s)),
        }
    }
}

/// Permanent record of a contact's withdrawal. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptOutRecord {
    pub id: Uuid,
    /// Normalized email or phone.
    pub contact: String,
    pub kind: ContactKind,
    pub method: OptOutMethod,
    pub source_lead_id: Option<Uuid>,
    pub opted_out_at: DateTime<Utc>,
}

impl OptOutRecord {
    pub fn new(kind: ContactKind, raw_contact: &str, method: OptOutMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact: kind.normalize(raw_contact),
            kind,
            method,
            source_lead_id: None,
            opted_out_at: Utc::now(),
        }
    }
}

/// Whether free text asks to stop contact.
pub fn contains_opt_out_keyword(text: &str) -> bool {
    OPT_OUT_KEYWORDS.iter().any(|re| re.is_match(text))
}

/// Drop quoted lines (`> ...`) and everything after an "On ... wrote:" marker.
fn strip_quoted(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("On ") && trimmed.trim_end().ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

/// Front door for every opt-out signal.
pub struct OptOutRegistry {
    db: Arc<dyn Database>,
    audit: Arc<AuditLogger>,
}

impl OptOutRegistry {
    pub fn new(db: Arc<dyn Database>, audit: Arc<AuditLogger>) -> Arc<Self> {
        Arc::new(Self { db, audit })
    }

    /// Record an opt-out. Returns `false` if the contact had already opted out.
    pub async fn record(
        &self,
        kind: ContactKind,
        raw_contact: &str,
        method: OptOutMethod,
        source_lead_id: Option<Uuid>,
    ) -> Result<bool, DatabaseError> {
        let mut record = OptOutRecord::new(kind, raw_contact, method);
        record.source_lead_id = source_lead_id;
        if record.contact.is_empty() {
            return Ok(false);
        }

        let inserted = self.db.record_opt_out(&record).await?;
        if inserted {
            info!(kind = kind.as_str(), method = %method, "Contact opted out");
            let mut entry = AuditEntry::new(AuditLevel::Info, "opt_out", "opt_out_recorded")
                .details(serde_json::json!({
                    "contact": record.contact,
                    "method": method.as_str(),
                }));
            if let Some(id) = source_lead_id {
                entry = entry.lead(id);
            }
            self.audit.record(entry).await;
        } else {
            debug!(method = %method, "Contact already opted out");
        }
        Ok(inserted)
    }

    /// Authoritative check. A storage error counts as opted out.
    pub async fn is_opted_out(&self, kind: ContactKind, raw_contact: &str) -> bool {
        let contact = kind.normalize(raw_contact);
        match self.db.is_opted_out(&contact).await {
            Ok(opted) => opted,
            Err(e) => {
                warn!(error = %e, "Opt-out lookup failed, treating contact as opted out");
                true
            }
        }
    }

    /// Resolve an unsubscribe-link token. Returns the contact if the token was known.
    pub async fn handle_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let Some(entry) = self.db.resolve_unsubscribe_token(token).await? else {
            warn!("Unknown unsubscribe token");
            return Ok(None);
        };
        self.record(entry.kind, &entry.contact, OptOutMethod::Link, entry.lead_id)
            .await?;
        Ok(Some(entry.contact))
    }

    /// Inspect a raw RFC 822 reply. Returns the sender if it was an opt-out.
    pub async fn handle_reply(&self, raw: &[u8]) -> Result<Option<String>, DatabaseError> {
        let Some(parsed) = MessageParser::default().parse(raw) else {
            warn!("Could not parse inbound reply");
            return Ok(None);
        };
        let Some(sender) = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
        else {
            return Ok(None);
        };

        let subject = parsed.subject().unwrap_or_default();
        let body = parsed
            .body_text(0)
            .map(|t| strip_quoted(&t))
            .unwrap_or_default();

        if !contains_opt_out_keyword(subject) && !contains_opt_out_keyword(&body) {
            return Ok(None);
        }
        self.record(ContactKind::Email, &sender, OptOutMethod::ReplyKeyword, None)
            .await?;
        Ok(Some(sender))
    }

    /// Inbound SMS. `STOP` (or any keyword) opts the number out.
    pub async fn handle_sms(&self, phone: &str, text: &str) -> Result<bool, DatabaseError> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("stop") || contains_opt_out_keyword(trimmed) {
            self.record(ContactKind::Phone, phone, OptOutMethod::Sms, None)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Verbal removal request captured during a call.
    pub async fn handle_call_request(
        &self,
        phone: &str,
        lead_id: Option<Uuid>,
    ) -> Result<bool, DatabaseError> {
        self.record(ContactKind::Phone, phone, OptOutMethod::CallRequest, lead_id)
            .await
    }
}
