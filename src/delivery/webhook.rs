//! Provider webhook events — bounces, complaints, unsubscribes, deliveries.
//!
//! Completed attempts are never rewritten; each event that names a known
//! provider message id appends an `AttemptCorrection`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::campaign::attempt::{AttemptCorrection, AttemptStatus};
use crate::compliance::audit::{AuditEntry, AuditLevel, AuditLogger};
use crate::compliance::opt_out::{OptOutMethod, OptOutRegistry};
use crate::error::DatabaseError;
use crate::leads::{ContactKind, normalize_email};
use crate::store::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Bounce,
    Complaint,
    Unsubscribe,
    Delivered,
}

impl WebhookEventKind {
    /// Accepts the aliases different providers use.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "bounce" | "bounced" | "dropped" => Some(Self::Bounce),
            "complaint" | "spamreport" => Some(Self::Complaint),
            "unsubscribe" | "unsubscribed" => Some(Self::Unsubscribe),
            "delivered" | "delivery" => Some(Self::Delivered),
            _ => None,
        }
    }

    fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Bounce => AttemptStatus::Bounced,
            Self::Delivered => AttemptStatus::Delivered,
            // Complaints and unsubscribes imply the message arrived.
            Self::Complaint | Self::Unsubscribe => AttemptStatus::Delivered,
        }
    }
}

/// One normalized webhook event.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Raw event name as reported.
    pub event: String,
    pub kind: Option<WebhookEventKind>,
    pub email: String,
    pub provider_message_id: Option<String>,
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    /// Read `event`/`type`, `email`/`recipient`, `message_id`/`sg_message_id`.
    /// `None` if the event names no recipient.
    pub fn from_json(payload: serde_json::Value) -> Option<Self> {
        let field = |a: &str, b: &str| {
            payload
                .get(a)
                .or_else(|| payload.get(b))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let event = field("event", "type").unwrap_or_else(|| "unknown".to_string());
        let email = field("email", "recipient")?;
        let provider_message_id = field("message_id", "sg_message_id");
        Some(Self {
            kind: WebhookEventKind::parse(&event),
            event,
            email,
            provider_message_id,
            payload,
        })
    }
}

/// Applies webhook events to the store.
pub struct WebhookProcessor {
    db: Arc<dyn Database>,
    opt_outs: Arc<OptOutRegistry>,
    audit: Arc<AuditLogger>,
}

impl WebhookProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        opt_outs: Arc<OptOutRegistry>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self { db, opt_outs, audit }
    }

    pub async fn handle(&self, event: &WebhookEvent) -> Result<(), DatabaseError> {
        let Some(kind) = event.kind else {
            info!(event = %event.event, "Unhandled webhook event type");
            return Ok(());
        };
        info!(event = %event.event, "Processing webhook event");

        let lead_id = self.append_correction(event, kind).await?;

        match kind {
            WebhookEventKind::Bounce => {
                let contact = normalize_email(&event.email);
                for lead in self.db.leads_with_contact(&contact).await? {
                    self.db.mark_undeliverable(lead.id).await?;
                    warn!(lead_id = %lead.id, "Lead marked undeliverable after bounce");
                }
            }
            WebhookEventKind::Complaint => {
                self.opt_outs
                    .record(ContactKind::Email, &event.email, OptOutMethod::Complaint, lead_id)
                    .await?;
            }
            WebhookEventKind::Unsubscribe => {
                self.opt_outs
                    .record(ContactKind::Email, &event.email, OptOutMethod::Webhook, lead_id)
                    .await?;
            }
            WebhookEventKind::Delivered => {}
        }

        let mut entry = AuditEntry::new(AuditLevel::Info, "email_webhook", &event.event)
            .details(serde_json::json!({
                "email": event.email,
                "message_id": event.provider_message_id,
            }));
        if let Some(id) = lead_id {
            entry = entry.lead(id);
        }
        self.audit.record(entry).await;
        Ok(())
    }

    /// Returns the lead of the matched attempt, if any.
    async fn append_correction(
        &self,
        event: &WebhookEvent,
        kind: WebhookEventKind,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let Some(pid) = event.provider_message_id.as_deref() else {
            return Ok(None);
        };
        let Some(attempt) = self.db.find_attempt_by_provider_id(pid).await? else {
            warn!(provider_message_id = pid, "Webhook for unknown message");
            return Ok(None);
        };

        let correction = AttemptCorrection {
            id: Uuid::new_v4(),
            attempt_id: attempt.id,
            event: event.event.clone(),
            status: kind.attempt_status(),
            payload: event.payload.clone(),
            received_at: Utc::now(),
        };
        self.db.insert_correction(&correction).await?;
        Ok(Some(attempt.lead_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::attempt::OutreachAttempt;
    use crate::content::{GenerationMethod, Message};
    use crate::leads::{Channel, Lead};
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn Database>, WebhookProcessor, Arc<OptOutRegistry>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let audit = AuditLogger::new(db.clone());
        let opt_outs = OptOutRegistry::new(db.clone(), audit.clone());
        let processor = WebhookProcessor::new(db.clone(), opt_outs.clone(), audit);
        (db, processor, opt_outs)
    }

    async fn sent_attempt(db: &Arc<dyn Database>, lead: &Lead) -> OutreachAttempt {
        let message = Message {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            channel: Channel::Email,
            subject: "Hi".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: "Hi".into(),
            method: GenerationMethod::Template,
            unsubscribe_token: "t".into(),
            unsubscribe_url: "https://u.test/?token=t".into(),
            content_hash: "h".into(),
            created_at: Utc::now(),
        };
        db.insert_message(&message).await.unwrap();
        let mut attempt = OutreachAttempt::pending(lead.id, None, Channel::Email, &message, None, false);
        db.insert_attempt(&attempt).await.unwrap();
        attempt.status = AttemptStatus::Sent;
        attempt.provider = Some("sendgrid".into());
        attempt.provider_message_id = Some("sg-42".into());
        attempt.completed_at = Some(Utc::now());
        db.complete_attempt(&attempt).await.unwrap();
        attempt
    }

    #[test]
    fn parses_provider_aliases() {
        let event = WebhookEvent::from_json(serde_json::json!({
            "type": "spamreport",
            "recipient": "a@b.test",
            "sg_message_id": "sg-1",
        }))
        .unwrap();
        assert_eq!(event.kind, Some(WebhookEventKind::Complaint));
        assert_eq!(event.provider_message_id.as_deref(), Some("sg-1"));

        assert_eq!(WebhookEventKind::parse("dropped"), Some(WebhookEventKind::Bounce));
        assert_eq!(WebhookEventKind::parse("open"), None);
        assert!(WebhookEvent::from_json(serde_json::json!({ "event": "bounce" })).is_none());
    }

    #[tokio::test]
    async fn bounce_marks_lead_and_appends_correction() {
        let (db, processor, _) = setup().await;
        let lead = Lead::new("Rosa's", "Portland", "bakery").with_verified_email("owner@rosas.test");
        db.insert_lead(&lead).await.unwrap();
        let attempt = sent_attempt(&db, &lead).await;

        let event = WebhookEvent::from_json(serde_json::json!({
            "event": "bounce",
            "email": "Owner@Rosas.test",
            "message_id": "sg-42",
        }))
        .unwrap();
        processor.handle(&event).await.unwrap();

        assert!(db.get_lead(lead.id).await.unwrap().unwrap().undeliverable);
        let corrections = db.list_corrections(attempt.id).await.unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].status, AttemptStatus::Bounced);

        // The original attempt row is untouched.
        let stored = db.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Sent);
    }

    #[tokio::test]
    async fn complaint_records_opt_out() {
        let (db, processor, opt_outs) = setup().await;
        let lead = Lead::new("Rosa's", "Portland", "bakery").with_verified_email("owner@rosas.test");
        db.insert_lead(&lead).await.unwrap();

        let event = WebhookEvent::from_json(serde_json::json!({
            "event": "complaint",
            "email": "owner@rosas.test",
        }))
        .unwrap();
        processor.handle(&event).await.unwrap();

        assert!(opt_outs.is_opted_out(ContactKind::Email, "owner@rosas.test").await);
        let records = db.list_opt_outs().await.unwrap();
        assert_eq!(records[0].method, OptOutMethod::Complaint);
        assert!(db.get_lead(lead.id).await.unwrap().unwrap().opted_out);
    }
}
