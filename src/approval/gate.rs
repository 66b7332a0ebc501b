//! Approval gate — in-memory review queue with write-through persistence and
//! broadcast to subscribers.
//!
//! Deciding never sends. An approved item waits for an explicit send step,
//! which calls `mark_sent` once delivery succeeded.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{ApprovalEvent, ApprovalItem, ApprovalStats, ApprovalStatus, Decision};
use crate::compliance::{AuditEntry, AuditLevel, AuditLogger};
use crate::config::ComplianceConfig;
use crate::content::{Message, compliance};
use crate::error::{ApprovalError, DatabaseError};
use crate::leads::Channel;
use crate::store::Database;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

pub struct ApprovalGate {
    items: RwLock<VecDeque<ApprovalItem>>,
    tx: broadcast::Sender<ApprovalEvent>,
    db: Arc<dyn Database>,
    audit: Arc<AuditLogger>,
    compliance: ComplianceConfig,
    expiry_days: u32,
}

impl ApprovalGate {
    pub fn new(
        db: Arc<dyn Database>,
        audit: Arc<AuditLogger>,
        compliance: ComplianceConfig,
        expiry_days: u32,
    ) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            items: RwLock::new(VecDeque::new()),
            tx,
            db,
            audit,
            compliance,
            expiry_days,
        })
    }

    /// Reload persisted items. Call once on startup.
    pub async fn load(&self) -> Result<usize, DatabaseError> {
        let stored = self.db.list_approval_items(None).await?;
        let count = stored.len();
        *self.items.write().await = stored.into();
        info!(count, "Approval queue loaded");
        Ok(count)
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.tx.subscribe()
    }

    /// Queue events as a `Stream`, for consumers that compose streams.
    pub fn events(&self) -> BroadcastStream<ApprovalEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Queue a message for review.
    pub async fn enqueue(
        &self,
        lead_id: Uuid,
        channel: Channel,
        message: Message,
    ) -> Result<Uuid, ApprovalError> {
        let item = ApprovalItem::new(lead_id, channel, message, self.expiry_days);
        let id = item.id;
        self.db.insert_approval_item(&item).await?;
        self.items.write().await.push_back(item);

        info!(item_id = %id, lead_id = %lead_id, channel = %channel, "Message queued for approval");
        self.audit
            .record(
                AuditEntry::new(AuditLevel::Info, "approval", "queued")
                    .lead(lead_id)
                    .details(serde_json::json!({ "item_id": id, "channel": channel.as_str() })),
            )
            .await;

        // Ok if no receivers are listening yet
        let _ = self.tx.send(ApprovalEvent::Queued { id, lead_id });
        Ok(id)
    }

    /// Approve or reject a pending item.
    pub async fn decide(
        &self,
        id: Uuid,
        decision: Decision,
        reviewer: &str,
    ) -> Result<ApprovalItem, ApprovalError> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(ApprovalError::NotFound(id))?;

        if item.is_expired_at(now) {
            let mut expired = item.clone();
            expired.status = ApprovalStatus::Expired;
            expired.updated_at = now;
            self.db.update_approval_item(&expired).await?;
            *item = expired;
            let _ = self.tx.send(ApprovalEvent::Updated {
                id,
                status: ApprovalStatus::Expired,
            });
            warn!(item_id = %id, "Cannot decide expired approval item");
            return Err(ApprovalError::Expired(id));
        }
        if item.status != ApprovalStatus::Pending {
            return Err(ApprovalError::NotActionable {
                id,
                status: item.status.to_string(),
            });
        }

        let mut updated = item.clone();
        updated.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        updated.reviewer = Some(reviewer.to_string());
        updated.reviewed_at = Some(now);
        updated.updated_at = now;
        self.db.update_approval_item(&updated).await?;
        *item = updated.clone();
        drop(items);

        info!(item_id = %id, reviewer, status = %updated.status, "Approval item decided");
        self.audit
            .record(
                AuditEntry::new(AuditLevel::Info, "approval", updated.status.as_str())
                    .lead(updated.lead_id)
                    .actor(reviewer)
                    .details(serde_json::json!({ "item_id": id })),
            )
            .await;
        let _ = self.tx.send(ApprovalEvent::Updated {
            id,
            status: updated.status,
        });
        Ok(updated)
    }

    /// Replace subject and body of a pending item. The compliance block is
    /// re-applied with the item's original unsubscribe link.
    pub async fn edit(
        &self,
        id: Uuid,
        subject: &str,
        body: &str,
    ) -> Result<ApprovalItem, ApprovalError> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(ApprovalError::NotFound(id))?;

        match item.status_at(now) {
            ApprovalStatus::Pending => {}
            ApprovalStatus::Expired => return Err(ApprovalError::Expired(id)),
            other => {
                return Err(ApprovalError::NotActionable {
                    id,
                    status: other.to_string(),
                });
            }
        }

        let mut updated = item.clone();
        updated.message = compliance::restamp(&item.message, subject, body, &self.compliance);
        updated.updated_at = now;
        self.db.update_approval_item(&updated).await?;
        *item = updated.clone();

        debug!(item_id = %id, "Approval item edited");
        let _ = self.tx.send(ApprovalEvent::Updated {
            id,
            status: updated.status,
        });
        Ok(updated)
    }

    /// Record that an approved item was delivered.
    pub async fn mark_sent(&self, id: Uuid) -> Result<ApprovalItem, ApprovalError> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(ApprovalError::NotFound(id))?;
        if item.status != ApprovalStatus::Approved {
            return Err(ApprovalError::NotActionable {
                id,
                status: item.status.to_string(),
            });
        }

        let mut updated = item.clone();
        updated.status = ApprovalStatus::Sent;
        updated.updated_at = Utc::now();
        self.db.update_approval_item(&updated).await?;
        *item = updated.clone();

        info!(item_id = %id, "Approved item sent");
        let _ = self.tx.send(ApprovalEvent::Updated {
            id,
            status: ApprovalStatus::Sent,
        });
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Option<ApprovalItem> {
        self.items.read().await.iter().find(|i| i.id == id).cloned()
    }

    /// Pending items that have not expired.
    pub async fn pending(&self) -> Vec<ApprovalItem> {
        self.with_status(ApprovalStatus::Pending).await
    }

    /// Approved items waiting for the send step.
    pub async fn approved(&self) -> Vec<ApprovalItem> {
        self.with_status(ApprovalStatus::Approved).await
    }

    async fn with_status(&self, status: ApprovalStatus) -> Vec<ApprovalItem> {
        let now = Utc::now();
        self.items
            .read()
            .await
            .iter()
            .filter(|i| i.status_at(now) == status)
            .cloned()
            .collect()
    }

    /// Whether the lead already has an item awaiting review or sending.
    pub async fn has_active_for_lead(&self, lead_id: Uuid) -> bool {
        let now = Utc::now();
        self.items
            .read()
            .await
            .iter()
            .any(|i| i.lead_id == lead_id && i.is_active_at(now))
    }

    /// Counts by effective status, with expiry applied.
    pub async fn stats(&self) -> ApprovalStats {
        let now = Utc::now();
        let mut stats = ApprovalStats::default();
        for item in self.items.read().await.iter() {
            match item.status_at(now) {
                ApprovalStatus::Pending => stats.pending += 1,
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
                ApprovalStatus::Sent => stats.sent += 1,
                ApprovalStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    /// Persist the `expired` status of lapsed items. Optional housekeeping;
    /// reads already treat them as expired.
    pub async fn expire_stale(&self) -> Result<usize, DatabaseError> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let mut expired = 0;
        for item in items.iter_mut().filter(|i| i.is_expired_at(now)) {
            let mut updated = item.clone();
            updated.status = ApprovalStatus::Expired;
            updated.updated_at = now;
            self.db.update_approval_item(&updated).await?;
            *item = updated;
            expired += 1;
            let _ = self.tx.send(ApprovalEvent::Updated {
                id: item.id,
                status: ApprovalStatus::Expired,
            });
        }
        if expired > 0 {
            info!(count = expired, "Expired approval items");
        }
        Ok(expired)
    }
}
