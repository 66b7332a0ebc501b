//! Approval queue data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::Message;
use crate::leads::Channel;

/// Status of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a reviewer.
    Pending,
    /// Approved; waiting for the explicit send step.
    Approved,
    /// Rejected; kept for audit only.
    Rejected,
    /// Delivered by the send step.
    Sent,
    /// Not decided within the expiry window.
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Sent => "sent",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "sent" => Ok(Self::Sent),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

/// Reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// A generated message awaiting human sign-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub message: Message,
    pub status: ApprovalStatus,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalItem {
    pub fn new(lead_id: Uuid, channel: Channel, message: Message, expiry_days: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lead_id,
            channel,
            message,
            status: ApprovalStatus::Pending,
            reviewer: None,
            reviewed_at: None,
            created_at: now,
            expires_at: now + chrono::Duration::days(i64::from(expiry_days)),
            updated_at: now,
        }
    }

    /// Pending past its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }

    /// Status as seen at `now`, with expiry applied passively.
    pub fn status_at(&self, now: DateTime<Utc>) -> ApprovalStatus {
        if self.is_expired_at(now) {
            ApprovalStatus::Expired
        } else {
            self.status
        }
    }

    /// Still blocks the lead from being queued again.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status_at(now),
            ApprovalStatus::Pending | ApprovalStatus::Approved
        )
    }
}

/// Queue events for UI subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalEvent {
    Queued { id: Uuid, lead_id: Uuid },
    Updated { id: Uuid, status: ApprovalStatus },
}

/// Counts by effective status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalStats {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub sent: usize,
    pub expired: usize,
}
