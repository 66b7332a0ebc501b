//! Outreach attempt records and their out-of-band corrections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::Message;
use crate::leads::Channel;

/// Outcome of one delivery try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Recorded before the transport call; replaced once the call returns.
    Pending,
    Sent,
    Delivered,
    Bounced,
    Failed,
    /// Never reached the transport (send-time guard, halt).
    Skipped,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Bounced => "bounced",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "bounced" => Ok(Self::Bounced),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown attempt status: {}", s)),
        }
    }
}

/// One record per (lead, campaign, channel) delivery try.
///
/// Completed attempts are immutable. Webhook events append an
/// `AttemptCorrection` instead of rewriting `provider_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachAttempt {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub channel: Channel,
    pub message_id: Option<Uuid>,
    /// SHA-256 of the final message content.
    pub content_hash: Option<String>,
    /// Lowercased recipient email domain, for the per-domain window.
    pub recipient_domain: Option<String>,
    pub status: AttemptStatus,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    /// Provider response at send time.
    pub provider_response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub dry_run: bool,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OutreachAttempt {
    /// Pre-send record for `message`.
    pub fn pending(
        lead_id: Uuid,
        campaign_id: Option<Uuid>,
        channel: Channel,
        message: &Message,
        recipient_domain: Option<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            campaign_id,
            channel,
            message_id: Some(message.id),
            content_hash: Some(message.content_hash.clone()),
            recipient_domain,
            status: AttemptStatus::Pending,
            provider: None,
            provider_message_id: None,
            provider_response: None,
            error: None,
            dry_run,
            attempted_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark a pending attempt as not sent.
    pub fn skip(mut self, reason: &str) -> Self {
        self.status = AttemptStatus::Skipped;
        self.error = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Out-of-band status change reported by a provider webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptCorrection {
    pub id: Uuid,
    pub attempt_id: Uuid,
    /// Raw event type as reported (`bounce`, `spamreport`, ...).
    pub event: String,
    pub status: AttemptStatus,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
