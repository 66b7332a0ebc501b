//! Outreach message and unsubscribe token types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::leads::{Channel, ContactKind};

/// Which path produced the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    Ai,
    Template,
}

impl GenerationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Template => "template",
        }
    }
}

impl std::str::FromStr for GenerationMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Self::Ai),
            "template" => Ok(Self::Template),
            _ => Err(format!("Unknown generation method: {}", s)),
        }
    }
}

/// Final, compliance-stamped outreach content for one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub subject: String,
    pub html_body: String,
    /// Plain-text body. Doubles as the call script on the call channel.
    pub text_body: String,
    pub method: GenerationMethod,
    /// Fresh per message, never reused.
    pub unsubscribe_token: String,
    pub unsubscribe_url: String,
    /// SHA-256 over subject, html, and text.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 hex digest of the message content.
pub fn content_fingerprint(subject: &str, html: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(html.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Maps an unsubscribe token back to the contact it was issued for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeToken {
    pub token: String,
    /// Normalized contact value.
    pub contact: String,
    pub kind: ContactKind,
    pub lead_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_field_sensitive() {
        let a = content_fingerprint("Hi", "<p>x</p>", "x");
        assert_eq!(a, content_fingerprint("Hi", "<p>x</p>", "x"));
        assert_eq!(a.len(), 64);
        // Moving text across the field boundary changes the digest.
        assert_ne!(a, content_fingerprint("Hi<p>x", "</p>", "x"));
    }
}
