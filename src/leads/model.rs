//! Lead data model — business identity, contact channels, and consent state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compliance::opt_out::OptOutMethod;

/// Outreach channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Call,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Call => "call",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "call" => Ok(Self::Call),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Kind of contact identifier an opt-out applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Email,
    Phone,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }

    /// Normalize a raw contact value of this kind.
    pub fn normalize(&self, raw: &str) -> String {
        match self {
            Self::Email => normalize_email(raw),
            Self::Phone => normalize_phone(raw),
        }
    }
}

impl std::str::FromStr for ContactKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            _ => Err(format!("Unknown contact kind: {}", s)),
        }
    }
}

impl From<Channel> for ContactKind {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Email => Self::Email,
            Channel::Call => Self::Phone,
        }
    }
}

/// A publicly listed business that may be contacted.
///
/// `opted_out` and `undeliverable` only ever move from `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Where the lead was discovered (directory name, import batch).
    pub source: String,
    pub business_name: String,
    pub city: String,
    pub category: String,
    pub website: Option<String>,
    pub primary_email: Option<String>,
    pub primary_phone: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    /// Verification confidence in [0, 1].
    pub verification_confidence: f64,
    pub opted_out: bool,
    pub opted_out_at: Option<DateTime<Utc>>,
    pub opted_out_method: Option<OptOutMethod>,
    /// Set after a permanent delivery failure or hard bounce.
    pub undeliverable: bool,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub contact_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(
        business_name: impl Into<String>,
        city: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: "manual".into(),
            business_name: business_name.into(),
            city: city.into(),
            category: category.into(),
            website: None,
            primary_email: None,
            primary_phone: None,
            email_verified: false,
            phone_verified: false,
            verification_confidence: 0.0,
            opted_out: false,
            opted_out_at: None,
            opted_out_method: None,
            undeliverable: false,
            last_contacted_at: None,
            contact_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Attach a verified email address.
    pub fn with_verified_email(mut self, email: &str) -> Self {
        self.primary_email = Some(normalize_email(email));
        self.email_verified = true;
        self.verification_confidence = self.verification_confidence.max(0.9);
        self
    }

    /// Attach a verified phone number.
    pub fn with_verified_phone(mut self, phone: &str) -> Self {
        self.primary_phone = Some(normalize_phone(phone));
        self.phone_verified = true;
        self.verification_confidence = self.verification_confidence.max(0.9);
        self
    }

    /// The contact value used for `channel`, if present.
    pub fn contact_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.primary_email.as_deref(),
            Channel::Call => self.primary_phone.as_deref(),
        }
    }

    /// Whether the contact for `channel` is present and verified.
    pub fn is_reachable_on(&self, channel: Channel) -> bool {
        let verified = match channel {
            Channel::Email => self.email_verified,
            Channel::Call => self.phone_verified,
        };
        verified
            && self
                .contact_for(channel)
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Domain of the primary email, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        self.primary_email.as_deref().and_then(email_domain)
    }
}

/// Canonical form of an email address: trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Canonical form of a phone number: a leading `+` (if any) followed by digits.
///
/// Ten-digit numbers are assumed to be North American and get `+1`.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else if digits.len() == 10 {
        format!("+1{digits}")
    } else if digits.len() == 11 && digits.starts_with('1') {
        format!("+{digits}")
    } else {
        digits
    }
}

/// Domain part of an email address, lowercased. `None` if there is no `@`.
pub fn email_domain(address: &str) -> Option<String> {
    let (_, domain) = address.trim().rsplit_once('@')?;
    if domain.is_empty() {
        return None;
    }
    Some(domain.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_str() {
        assert_eq!("email".parse::<Channel>().unwrap(), Channel::Email);
        assert_eq!(Channel::Call.to_string(), "call");
        assert!("sms".parse::<Channel>().is_err());
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Owner@Example.COM "), "owner@example.com");
        assert_eq!(email_domain("a@Shop.Example"), Some("shop.example".into()));
        assert_eq!(email_domain("no-at-sign"), None);
        assert_eq!(email_domain("trailing@"), None);
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("(415) 555-0100"), "+14155550100");
        assert_eq!(normalize_phone("+44 20 7946 0958"), "+442079460958");
        assert_eq!(normalize_phone("1-415-555-0100"), "+14155550100");
    }

    #[test]
    fn reachability_requires_verified_contact() {
        let lead = Lead::new("Acme Plumbing", "Austin", "plumber");
        assert!(!lead.is_reachable_on(Channel::Email));

        let mut lead = lead.with_verified_email("info@acme.test");
        assert!(lead.is_reachable_on(Channel::Email));
        assert!(!lead.is_reachable_on(Channel::Call));

        lead.email_verified = false;
        assert!(!lead.is_reachable_on(Channel::Email));
    }
}
