//! Keyless verifiers: syntax and provider heuristics only.
//!
//! Used when no verification API is configured, and as the fallback when a
//! configured one fails. Scores stay below the default thresholds.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use super::{EmailVerification, EmailVerifier, PhoneVerification, PhoneVerifier};
use crate::error::ProviderError;
use crate::leads::{email_domain, normalize_email, normalize_phone};

static EMAIL_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("email syntax pattern")
});

pub const PERSONAL_PROVIDERS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "aol.com",
    "icloud.com",
    "mail.com",
    "protonmail.com",
    "yandex.com",
    "zoho.com",
];

/// Local parts that read as a business mailbox even on a personal provider.
pub const BUSINESS_ROLES: &[&str] = &[
    "info", "contact", "sales", "support", "admin", "hello", "team", "office", "enquiry",
    "inquiry",
];

pub fn is_role_address(email: &str) -> bool {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();
    BUSINESS_ROLES.iter().any(|role| local.contains(role))
}

/// Business domain, or a role mailbox on a personal provider.
pub fn is_business_address(email: &str) -> bool {
    let personal = email_domain(email).is_some_and(|d| PERSONAL_PROVIDERS.contains(&d.as_str()));
    !personal || is_role_address(email)
}

pub struct SyntaxEmailVerifier;

#[async_trait]
impl EmailVerifier for SyntaxEmailVerifier {
    fn name(&self) -> &str {
        "syntax"
    }

    async fn verify(&self, email: &str) -> Result<EmailVerification, ProviderError> {
        let email = normalize_email(email);
        let valid = EMAIL_SYNTAX.is_match(&email);
        let business = is_business_address(&email);
        let confidence = match (valid, business) {
            (false, _) => 0.0,
            (true, true) => 0.5,
            (true, false) => 0.3,
        };
        Ok(EmailVerification {
            email,
            deliverable: valid,
            business,
            confidence,
            provider: self.name().to_string(),
            provider_response: serde_json::json!({ "method": "basic_validation" }),
            verified_at: Utc::now(),
        })
    }
}

/// E.164 shape check on the normalized number.
pub struct BasicPhoneVerifier;

#[async_trait]
impl PhoneVerifier for BasicPhoneVerifier {
    fn name(&self) -> &str {
        "basic_phone"
    }

    async fn verify(&self, phone: &str) -> Result<PhoneVerification, ProviderError> {
        let phone = normalize_phone(phone);
        let digits = phone.trim_start_matches('+');
        let valid = phone.starts_with('+') && (8..=15).contains(&digits.len());
        Ok(PhoneVerification {
            phone,
            valid,
            carrier_type: "unknown".to_string(),
            business_line: false,
            confidence: if valid { 0.5 } else { 0.0 },
            provider: self.name().to_string(),
            provider_response: serde_json::json!({ "method": "basic_validation" }),
            verified_at: Utc::now(),
        })
    }
}
