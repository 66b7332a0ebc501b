//! Contact verification — email and phone checks behind the breaker.
//!
//! `VerificationService` runs the configured verifier through the breaker
//! registry, falls back to the keyless checks when it fails, applies the
//! confidence thresholds, and writes the verdict onto the lead.

pub mod abstract_api;
pub mod basic;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compliance::audit::{mask_email, mask_phone};
use crate::config::VerificationConfig;
use crate::error::{DatabaseError, ProviderError};
use crate::leads::Lead;
use crate::resilience::BreakerRegistry;
use crate::store::Database;

pub use abstract_api::AbstractApiEmailVerifier;
pub use basic::{BasicPhoneVerifier, SyntaxEmailVerifier};

/// Cached results are reused for this long.
const CACHE_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct EmailVerification {
    pub email: String,
    pub deliverable: bool,
    /// Business domain, or a role address on a personal provider.
    pub business: bool,
    pub confidence: f64,
    pub provider: String,
    pub provider_response: serde_json::Value,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneVerification {
    pub phone: String,
    pub valid: bool,
    /// `mobile`, `landline`, `voip`, or `unknown`.
    pub carrier_type: String,
    pub business_line: bool,
    pub confidence: f64,
    pub provider: String,
    pub provider_response: serde_json::Value,
    pub verified_at: DateTime<Utc>,
}

#[async_trait]
pub trait EmailVerifier: Send + Sync {
    fn name(&self) -> &str;
    async fn verify(&self, email: &str) -> Result<EmailVerification, ProviderError>;
}

#[async_trait]
pub trait PhoneVerifier: Send + Sync {
    fn name(&self) -> &str;
    async fn verify(&self, phone: &str) -> Result<PhoneVerification, ProviderError>;
}

/// Verdict written back to the lead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadVerification {
    pub email_verified: bool,
    pub phone_verified: bool,
    pub confidence: f64,
}

pub struct VerificationService {
    db: Arc<dyn Database>,
    breakers: Arc<BreakerRegistry>,
    config: VerificationConfig,
    email: Arc<dyn EmailVerifier>,
    phone: Arc<dyn PhoneVerifier>,
    email_cache: Mutex<HashMap<String, EmailVerification>>,
}

impl VerificationService {
    /// Keyless verifiers only.
    pub fn new(
        db: Arc<dyn Database>,
        breakers: Arc<BreakerRegistry>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            db,
            breakers,
            config,
            email: Arc::new(SyntaxEmailVerifier),
            phone: Arc::new(BasicPhoneVerifier),
            email_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_email_verifier(mut self, verifier: Arc<dyn EmailVerifier>) -> Self {
        self.email = verifier;
        self
    }

    pub fn with_phone_verifier(mut self, verifier: Arc<dyn PhoneVerifier>) -> Self {
        self.phone = verifier;
        self
    }

    pub fn email_meets_threshold(&self, result: &EmailVerification) -> bool {
        result.deliverable && result.business && result.confidence >= self.config.email_threshold
    }

    pub fn phone_meets_threshold(&self, result: &PhoneVerification) -> bool {
        result.valid && result.confidence >= self.config.phone_threshold
    }

    pub async fn verify_email(&self, email: &str) -> EmailVerification {
        let key = email.trim().to_lowercase();
        if let Some(hit) = self.cached(&key) {
            debug!(email = %mask_email(&key), "Using cached email verification");
            return hit;
        }

        let verifier = self.email.as_ref();
        let result = match self
            .breakers
            .execute(verifier.name(), || verifier.verify(&key))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = verifier.name(), error = %e, "Email verification failed, using syntax check");
                fallback_email(&key).await
            }
        };

        self.email_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, result.clone());
        result
    }

    pub async fn verify_phone(&self, phone: &str) -> PhoneVerification {
        let verifier = self.phone.as_ref();
        match self
            .breakers
            .execute(verifier.name(), || verifier.verify(phone))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = verifier.name(), error = %e, "Phone verification failed, using basic check");
                fallback_phone(phone).await
            }
        }
    }

    /// Verify every contact the lead has and persist the flags.
    pub async fn verify_lead(&self, lead: &Lead) -> Result<LeadVerification, DatabaseError> {
        let mut verdict = LeadVerification {
            email_verified: false,
            phone_verified: false,
            confidence: 0.0,
        };

        if let Some(email) = lead.primary_email.as_deref() {
            let r = self.verify_email(email).await;
            verdict.email_verified = self.email_meets_threshold(&r);
            verdict.confidence = verdict.confidence.max(r.confidence);
        }
        if let Some(phone) = lead.primary_phone.as_deref() {
            let r = self.verify_phone(phone).await;
            verdict.phone_verified = self.phone_meets_threshold(&r);
            verdict.confidence = verdict.confidence.max(r.confidence);
        }

        self.db
            .update_verification(
                lead.id,
                verdict.email_verified,
                verdict.phone_verified,
                verdict.confidence,
            )
            .await?;

        info!(
            lead_id = %lead.id,
            email = ?lead.primary_email.as_deref().map(mask_email),
            phone = ?lead.primary_phone.as_deref().map(mask_phone),
            email_verified = verdict.email_verified,
            phone_verified = verdict.phone_verified,
            confidence = verdict.confidence,
            "Lead verified"
        );
        Ok(verdict)
    }

    /// Verify up to `limit` leads that have never been checked.
    /// Returns how many were processed.
    pub async fn verify_pending(&self, limit: u32) -> Result<usize, DatabaseError> {
        let pending = self.db.leads_pending_verification(limit).await?;
        let mut verified = 0;
        for lead in &pending {
            let verdict = self.verify_lead(lead).await?;
            if verdict.email_verified || verdict.phone_verified {
                verified += 1;
            }
        }
        if !pending.is_empty() {
            info!(checked = pending.len(), verified, "Verification sweep finished");
        }
        Ok(pending.len())
    }

    fn cached(&self, key: &str) -> Option<EmailVerification> {
        let cache = self.email_cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .get(key)
            .filter(|r| Utc::now() - r.verified_at < Duration::days(CACHE_TTL_DAYS))
            .cloned()
    }
}

async fn fallback_email(email: &str) -> EmailVerification {
    match SyntaxEmailVerifier.verify(email).await {
        Ok(r) => r,
        Err(_) => EmailVerification {
            email: email.to_string(),
            deliverable: false,
            business: false,
            confidence: 0.0,
            provider: "none".into(),
            provider_response: serde_json::Value::Null,
            verified_at: Utc::now(),
        },
    }
}

async fn fallback_phone(phone: &str) -> PhoneVerification {
    match BasicPhoneVerifier.verify(phone).await {
        Ok(r) => r,
        Err(_) => PhoneVerification {
            phone: phone.to_string(),
            valid: false,
            carrier_type: "unknown".into(),
            business_line: false,
            confidence: 0.0,
            provider: "none".into(),
            provider_response: serde_json::Value::Null,
            verified_at: Utc::now(),
        },
    }
}
