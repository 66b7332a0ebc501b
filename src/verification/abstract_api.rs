//! AbstractAPI email validation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use super::basic::{is_business_address, is_role_address};
use super::{EmailVerification, EmailVerifier};
use crate::delivery::transport::{map_reqwest_error, snippet};
use crate::error::ProviderError;
use crate::leads::normalize_email;

const PROVIDER: &str = "abstractapi";
const ENDPOINT: &str = "https://emailvalidation.abstractapi.com/v1/";

pub struct AbstractApiEmailVerifier {
    client: reqwest::Client,
    api_key: SecretString,
    timeout: Duration,
}

impl AbstractApiEmailVerifier {
    pub fn new(api_key: SecretString) -> Self {
        let timeout = Duration::from_secs(10);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            timeout,
        }
    }

    /// `None` if `ABSTRACTAPI_KEY` is unset.
    pub fn from_env() -> Option<Self> {
        std::env::var("ABSTRACTAPI_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|k| Self::new(SecretString::from(k)))
    }
}

fn flag(data: &serde_json::Value, key: &str) -> bool {
    data[key]["value"].as_bool().unwrap_or(false)
}

/// Score an AbstractAPI response body.
pub(crate) fn interpret(email: &str, data: serde_json::Value) -> EmailVerification {
    let deliverable = data["deliverability"].as_str() == Some("DELIVERABLE")
        && flag(&data, "is_valid_format")
        && !flag(&data, "is_disposable_email");
    let business = is_business_address(email);

    let mut confidence = 0.0;
    if deliverable {
        confidence += 0.5;
    }
    if business {
        confidence += 0.3;
    }
    if let Some(quality) = data["quality_score"]
        .as_f64()
        .or_else(|| data["quality_score"].as_str().and_then(|s| s.parse().ok()))
    {
        confidence += quality * 0.2;
    }
    if flag(&data, "is_disposable_email") {
        confidence *= 0.5;
    }
    if flag(&data, "is_free_email") && !is_role_address(email) {
        confidence *= 0.6;
    }

    EmailVerification {
        email: email.to_string(),
        deliverable,
        business,
        confidence: f64::min(confidence, 1.0),
        provider: PROVIDER.to_string(),
        provider_response: data,
        verified_at: Utc::now(),
    }
}

#[async_trait]
impl EmailVerifier for AbstractApiEmailVerifier {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn verify(&self, email: &str) -> Result<EmailVerification, ProviderError> {
        let email = normalize_email(email);
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("api_key", self.api_key.expose_secret()), ("email", email.as_str())])
            .send()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER, self.timeout, e))?;
        Ok(interpret(&email, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliverable_business_address_scores_high() {
        let v = interpret(
            "owner@rosas.test",
            serde_json::json!({
                "deliverability": "DELIVERABLE",
                "quality_score": "0.90",
                "is_valid_format": { "value": true },
                "is_disposable_email": { "value": false },
                "is_free_email": { "value": false },
            }),
        );
        assert!(v.deliverable && v.business);
        assert!((v.confidence - 0.98).abs() < 1e-9);
    }

    #[test]
    fn free_personal_address_penalized() {
        let v = interpret(
            "rosa@gmail.com",
            serde_json::json!({
                "deliverability": "DELIVERABLE",
                "is_valid_format": { "value": true },
                "is_free_email": { "value": true },
            }),
        );
        assert!(!v.business);
        assert!((v.confidence - 0.3).abs() < 1e-9);
    }
}
