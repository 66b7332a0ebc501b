//! SendGrid v3 mail API transport.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::transport::{EmailTransport, OutboundEmail, TransportReceipt, map_reqwest_error, snippet};
use crate::compliance::audit::mask_email;
use crate::error::ProviderError;

const PROVIDER: &str = "sendgrid";
const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: SecretString,
    pub endpoint: String,
    pub timeout: Duration,
}

impl SendGridConfig {
    /// Returns `None` if `SENDGRID_API_KEY` is not set (transport disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_key: SecretString::from(api_key),
            endpoint: std::env::var("SENDGRID_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            timeout: Duration::from_secs(30),
        })
    }
}

pub struct SendGridTransport {
    client: reqwest::Client,
    config: SendGridConfig,
}

impl SendGridTransport {
    pub fn new(config: SendGridConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }
}

/// Request body for `POST /v3/mail/send`.
pub(crate) fn request_body(email: &OutboundEmail) -> serde_json::Value {
    let mut from = serde_json::json!({ "email": email.from });
    if let Some(name) = &email.from_name {
        from["name"] = serde_json::Value::String(name.clone());
    }

    let headers: serde_json::Map<String, serde_json::Value> = email
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    let mut content = vec![serde_json::json!({ "type": "text/plain", "value": email.text })];
    if !email.html.is_empty() {
        content.push(serde_json::json!({ "type": "text/html", "value": email.html }));
    }

    serde_json::json!({
        "personalizations": [{ "to": [{ "email": email.to }] }],
        "from": from,
        "subject": email.subject,
        "content": content,
        "headers": headers,
    })
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send_email(&self, email: &OutboundEmail) -> Result<TransportReceipt, ProviderError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request_body(email))
            .send()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER, self.config.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        info!(to = %mask_email(&email.to), %message_id, "Email accepted by SendGrid");
        Ok(TransportReceipt {
            raw: serde_json::json!({ "status": status.as_u16(), "message_id": message_id }),
            provider_message_id: message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_has_both_parts_and_headers() {
        let email = OutboundEmail {
            from: "outreach@devsync.test".into(),
            from_name: Some("DevSync".into()),
            to: "owner@bakery.test".into(),
            subject: "Hello".into(),
            html: "<p>Hi</p>".into(),
            text: "Hi".into(),
            headers: vec![("Precedence".into(), "bulk".into())],
        };
        let body = request_body(&email);
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "owner@bakery.test");
        assert_eq!(body["from"]["name"], "DevSync");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
        assert_eq!(body["headers"]["Precedence"], "bulk");
    }
}
