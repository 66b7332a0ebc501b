//! Twilio programmable voice transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::transport::{CallTransport, TransportReceipt, map_reqwest_error, snippet};
use crate::compliance::audit::mask_phone;
use crate::content::compliance::escape_html;
use crate::error::ProviderError;

const PROVIDER: &str = "twilio";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Caller ID in E.164.
    pub from_number: String,
    pub timeout: Duration,
}

impl TwilioConfig {
    /// Returns `None` unless SID, token, and from number are all set.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        let from_number = std::env::var("TWILIO_FROM_NUMBER").ok()?;
        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number,
            timeout: Duration::from_secs(30),
        })
    }
}

pub struct TwilioCallTransport {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioCallTransport {
    pub fn new(config: TwilioConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn calls_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.config.account_sid
        )
    }
}

/// Inline TwiML that reads the script once.
pub(crate) fn twiml(script: &str) -> String {
    format!("<Response><Say>{}</Say></Response>", escape_html(script.trim()))
}

#[async_trait]
impl CallTransport for TwilioCallTransport {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn place_call(&self, to: &str, script: &str) -> Result<TransportReceipt, ProviderError> {
        let mut form = HashMap::new();
        form.insert("To", to.to_string());
        form.insert("From", self.config.from_number.clone());
        form.insert("Twiml", twiml(script));

        let response = self
            .client
            .post(self.calls_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER, self.config.timeout, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(PROVIDER, self.config.timeout, e))?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        let raw: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::Unclassified {
                provider: PROVIDER.into(),
                reason: format!("unreadable response: {e}"),
            })?;
        let sid = raw["sid"].as_str().unwrap_or_default().to_string();

        info!(to = %mask_phone(to), %sid, "Call queued with Twilio");
        Ok(TransportReceipt {
            provider_message_id: sid,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twiml_escapes_script() {
        assert_eq!(
            twiml(" Hi <there> & welcome "),
            "<Response><Say>Hi &lt;there&gt; &amp; welcome</Say></Response>"
        );
    }
}
