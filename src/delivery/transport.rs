//! Provider-facing transport traits.
//!
//! A transport performs exactly one provider call and maps the outcome onto
//! `ProviderError`. Retry, circuit breaking, and fallback live in the gateway.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;

/// Fully rendered outbound email.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Extra headers, e.g. `List-Unsubscribe`.
    pub headers: Vec<(String, String)>,
}

impl OutboundEmail {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a provider handed back for an accepted send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReceipt {
    pub provider_message_id: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Provider name, also the breaker key.
    fn name(&self) -> &str;

    async fn send_email(&self, email: &OutboundEmail) -> Result<TransportReceipt, ProviderError>;
}

#[async_trait]
pub trait CallTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Place an outbound call that reads `script` to the callee.
    async fn place_call(&self, to: &str, script: &str) -> Result<TransportReceipt, ProviderError>;
}

/// Map a reqwest failure (no HTTP status available) onto the taxonomy.
pub(crate) fn map_reqwest_error(
    provider: &str,
    timeout: std::time::Duration,
    e: reqwest::Error,
) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            after: timeout,
        }
    } else if e.is_builder() {
        ProviderError::InvalidInput {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    } else {
        ProviderError::Connection {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Truncate a provider response body for error messages.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let email = OutboundEmail {
            from: "a@x.test".into(),
            from_name: None,
            to: "b@y.test".into(),
            subject: "Hi".into(),
            html: String::new(),
            text: String::new(),
            headers: vec![("List-Unsubscribe".into(), "<https://u.test>".into())],
        };
        assert_eq!(email.header("list-unsubscribe"), Some("<https://u.test>"));
        assert_eq!(email.header("Precedence"), None);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let s = snippet(&long);
        assert!(s.ends_with("..."));
        assert!(s.len() <= 504);
        assert_eq!(snippet("short"), "short");
    }
}
