//! SMTP email transport via lettre.

use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as MimeMessage, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use super::transport::{EmailTransport, OutboundEmail, TransportReceipt};
use crate::compliance::audit::mask_email;
use crate::error::{ConfigError, ProviderError};

const PROVIDER: &str = "smtp";

/// Reply codes for a refused login: auth required, mechanism too weak,
/// credentials invalid.
fn is_auth_rejection(code: &str) -> bool {
    matches!(code, "530" | "534" | "535")
}

/// SMTP relay settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub timeout_secs: u64,
}

impl SmtpConfig {
    /// Returns `None` if `OUTREACH_SMTP_HOST` is not set (transport disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OUTREACH_SMTP_HOST").ok()?;

        let port: u16 = std::env::var("OUTREACH_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("OUTREACH_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("OUTREACH_SMTP_PASSWORD").unwrap_or_default();

        let timeout_secs: u64 = std::env::var("OUTREACH_SMTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            timeout_secs,
        })
    }
}

/// Sends through an SMTP relay. lettre's sync transport runs on the
/// blocking pool.
pub struct SmtpEmailTransport {
    transport: SmtpTransport,
    timeout: std::time::Duration,
}

impl SmtpEmailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let timeout = std::time::Duration::from_secs(config.timeout_secs);

        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| ConfigError::InvalidValue {
                key: "OUTREACH_SMTP_HOST".into(),
                message: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, timeout })
    }

    fn map_error(&self, e: lettre::transport::smtp::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: PROVIDER.into(),
                after: self.timeout,
            }
        } else if e
            .status()
            .is_some_and(|code| is_auth_rejection(&code.to_string()))
        {
            ProviderError::Auth {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            }
        } else if e.is_permanent() {
            ProviderError::InvalidInput {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            }
        } else {
            ProviderError::Connection {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            }
        }
    }
}

fn invalid(reason: String) -> ProviderError {
    ProviderError::InvalidInput {
        provider: PROVIDER.into(),
        reason,
    }
}

/// Build the MIME message. Returns it with the generated Message-ID.
pub(crate) fn build_mime(email: &OutboundEmail) -> Result<(MimeMessage, String), ProviderError> {
    let from_addr = email
        .from
        .parse()
        .map_err(|e| invalid(format!("Invalid from address: {e}")))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| invalid(format!("Invalid to address: {e}")))?;

    let domain = email.from.rsplit('@').next().unwrap_or("localhost");
    let message_id = format!("<{}@{}>", Uuid::new_v4().simple(), domain);

    let mut builder = MimeMessage::builder()
        .from(Mailbox::new(email.from_name.clone(), from_addr))
        .to(to)
        .subject(email.subject.clone())
        .message_id(Some(message_id.clone()));

    for (name, value) in &email.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| invalid(format!("Invalid header name {name}: {e}")))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let body = if email.html.is_empty() {
        builder.header(ContentType::TEXT_PLAIN).body(email.text.clone())
    } else {
        builder.multipart(MultiPart::alternative_plain_html(
            email.text.clone(),
            email.html.clone(),
        ))
    }
    .map_err(|e| invalid(format!("Failed to build email: {e}")))?;

    Ok((body, message_id))
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send_email(&self, email: &OutboundEmail) -> Result<TransportReceipt, ProviderError> {
        let (mime, message_id) = build_mime(email)?;
        let transport = self.transport.clone();

        let response = tokio::task::spawn_blocking(move || transport.send(&mime))
            .await
            .map_err(|e| ProviderError::Unclassified {
                provider: PROVIDER.into(),
                reason: format!("SMTP task failed: {e}"),
            })?
            .map_err(|e| self.map_error(e))?;

        info!(to = %mask_email(&email.to), %message_id, "Email accepted by SMTP relay");
        Ok(TransportReceipt {
            provider_message_id: message_id,
            raw: serde_json::json!({
                "code": response.code().to_string(),
                "message": response.message().collect::<Vec<_>>(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: "outreach@devsync.test".into(),
            from_name: Some("DevSync".into()),
            to: "owner@bakery.test".into(),
            subject: "Hello".into(),
            html: "<p>Hi</p>".into(),
            text: "Hi".into(),
            headers: vec![
                ("List-Unsubscribe".into(), "<https://u.test/?token=t>".into()),
                ("List-Unsubscribe-Post".into(), "List-Unsubscribe=One-Click".into()),
            ],
        }
    }

    #[test]
    fn mime_carries_unsubscribe_headers() {
        let (mime, message_id) = build_mime(&email()).unwrap();
        let raw = String::from_utf8(mime.formatted()).unwrap();
        assert!(raw.contains("List-Unsubscribe: <https://u.test/?token=t>"));
        assert!(raw.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click"));
        assert!(message_id.ends_with("@devsync.test>"));
        assert!(raw.contains(&message_id));
    }

    #[test]
    fn login_refusals_are_auth_failures() {
        assert!(is_auth_rejection("535"));
        assert!(is_auth_rejection("530"));
        assert!(!is_auth_rejection("550"));
        assert!(!is_auth_rejection("454"));
    }

    #[test]
    fn bad_recipient_is_permanent() {
        let mut e = email();
        e.to = "not an address".into();
        let err = build_mime(&e).unwrap_err();
        assert_eq!(err.kind(), "permanent");
    }
}
