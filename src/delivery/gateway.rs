//! Delivery gateway — the single exit point for outbound contact.
//!
//! Holds an ordered provider list per channel. Each provider call runs
//! through the shared breaker registry; an open breaker moves on to the next
//! provider. Dry-run stops right before the transport call.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{CallTransport, EmailTransport, OutboundEmail, TransportReceipt};
use crate::compliance::audit::{mask_email, mask_phone};
use crate::config::ComplianceConfig;
use crate::content::Message;
use crate::error::{DeliveryError, FailureClass, ProviderError};
use crate::leads::{Channel, Lead};
use crate::resilience::BreakerRegistry;

pub const ONE_CLICK: &str = "List-Unsubscribe=One-Click";

/// Outcome of one gateway send. Provider failures are data, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub provider: String,
    pub provider_message_id: Option<String>,
    #[serde(skip)]
    pub failure: Option<ProviderError>,
    pub raw_response: Option<serde_json::Value>,
    pub dry_run: bool,
}

impl DeliveryResult {
    fn sent(provider: &str, receipt: TransportReceipt) -> Self {
        Self {
            success: true,
            provider: provider.to_string(),
            provider_message_id: Some(receipt.provider_message_id),
            failure: None,
            raw_response: Some(receipt.raw),
            dry_run: false,
        }
    }

    fn failed(provider: &str, failure: ProviderError) -> Self {
        Self {
            success: false,
            provider: provider.to_string(),
            provider_message_id: None,
            raw_response: Some(serde_json::json!({ "error": failure.to_string() })),
            failure: Some(failure),
            dry_run: false,
        }
    }

    fn simulated() -> Self {
        Self {
            success: true,
            provider: "dry_run".to_string(),
            provider_message_id: Some(format!("dry_run_{}", Uuid::new_v4().simple())),
            failure: None,
            raw_response: None,
            dry_run: true,
        }
    }

    /// `transient`, `permanent`, `circuit_open`, `retries_exhausted` or `critical`.
    pub fn kind(&self) -> Option<&'static str> {
        self.failure.as_ref().map(ProviderError::kind)
    }

    pub fn is_permanent(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.classify() == FailureClass::Permanent)
    }

    pub fn is_critical(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.classify() == FailureClass::Critical)
    }
}

/// Spoken version of a message: body without the email footer, plus the
/// sender identity.
pub fn call_script(message: &Message, config: &ComplianceConfig) -> String {
    let body = message
        .text_body
        .split("\n\n---\n")
        .next()
        .unwrap_or_default()
        .trim();
    format!(
        "{body}\n\nThis call is from {}. To stop future calls, tell us or reply STOP.",
        config.sender_name
    )
}

pub struct DeliveryGateway {
    breakers: Arc<BreakerRegistry>,
    compliance: ComplianceConfig,
    email: Vec<Arc<dyn EmailTransport>>,
    call: Vec<Arc<dyn CallTransport>>,
}

impl DeliveryGateway {
    pub fn new(breakers: Arc<BreakerRegistry>, compliance: ComplianceConfig) -> Self {
        Self {
            breakers,
            compliance,
            email: Vec::new(),
            call: Vec::new(),
        }
    }

    /// Append an email provider. The first one added is the primary.
    pub fn with_email_transport(mut self, transport: Arc<dyn EmailTransport>) -> Self {
        self.email.push(transport);
        self
    }

    pub fn with_call_transport(mut self, transport: Arc<dyn CallTransport>) -> Self {
        self.call.push(transport);
        self
    }

    pub fn has_provider(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => !self.email.is_empty(),
            Channel::Call => !self.call.is_empty(),
        }
    }

    /// Whether every configured provider for `channel` is failing fast.
    pub fn all_unavailable(&self, channel: Channel) -> bool {
        let names: Vec<&str> = match channel {
            Channel::Email => self.email.iter().map(|t| t.name()).collect(),
            Channel::Call => self.call.iter().map(|t| t.name()).collect(),
        };
        !names.is_empty() && names.iter().all(|n| self.breakers.is_open(n))
    }

    /// Render the outbound email for `message`, headers included.
    pub fn build_email(&self, message: &Message, to: &str) -> OutboundEmail {
        OutboundEmail {
            from: self.compliance.sender_email.clone(),
            from_name: Some(self.compliance.sender_name.clone()),
            to: to.to_string(),
            subject: message.subject.clone(),
            html: message.html_body.clone(),
            text: message.text_body.clone(),
            headers: vec![
                (
                    "List-Unsubscribe".to_string(),
                    format!("<{}>", message.unsubscribe_url),
                ),
                ("List-Unsubscribe-Post".to_string(), ONE_CLICK.to_string()),
                ("Precedence".to_string(), "bulk".to_string()),
            ],
        }
    }

    /// Deliver `message` to `lead`.
    ///
    /// `Err` only for contract violations and for every provider being
    /// unavailable. Ordinary provider failures come back as an unsuccessful
    /// `DeliveryResult`.
    pub async fn send(
        &self,
        message: &Message,
        lead: &Lead,
        dry_run: bool,
    ) -> Result<DeliveryResult, DeliveryError> {
        let channel = message.channel;
        let contact = lead
            .contact_for(channel)
            .filter(|c| !c.trim().is_empty())
            .ok_or(DeliveryError::MissingContact {
                lead_id: lead.id,
                channel,
            })?;

        match channel {
            Channel::Email => {
                let email = self.build_email(message, contact);
                check_unsubscribe(&email, message)?;
                if dry_run {
                    info!(
                        target: "outreach::dry_run",
                        lead_id = %lead.id,
                        to = %mask_email(contact),
                        subject = %email.subject,
                        "[DRY-RUN] Would send email"
                    );
                    return Ok(DeliveryResult::simulated());
                }
                self.send_email(&email).await
            }
            Channel::Call => {
                let script = call_script(message, &self.compliance);
                if dry_run {
                    info!(
                        target: "outreach::dry_run",
                        lead_id = %lead.id,
                        to = %mask_phone(contact),
                        script_chars = script.len(),
                        "[DRY-RUN] Would place call"
                    );
                    return Ok(DeliveryResult::simulated());
                }
                self.place_call(contact, &script).await
            }
        }
    }

    async fn send_email(&self, email: &OutboundEmail) -> Result<DeliveryResult, DeliveryError> {
        if self.email.is_empty() {
            return Err(DeliveryError::NoProviderConfigured {
                channel: Channel::Email,
            });
        }

        let mut last: Option<DeliveryResult> = None;
        for transport in &self.email {
            let name = transport.name();
            if self.breakers.is_open(name) {
                debug!(provider = name, "Circuit open, trying next provider");
                continue;
            }
            let t = transport.as_ref();
            let outcome = self.breakers.execute(name, || t.send_email(email)).await;
            match settle(name, outcome) {
                Settled::Done(result) => return Ok(result),
                Settled::Next(result) => last = result.or(last),
            }
        }

        last.ok_or(DeliveryError::AllProvidersUnavailable {
            channel: Channel::Email,
        })
    }

    async fn place_call(&self, to: &str, script: &str) -> Result<DeliveryResult, DeliveryError> {
        if self.call.is_empty() {
            return Err(DeliveryError::NoProviderConfigured {
                channel: Channel::Call,
            });
        }

        let mut last: Option<DeliveryResult> = None;
        for transport in &self.call {
            let name = transport.name();
            if self.breakers.is_open(name) {
                debug!(provider = name, "Circuit open, trying next provider");
                continue;
            }
            let t = transport.as_ref();
            let outcome = self.breakers.execute(name, || t.place_call(to, script)).await;
            match settle(name, outcome) {
                Settled::Done(result) => return Ok(result),
                Settled::Next(result) => last = result.or(last),
            }
        }

        last.ok_or(DeliveryError::AllProvidersUnavailable {
            channel: Channel::Call,
        })
    }
}

enum Settled {
    /// Stop here: sent, or a permanent failure no other provider can fix.
    Done(DeliveryResult),
    /// Try the next provider. `None` if this one failed fast.
    Next(Option<DeliveryResult>),
}

fn settle(provider: &str, outcome: Result<TransportReceipt, ProviderError>) -> Settled {
    match outcome {
        Ok(receipt) => Settled::Done(DeliveryResult::sent(provider, receipt)),
        Err(e) if e.is_circuit_open() => Settled::Next(None),
        Err(e) if e.classify() == FailureClass::Permanent => {
            warn!(provider, error = %e, "Permanent delivery failure");
            Settled::Done(DeliveryResult::failed(provider, e))
        }
        Err(e) => {
            warn!(provider, error = %e, kind = e.kind(), "Delivery failed, trying next provider");
            Settled::Next(Some(DeliveryResult::failed(provider, e)))
        }
    }
}

/// Outbound email must carry both unsubscribe headers and the in-body link.
fn check_unsubscribe(email: &OutboundEmail, message: &Message) -> Result<(), DeliveryError> {
    let url = &message.unsubscribe_url;
    let header_ok = email
        .header("List-Unsubscribe")
        .is_some_and(|v| !url.is_empty() && v.contains(url.as_str()));
    let post_ok = email.header("List-Unsubscribe-Post") == Some(ONE_CLICK);
    let body_ok = !url.is_empty() && email.text.contains(url.as_str());

    if header_ok && post_ok && body_ok {
        Ok(())
    } else {
        Err(DeliveryError::MissingUnsubscribe {
            recipient: mask_email(&email.to),
        })
    }
}
