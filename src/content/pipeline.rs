//! Content pipeline — AI copy with template fallback, compliance stamping,
//! persistence.
//!
//! `generate` never fails for content reasons: any AI timeout, provider error
//! or validation miss falls back to the template. The only error it returns
//! is a storage failure, since an unpersisted message must not be sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::compliance;
use super::generator::AiGenerator;
use super::message::{GenerationMethod, Message, UnsubscribeToken, content_fingerprint};
use super::template;
use super::validate::{split_subject, validate};
use crate::config::ComplianceConfig;
use crate::error::DatabaseError;
use crate::leads::{Channel, ContactKind, Lead};
use crate::resilience::BreakerRegistry;
use crate::store::Database;

pub struct ContentPipeline {
    db: Arc<dyn Database>,
    breakers: Arc<BreakerRegistry>,
    generator: Option<Arc<dyn AiGenerator>>,
    compliance: ComplianceConfig,
    ai_timeout: Duration,
}

impl ContentPipeline {
    pub fn new(
        db: Arc<dyn Database>,
        breakers: Arc<BreakerRegistry>,
        generator: Option<Arc<dyn AiGenerator>>,
        compliance: ComplianceConfig,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            db,
            breakers,
            generator,
            compliance,
            ai_timeout,
        }
    }

    pub fn compliance(&self) -> &ComplianceConfig {
        &self.compliance
    }

    /// Produce, stamp and persist the message for one lead.
    pub async fn generate(&self, lead: &Lead, channel: Channel) -> Result<Message, DatabaseError> {
        let (subject, body, method) = match self.try_ai(lead).await {
            Some((subject, body)) => (subject, body, GenerationMethod::Ai),
            None => {
                let (subject, body) = self.template(lead);
                (subject, body, GenerationMethod::Template)
            }
        };

        let message = self.finalize(lead.id, channel, subject, &body, method);
        self.persist(&message, lead, channel).await?;
        info!(
            lead_id = %lead.id,
            message_id = %message.id,
            method = message.method.as_str(),
            "Message generated"
        );
        Ok(message)
    }

    /// Template subject and body for a lead.
    pub fn template(&self, lead: &Lead) -> (String, String) {
        (
            template::default_subject(&lead.business_name),
            template::render_body(
                &lead.business_name,
                &lead.category,
                &lead.city,
                &self.compliance.sender_name,
            ),
        )
    }

    /// AI path, bounded by a hard timeout. `None` means use the template.
    async fn try_ai(&self, lead: &Lead) -> Option<(String, String)> {
        let generator = self.generator.clone()?;
        let breakers = self.breakers.clone();
        let business = lead.business_name.clone();
        let category = lead.category.clone();
        let city = lead.city.clone();

        // Spawned so the call can be aborted no matter how the generator behaves.
        let mut handle = tokio::spawn(async move {
            let provider = generator.name().to_string();
            breakers
                .execute(&provider, || {
                    let generator = generator.clone();
                    let (business, category, city) =
                        (business.clone(), category.clone(), city.clone());
                    async move { generator.generate(&business, &category, &city).await }
                })
                .await
        });

        let raw = match tokio::time::timeout(self.ai_timeout, &mut handle).await {
            Ok(Ok(Ok(text))) => text,
            Ok(Ok(Err(e))) => {
                warn!(lead_id = %lead.id, error = %e, "AI generation failed, using template");
                return None;
            }
            Ok(Err(e)) => {
                warn!(lead_id = %lead.id, error = %e, "AI task failed, using template");
                return None;
            }
            Err(_) => {
                handle.abort();
                warn!(
                    lead_id = %lead.id,
                    timeout_ms = self.ai_timeout.as_millis() as u64,
                    "AI generation timed out, using template"
                );
                return None;
            }
        };

        let (subject, body) = split_subject(&raw);
        if let Err(issue) = validate(&body, &lead.business_name, &lead.category) {
            warn!(lead_id = %lead.id, issue = %issue, "AI content rejected, using template");
            return None;
        }
        let subject = subject.unwrap_or_else(|| template::default_subject(&lead.business_name));
        Some((subject, body))
    }

    fn finalize(
        &self,
        lead_id: Uuid,
        channel: Channel,
        subject: String,
        body: &str,
        method: GenerationMethod,
    ) -> Message {
        let token = compliance::new_unsubscribe_token();
        let url = compliance::unsubscribe_url(&self.compliance.unsubscribe_base_url, &token);
        let (html_body, text_body) = compliance::stamp(body, &self.compliance, &url);
        Message {
            id: Uuid::new_v4(),
            lead_id,
            channel,
            content_hash: content_fingerprint(&subject, &html_body, &text_body),
            subject,
            html_body,
            text_body,
            method,
            unsubscribe_token: token,
            unsubscribe_url: url,
            created_at: Utc::now(),
        }
    }

    async fn persist(&self, message: &Message, lead: &Lead, channel: Channel) -> Result<(), DatabaseError> {
        self.db.insert_message(message).await?;

        let Some(contact) = lead.contact_for(channel) else {
            debug!(lead_id = %lead.id, "No contact for channel, token not registered");
            return Ok(());
        };
        let kind = ContactKind::from(channel);
        self.db
            .insert_unsubscribe_token(&UnsubscribeToken {
                token: message.unsubscribe_token.clone(),
                contact: kind.normalize(contact),
                kind,
                lead_id: Some(lead.id),
                message_id: Some(message.id),
                created_at: message.created_at,
            })
            .await
    }
}
