//! AI copy generation.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The pipeline only sees the `AiGenerator` trait. Timeouts and retries are
//! applied by the caller.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, ProviderError};

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([45]\d{2})\b").expect("status code pattern"));

/// Produces raw outreach copy for one business.
#[async_trait]
pub trait AiGenerator: Send + Sync {
    /// Provider name used for breaker accounting.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        business_name: &str,
        category: &str,
        city: &str,
    ) -> Result<String, ProviderError>;
}

/// Supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiBackend {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for AiBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            _ => Err(format!("Unknown AI backend: {}", s)),
        }
    }
}

/// Configuration for creating a generator.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub backend: AiBackend,
    pub api_key: SecretString,
    pub model: String,
    /// Company name the copy is written for.
    pub sender_name: String,
}

impl AiConfig {
    /// Read from `OUTREACH_AI_BACKEND` plus the backend's API key variable.
    /// Returns `Ok(None)` when no key is set; the pipeline then uses the
    /// template path only.
    pub fn from_env(sender_name: &str) -> Result<Option<Self>, ConfigError> {
        let backend: AiBackend = match std::env::var("OUTREACH_AI_BACKEND") {
            Ok(v) => v.parse().map_err(|e: String| ConfigError::InvalidValue {
                key: "OUTREACH_AI_BACKEND".into(),
                message: e,
            })?,
            Err(_) => AiBackend::Anthropic,
        };
        let (key_var, default_model) = match backend {
            AiBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-3-5-haiku-latest"),
            AiBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
        };
        let Ok(key) = std::env::var(key_var) else {
            return Ok(None);
        };
        Ok(Some(Self {
            backend,
            api_key: SecretString::from(key),
            model: std::env::var("OUTREACH_AI_MODEL").unwrap_or_else(|_| default_model.into()),
            sender_name: sender_name.to_string(),
        }))
    }
}

/// Preamble given to the model.
pub fn preamble(sender_name: &str) -> String {
    format!(
        "You are a professional business email writer for {sender_name}, a web development company. \
         Write friendly, concise cold emails without pushy sales language."
    )
}

/// Per-lead instruction.
pub fn build_prompt(business_name: &str, category: &str, city: &str) -> String {
    format!(
        "Write a brief cold email.\n\n\
         Business details:\n\
         - Name: {business_name}\n\
         - Category: {category}\n\
         - City: {city}\n\n\
         Structure:\n\
         Line 1: a personalized hook referencing their business or industry.\n\
         Line 2: the value proposition: we build fast, SEO-ready websites for {category} businesses.\n\
         Line 3: a clear call to action to schedule a short call.\n\n\
         Between 60 and 120 words. Start with a line `Subject: ...`, then the body. \
         Do not include a signature or unsubscribe text."
    )
}

/// Map a rig prompt error onto the provider failure taxonomy.
fn classify_prompt_error(provider: &str, err: impl std::fmt::Display) -> ProviderError {
    let reason = err.to_string();
    if let Some(status) = STATUS_RE
        .captures(&reason)
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        return ProviderError::Http {
            provider: provider.to_string(),
            status,
            body: reason,
        };
    }
    ProviderError::Connection {
        provider: provider.to_string(),
        reason,
    }
}

/// `AiGenerator` backed by a rig agent.
pub struct RigGenerator<M: CompletionModel> {
    agent: Agent<M>,
    model: String,
}

impl<M: CompletionModel> RigGenerator<M> {
    pub fn new(agent: Agent<M>, model: &str) -> Self {
        Self {
            agent,
            model: model.to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl<M> AiGenerator for RigGenerator<M>
where
    M: CompletionModel + 'static,
{
    fn name(&self) -> &str {
        "ai"
    }

    async fn generate(
        &self,
        business_name: &str,
        category: &str,
        city: &str,
    ) -> Result<String, ProviderError> {
        let prompt = build_prompt(business_name, category, city);
        let text: String = self
            .agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| classify_prompt_error(self.name(), e))?;
        tracing::debug!(model = %self.model, chars = text.len(), "AI copy generated");
        Ok(text)
    }
}

/// Create a generator from configuration.
///
/// Must be called inside a Tokio runtime: building the agent spawns its tool server.
pub fn create_generator(config: &AiConfig) -> Result<Arc<dyn AiGenerator>, ConfigError> {
    match config.backend {
        AiBackend::Anthropic => create_anthropic_generator(config),
        AiBackend::OpenAi => create_openai_generator(config),
    }
}

fn create_anthropic_generator(config: &AiConfig) -> Result<Arc<dyn AiGenerator>, ConfigError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            ConfigError::InvalidValue {
                key: "ANTHROPIC_API_KEY".into(),
                message: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(&preamble(&config.sender_name))
        .max_tokens(400)
        .temperature(0.7)
        .build();
    tracing::info!("Using Anthropic for outreach copy (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(agent, &config.model)))
}

fn create_openai_generator(config: &AiConfig) -> Result<Arc<dyn AiGenerator>, ConfigError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            ConfigError::InvalidValue {
                key: "OPENAI_API_KEY".into(),
                message: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(&preamble(&config.sender_name))
        .max_tokens(400)
        .temperature(0.7)
        .build();
    tracing::info!("Using OpenAI for outreach copy (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(agent, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    #[tokio::test]
    async fn create_generator_constructs_without_network() {
        // rig-core clients accept any string as API key at construction time.
        let config = AiConfig {
            backend: AiBackend::Anthropic,
            api_key: SecretString::from("test-key"),
            model: "claude-3-5-haiku-latest".to_string(),
            sender_name: "DevSync Innovation".to_string(),
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.name(), "ai");

        let config = AiConfig {
            backend: AiBackend::OpenAi,
            model: "gpt-4o-mini".to_string(),
            ..config
        };
        assert!(create_generator(&config).is_ok());
    }

    #[test]
    fn prompt_mentions_lead_fields() {
        let prompt = build_prompt("Bean There", "cafe", "Denver");
        assert!(prompt.contains("Bean There"));
        assert!(prompt.contains("cafe businesses"));
        assert!(prompt.contains("Denver"));
        assert!(prompt.contains("Subject:"));
    }

    #[test]
    fn prompt_errors_are_classified() {
        let e = classify_prompt_error("ai", "HttpError: status 429 Too Many Requests");
        assert_eq!(e.classify(), FailureClass::Transient);
        let e = classify_prompt_error("ai", "ProviderError: 401 invalid x-api-key");
        assert_eq!(e.classify(), FailureClass::Critical);
        let e = classify_prompt_error("ai", "connection reset by peer");
        assert_eq!(e.classify(), FailureClass::Transient);
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<AiBackend>().unwrap(), AiBackend::OpenAi);
        assert!("mistral".parse::<AiBackend>().is_err());
    }
}
