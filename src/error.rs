//! Error types for the outreach engine.

use std::time::Duration;

use uuid::Uuid;

use crate::leads::Channel;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Campaign error: {0}")]
    Campaign(#[from] CampaignError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ── Provider failures ───────────────────────────────────────────────

/// How a failed external call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeout, 429, 5xx, dropped connection. Retried with backoff.
    Transient,
    /// Invalid recipient, malformed input, other 4xx. Never retried.
    Permanent,
    /// Rejected credentials (401, 403, 407), unclassifiable or systemic.
    /// Stops the run.
    Critical,
}

/// Failure of a call to an external provider (transport, verifier, AI).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected input: {reason}")]
    InvalidInput { provider: String, reason: String },

    #[error("{provider} connection failed: {reason}")]
    Connection { provider: String, reason: String },

    #[error("{provider} rejected credentials: {reason}")]
    Auth { provider: String, reason: String },

    #[error("circuit open for {provider}")]
    CircuitOpen { provider: String },

    #[error("retries exhausted for {provider} after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: Box<ProviderError>,
    },

    #[error("{provider} failed: {reason}")]
    Unclassified { provider: String, reason: String },
}

impl ProviderError {
    /// Name of the provider that produced this failure.
    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Http { provider, .. }
            | Self::InvalidInput { provider, .. }
            | Self::Connection { provider, .. }
            | Self::Auth { provider, .. }
            | Self::CircuitOpen { provider }
            | Self::RetriesExhausted { provider, .. }
            | Self::Unclassified { provider, .. } => provider,
        }
    }

    /// Map this failure onto the retry taxonomy.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } | Self::RetriesExhausted { .. } => {
                FailureClass::Transient
            }
            Self::Http { status, .. } => match *status {
                429 | 500..=599 => FailureClass::Transient,
                401 | 403 | 407 => FailureClass::Critical,
                400..=499 => FailureClass::Permanent,
                _ => FailureClass::Critical,
            },
            Self::InvalidInput { .. } => FailureClass::Permanent,
            Self::Auth { .. } | Self::CircuitOpen { .. } | Self::Unclassified { .. } => {
                FailureClass::Critical
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Short machine-readable tag used in attempt records and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            other => match other.classify() {
                FailureClass::Transient => "transient",
                FailureClass::Permanent => "permanent",
                FailureClass::Critical => "critical",
            },
        }
    }
}

/// Delivery gateway contract violations and systemic conditions.
///
/// Ordinary provider failures are reported inside a `DeliveryResult`, not here.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound email to {recipient} lacks unsubscribe affordances")]
    MissingUnsubscribe { recipient: String },

    #[error("lead {lead_id} has no {channel} contact")]
    MissingContact { lead_id: Uuid, channel: Channel },

    #[error("no {channel} provider configured")]
    NoProviderConfigured { channel: Channel },

    #[error("all {channel} providers unavailable (circuits open)")]
    AllProvidersUnavailable { channel: Channel },
}

/// Approval queue errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval item {0} not found")]
    NotFound(Uuid),

    #[error("Approval item {id} is {status}, not actionable")]
    NotActionable { id: Uuid, status: String },

    #[error("Approval item {0} expired")]
    Expired(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Campaign run errors that prevent a run from starting at all.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("A {0} campaign is already running")]
    AlreadyRunning(Channel),

    #[error("Outreach halted by operator")]
    HaltedByOperator,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
