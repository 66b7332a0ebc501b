//! Audit log — persisted, PII-masked record of every compliance-relevant action.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z0-9._%+\-]{1,2})[a-z0-9._%+\-]*@([a-z0-9.\-]+\.[a-z]{2,})\b")
        .expect("email mask pattern")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().\-]{7,}\d").expect("phone mask pattern"));

/// Keys whose values are always fully redacted.
const SECRET_KEYS: &[&str] = &["password", "api_key", "token", "secret", "auth_token"];

/// Audit severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for AuditLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown audit level: {}", s)),
        }
    }
}

/// One audit row. `details` is masked before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub level: AuditLevel,
    pub component: String,
    pub action: String,
    pub lead_id: Option<Uuid>,
    pub actor: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(level: AuditLevel, component: &str, action: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            component: component.to_string(),
            action: action.to_string(),
            lead_id: None,
            actor: None,
            details: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn lead(mut self, lead_id: Uuid) -> Self {
        self.lead_id = Some(lead_id);
        self
    }

    pub fn actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// `jo***@example.com`
pub fn mask_email(text: &str) -> String {
    EMAIL_RE.replace_all(text, "$1***@$2").into_owned()
}

/// Keep the last four digits.
pub fn mask_phone(text: &str) -> String {
    PHONE_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let digits: Vec<char> = caps[0].chars().filter(|c| c.is_ascii_digit()).collect();
            let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
            format!("***-***-{tail}")
        })
        .into_owned()
}

/// Mask every string in a JSON value and redact secret-looking keys.
pub fn mask_value(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(mask_phone(&mask_email(s))),
        Value::Array(items) => Value::Array(items.iter().map(mask_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_lowercase();
                    if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                        (k.clone(), Value::String("***REDACTED***".into()))
                    } else {
                        (k.clone(), mask_value(v))
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Writes audit entries to the store and mirrors them to the log.
pub struct AuditLogger {
    db: Arc<dyn Database>,
}

impl AuditLogger {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self { db })
    }

    /// Record an entry. Storage failures are logged, never propagated.
    pub async fn record(&self, entry: AuditEntry) {
        let entry = AuditEntry {
            details: mask_value(&entry.details),
            ..entry
        };
        info!(
            target: "outreach::audit",
            component = %entry.component,
            action = %entry.action,
            lead_id = ?entry.lead_id,
            details = %entry.details,
            "audit"
        );
        if let Err(e) = self.db.insert_audit(&entry).await {
            warn!(error = %e, action = %entry.action, "Failed to persist audit entry");
        }
    }

    /// Drop audit rows past retention. Opt-out records live elsewhere and are kept.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let removed = self.db.purge_audit_before(cutoff).await?;
        if removed > 0 {
            info!(removed, days, "Purged audit entries past retention");
        }
        Ok(removed)
    }
}
