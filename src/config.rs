//! Configuration types.
//!
//! Everything is built once at startup from `OUTREACH_*` environment
//! variables and passed down by value. Leaf components never read the
//! environment themselves.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::campaign::policy::CallWindow;
use crate::error::ConfigError;
use crate::leads::Channel;
use crate::resilience::{BreakerConfig, RetryPolicy};

/// Per-run campaign parameters.
///
/// Passed to the orchestrator at construction; dry-run and approval mode
/// live here rather than in any global.
#[derive(Debug, Clone)]
pub struct CampaignSettings {
    /// Run all logic but skip the final transport call.
    pub dry_run: bool,
    /// Queue generated content for human sign-off instead of sending.
    pub approval_mode: bool,
    pub daily_email_cap: u32,
    pub daily_call_cap: u32,
    /// Minimum days between two contacts of the same lead.
    pub cooldown_days: u32,
    /// Max email attempts per recipient domain in a trailing hour.
    pub per_domain_limit: u32,
    /// Worker-pool width for per-lead processing.
    pub concurrency: usize,
    /// Call campaigns only run inside this window.
    pub call_window: Option<CallWindow>,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            approval_mode: true,
            daily_email_cap: 100,
            daily_call_cap: 100,
            cooldown_days: 30,
            per_domain_limit: 5,
            concurrency: 4,
            call_window: Some(CallWindow::default()),
        }
    }
}

impl CampaignSettings {
    pub fn daily_cap(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Email => self.daily_email_cap,
            Channel::Call => self.daily_call_cap,
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cooldown_days))
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let call_window = if env_bool("OUTREACH_CALL_WINDOW_ENABLED", true) {
            let window = CallWindow::default();
            Some(CallWindow {
                start: env_time("OUTREACH_CALL_WINDOW_START").unwrap_or(window.start),
                end: env_time("OUTREACH_CALL_WINDOW_END").unwrap_or(window.end),
                weekdays_only: env_bool("OUTREACH_CALL_WEEKDAYS_ONLY", window.weekdays_only),
            })
        } else {
            None
        };

        Self {
            dry_run: env_bool("OUTREACH_DRY_RUN", defaults.dry_run),
            approval_mode: env_bool("OUTREACH_APPROVAL_MODE", defaults.approval_mode),
            daily_email_cap: env_or("OUTREACH_DAILY_EMAIL_CAP", defaults.daily_email_cap),
            daily_call_cap: env_or("OUTREACH_DAILY_CALL_CAP", defaults.daily_call_cap),
            cooldown_days: env_or("OUTREACH_COOLDOWN_DAYS", defaults.cooldown_days),
            per_domain_limit: env_or("OUTREACH_PER_DOMAIN_LIMIT", defaults.per_domain_limit),
            concurrency: env_or("OUTREACH_CONCURRENCY", defaults.concurrency),
            call_window,
        }
    }
}

/// Sender identity and unsubscribe endpoint stamped onto every message.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub sender_name: String,
    pub sender_email: String,
    /// Physical postal address of the sending business.
    pub business_address: String,
    /// Base URL; the per-message token is appended as `?token=`.
    pub unsubscribe_base_url: String,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            sender_name: "DevSync Innovation".to_string(),
            sender_email: "outreach@devsync.example".to_string(),
            business_address: "100 Main Street, Suite 200, Springfield, IL 62701".to_string(),
            unsubscribe_base_url: "https://devsync.example/unsubscribe".to_string(),
        }
    }
}

impl ComplianceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sender_name: env_string("OUTREACH_SENDER_NAME", defaults.sender_name),
            sender_email: env_string("OUTREACH_SENDER_EMAIL", defaults.sender_email),
            business_address: env_string("OUTREACH_BUSINESS_ADDRESS", defaults.business_address),
            unsubscribe_base_url: env_string(
                "OUTREACH_UNSUBSCRIBE_URL",
                defaults.unsubscribe_base_url,
            ),
        }
    }
}

/// Confidence thresholds for marking a contact verified.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub email_threshold: f64,
    pub phone_threshold: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            email_threshold: 0.7,
            phone_threshold: 0.6,
        }
    }
}

/// Cron schedules for the per-channel campaign trigger (UTC, six fields).
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub email_cron: String,
    pub call_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            email_cron: "0 0 10 * * *".to_string(),
            call_cron: "0 0 11 * * Mon-Fri".to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub campaign: CampaignSettings,
    pub compliance: ComplianceConfig,
    pub verification: VerificationConfig,
    pub schedule: ScheduleConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    /// Hard cap on one AI generation call.
    pub ai_timeout: Duration,
    /// Pending approval items become non-actionable after this many days.
    pub approval_expiry_days: u32,
    /// Audit rows older than this are purged. Opt-out records are never purged.
    pub audit_retention_days: u32,
    /// Recipient of campaign reports, if any.
    pub operator_email: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/outreach.db"),
            campaign: CampaignSettings::default(),
            compliance: ComplianceConfig::default(),
            verification: VerificationConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            ai_timeout: Duration::from_secs(5),
            approval_expiry_days: 7,
            audit_retention_days: 90,
            operator_email: None,
        }
    }
}

impl EngineConfig {
    /// Build from the environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retry_defaults = RetryPolicy::default();
        let breaker_defaults = BreakerConfig::default();

        let config = Self {
            db_path: std::env::var("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            campaign: CampaignSettings::from_env(),
            compliance: ComplianceConfig::from_env(),
            verification: VerificationConfig {
                email_threshold: env_or(
                    "OUTREACH_EMAIL_CONFIDENCE_THRESHOLD",
                    defaults.verification.email_threshold,
                ),
                phone_threshold: env_or(
                    "OUTREACH_PHONE_CONFIDENCE_THRESHOLD",
                    defaults.verification.phone_threshold,
                ),
            },
            schedule: ScheduleConfig {
                email_cron: env_string("OUTREACH_EMAIL_CRON", defaults.schedule.email_cron),
                call_cron: env_string("OUTREACH_CALL_CRON", defaults.schedule.call_cron),
            },
            retry: RetryPolicy {
                max_attempts: env_or("OUTREACH_RETRY_ATTEMPTS", retry_defaults.max_attempts),
                base_delay: Duration::from_millis(env_or(
                    "OUTREACH_RETRY_BASE_MS",
                    retry_defaults.base_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(env_or(
                    "OUTREACH_RETRY_MAX_MS",
                    retry_defaults.max_delay.as_millis() as u64,
                )),
                jitter_ratio: retry_defaults.jitter_ratio,
            },
            breaker: BreakerConfig {
                failure_threshold: env_or(
                    "OUTREACH_BREAKER_THRESHOLD",
                    breaker_defaults.failure_threshold,
                ),
                cool_down: Duration::from_secs(env_or(
                    "OUTREACH_BREAKER_COOL_DOWN_SECS",
                    breaker_defaults.cool_down.as_secs(),
                )),
            },
            ai_timeout: Duration::from_millis(env_or(
                "OUTREACH_AI_TIMEOUT_MS",
                defaults.ai_timeout.as_millis() as u64,
            )),
            approval_expiry_days: env_or(
                "OUTREACH_APPROVAL_EXPIRY_DAYS",
                defaults.approval_expiry_days,
            ),
            audit_retention_days: env_or(
                "OUTREACH_AUDIT_RETENTION_DAYS",
                defaults.audit_retention_days,
            ),
            operator_email: std::env::var("OUTREACH_OPERATOR_EMAIL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make outreach non-compliant or meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.campaign;
        for (key, cap) in [
            ("OUTREACH_DAILY_EMAIL_CAP", c.daily_email_cap),
            ("OUTREACH_DAILY_CALL_CAP", c.daily_call_cap),
        ] {
            if !(1..=10_000).contains(&cap) {
                return Err(invalid(key, format!("{cap} is outside 1..=10000")));
            }
        }
        if !(1..=365).contains(&c.cooldown_days) {
            return Err(invalid(
                "OUTREACH_COOLDOWN_DAYS",
                format!("{} is outside 1..=365", c.cooldown_days),
            ));
        }
        if c.per_domain_limit == 0 {
            return Err(invalid("OUTREACH_PER_DOMAIN_LIMIT", "must be at least 1".into()));
        }
        if c.concurrency == 0 {
            return Err(invalid("OUTREACH_CONCURRENCY", "must be at least 1".into()));
        }
        if let Some(window) = &c.call_window
            && window.start >= window.end
        {
            return Err(invalid(
                "OUTREACH_CALL_WINDOW_START",
                "call window start must be before its end".into(),
            ));
        }

        for (key, value) in [
            (
                "OUTREACH_EMAIL_CONFIDENCE_THRESHOLD",
                self.verification.email_threshold,
            ),
            (
                "OUTREACH_PHONE_CONFIDENCE_THRESHOLD",
                self.verification.phone_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} is outside [0, 1]")));
            }
        }

        if !self.compliance.sender_email.contains('@') {
            return Err(invalid(
                "OUTREACH_SENDER_EMAIL",
                "must be a valid email address".into(),
            ));
        }
        if self.compliance.business_address.trim().len() < 10 {
            return Err(invalid(
                "OUTREACH_BUSINESS_ADDRESS",
                "a physical business address is required".into(),
            ));
        }

        for (key, expr) in [
            ("OUTREACH_EMAIL_CRON", &self.schedule.email_cron),
            ("OUTREACH_CALL_CRON", &self.schedule.call_cron),
        ] {
            cron::Schedule::from_str(expr)
                .map_err(|e| invalid(key, format!("invalid cron expression '{expr}': {e}")))?;
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("OUTREACH_RETRY_ATTEMPTS", "must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("OUTREACH_BREAKER_THRESHOLD", "must be at least 1".into()));
        }

        Ok(())
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_time(key: &str) -> Option<NaiveTime> {
    std::env::var(key)
        .ok()
        .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok())
}
