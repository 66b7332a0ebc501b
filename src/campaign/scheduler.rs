//! Cron trigger — at most one run per channel per UTC day.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::orchestrator::Orchestrator;
use crate::config::ScheduleConfig;
use crate::error::{CampaignError, ConfigError};
use crate::leads::Channel;
use crate::store::Database;

/// Next fire time of a six-field cron expression after `after`.
pub fn next_fire(schedule: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, String> {
    let schedule = cron::Schedule::from_str(schedule).map_err(|e| format!("invalid cron: {e}"))?;
    Ok(schedule.after(&after).next())
}

struct ChannelSchedule {
    channel: Channel,
    schedule: cron::Schedule,
    next: Option<DateTime<Utc>>,
}

pub struct CampaignScheduler {
    orchestrator: Arc<Orchestrator>,
    db: Arc<dyn Database>,
    entries: Vec<ChannelSchedule>,
}

impl CampaignScheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        db: Arc<dyn Database>,
        config: &ScheduleConfig,
    ) -> Result<Self, ConfigError> {
        let now = Utc::now();
        let mut entries = Vec::new();
        for (channel, key, expr) in [
            (Channel::Email, "OUTREACH_EMAIL_CRON", &config.email_cron),
            (Channel::Call, "OUTREACH_CALL_CRON", &config.call_cron),
        ] {
            let schedule =
                cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("invalid cron expression '{expr}': {e}"),
                })?;
            let next = schedule.after(&now).next();
            entries.push(ChannelSchedule {
                channel,
                schedule,
                next,
            });
        }
        Ok(Self {
            orchestrator,
            db,
            entries,
        })
    }

    /// Whether `channel` already ran on the UTC calendar day of `now`.
    pub async fn ran_today(&self, channel: Channel, now: DateTime<Utc>) -> bool {
        match self.db.latest_campaign(channel).await {
            Ok(Some(last)) => last.started_at.date_naive() == now.date_naive(),
            Ok(None) => false,
            Err(e) => {
                // Unknown history: do not risk a second run.
                error!(%channel, error = %e, "Could not read campaign history");
                true
            }
        }
    }

    /// Fire every due channel. Returns the channels that ran.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<Channel> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next.is_some_and(|at| at <= now) {
                entry.next = entry.schedule.after(&now).next();
                due.push(entry.channel);
            }
        }

        let mut ran = Vec::new();
        for channel in due {
            if self.ran_today(channel, now).await {
                debug!(%channel, "Already ran today, skipping scheduled run");
                continue;
            }
            match self.orchestrator.run(channel).await {
                Ok(report) => {
                    info!(
                        %channel,
                        campaign_id = %report.campaign_id,
                        status = %report.status,
                        "Scheduled campaign finished"
                    );
                    ran.push(channel);
                }
                Err(CampaignError::AlreadyRunning(_)) => {
                    debug!(%channel, "Run in progress, skipping scheduled run");
                }
                Err(e) => error!(%channel, error = %e, "Scheduled campaign did not start"),
            }
        }
        ran
    }
}

/// Spawn the scheduler background task.
pub fn spawn_campaign_ticker(
    mut scheduler: CampaignScheduler,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            scheduler.tick(Utc::now()).await;
        }
    })
}
