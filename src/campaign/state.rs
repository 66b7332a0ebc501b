//! Shared engine state: rate counters, run guards, and the halt switch.
//!
//! Constructed once and handed to the orchestrator. Tests build a fresh
//! `EngineState` per case.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::policy::IneligibleReason;
use crate::leads::Channel;
use crate::resilience::BreakerRegistry;

// ── Rate state ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ChannelWindow {
    /// Attempt timestamps in the trailing 24 hours.
    day: VecDeque<DateTime<Utc>>,
    /// Attempt timestamps per recipient domain in the trailing hour.
    domains: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl ChannelWindow {
    fn prune(&mut self, now: DateTime<Utc>) {
        let day_cutoff = now - Duration::hours(24);
        while self.day.front().is_some_and(|t| *t <= day_cutoff) {
            self.day.pop_front();
        }
        let hour_cutoff = now - Duration::hours(1);
        self.domains.retain(|_, times| {
            while times.front().is_some_and(|t| *t <= hour_cutoff) {
                times.pop_front();
            }
            !times.is_empty()
        });
    }

    fn push(&mut self, at: DateTime<Utc>, domain: Option<&str>) {
        self.day.push_back(at);
        if let Some(d) = domain {
            self.domains.entry(d.to_string()).or_default().push_back(at);
        }
    }
}

/// Authoritative rolling counters for the daily cap and per-domain window.
///
/// Seeded from persisted attempts on first use per channel. Afterwards every
/// attempt this process creates goes through `try_acquire`, so check and
/// increment happen under one lock.
#[derive(Debug, Default)]
pub struct RateState {
    windows: Mutex<HashMap<Channel, ChannelWindow>>,
    seeded: Mutex<HashSet<Channel>>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    fn windows(&self) -> std::sync::MutexGuard<'_, HashMap<Channel, ChannelWindow>> {
        self.windows.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_seeded(&self, channel: Channel) -> bool {
        self.seeded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&channel)
    }

    /// Load past attempts `(attempted_at, recipient_domain)`. Ignored if the
    /// channel is already seeded.
    pub fn seed(&self, channel: Channel, attempts: Vec<(DateTime<Utc>, Option<String>)>) {
        let mut seeded = self.seeded.lock().unwrap_or_else(|p| p.into_inner());
        if !seeded.insert(channel) {
            return;
        }
        let mut windows = self.windows();
        let window = windows.entry(channel).or_default();
        let mut sorted = attempts;
        sorted.sort_by_key(|(at, _)| *at);
        for (at, domain) in sorted {
            window.push(at, domain.as_deref());
        }
        debug!(%channel, count = window.day.len(), "Rate state seeded");
    }

    /// Slots left under `cap` for the trailing 24 hours.
    pub fn remaining(&self, channel: Channel, cap: u32, now: DateTime<Utc>) -> i64 {
        let mut windows = self.windows();
        let window = windows.entry(channel).or_default();
        window.prune(now);
        i64::from(cap) - window.day.len() as i64
    }

    /// Attempts per domain in the trailing hour.
    pub fn domain_counts(&self, channel: Channel, now: DateTime<Utc>) -> HashMap<String, u32> {
        let mut windows = self.windows();
        let window = windows.entry(channel).or_default();
        window.prune(now);
        window
            .domains
            .iter()
            .map(|(d, times)| (d.clone(), times.len() as u32))
            .collect()
    }

    /// Atomically check both limits and, if they pass, record one attempt.
    pub fn try_acquire(
        &self,
        channel: Channel,
        domain: Option<&str>,
        cap: u32,
        per_domain_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<(), IneligibleReason> {
        let mut windows = self.windows();
        let window = windows.entry(channel).or_default();
        window.prune(now);

        if window.day.len() as u64 >= u64::from(cap) {
            return Err(IneligibleReason::CapReached);
        }
        if let Some(d) = domain
            && window.domains.get(d).map_or(0, |t| t.len()) as u64 >= u64::from(per_domain_limit)
        {
            return Err(IneligibleReason::DomainThrottled);
        }
        window.push(now, domain);
        Ok(())
    }
}

// ── Run guard ───────────────────────────────────────────────────────

/// Tracks which channels have a run in progress.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    running: Arc<Mutex<HashSet<Channel>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `channel`. `None` if a run is already in progress.
    pub fn try_start(&self, channel: Channel) -> Option<RunGuard> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if !running.insert(channel) {
            warn!(%channel, "Campaign already running, refusing overlap");
            return None;
        }
        Some(RunGuard {
            channel,
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self, channel: Channel) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&channel)
    }
}

/// Releases the channel when dropped.
#[derive(Debug)]
pub struct RunGuard {
    channel: Channel,
    running: Arc<Mutex<HashSet<Channel>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.channel);
    }
}

// ── Halt switch ─────────────────────────────────────────────────────

/// Operator "halt all outreach". Checked before every gateway call.
#[derive(Debug, Clone, Default)]
pub struct HaltSwitch(Arc<AtomicBool>);

impl HaltSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        warn!("Outreach halted by operator");
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Engine state ────────────────────────────────────────────────────

/// Process-wide mutable state, owned explicitly rather than as globals.
pub struct EngineState {
    pub breakers: Arc<BreakerRegistry>,
    pub rate: RateState,
    pub runs: RunRegistry,
    pub halt: HaltSwitch,
}

impl EngineState {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            breakers,
            rate: RateState::new(),
            runs: RunRegistry::new(),
            halt: HaltSwitch::new(),
        })
    }
}
