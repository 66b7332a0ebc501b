//! Rate/cooldown policy — pure eligibility decisions.
//!
//! No I/O here. The orchestrator gathers counters from the store and the
//! in-memory rate state and asks `is_eligible` for a verdict.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::Serialize;

use crate::leads::{Channel, Lead};

/// Why a lead was not eligible. Rules are checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    OptedOut,
    Undeliverable,
    Unverified,
    Cooldown,
    CapReached,
    DomainThrottled,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::Undeliverable => "undeliverable",
            Self::Unverified => "unverified",
            Self::Cooldown => "cooldown",
            Self::CapReached => "cap_reached",
            Self::DomainThrottled => "domain_throttled",
        }
    }
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy verdict for one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    fn ok() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    fn denied(reason: IneligibleReason) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
        }
    }
}

/// Everything the policy needs to decide, supplied by the caller.
pub struct PolicyInput<'a> {
    pub lead: &'a Lead,
    pub channel: Channel,
    pub now: DateTime<Utc>,
    pub daily_remaining: i64,
    pub cooldown_days: u32,
    /// Email attempts per domain in the trailing hour.
    pub domain_counts: &'a HashMap<String, u32>,
    pub per_domain_limit: u32,
}

/// Decide whether `input.lead` may be contacted now. First failing rule wins.
pub fn is_eligible(input: &PolicyInput<'_>) -> Eligibility {
    let lead = input.lead;

    if lead.opted_out {
        return Eligibility::denied(IneligibleReason::OptedOut);
    }
    if lead.undeliverable {
        return Eligibility::denied(IneligibleReason::Undeliverable);
    }
    if !lead.is_reachable_on(input.channel) {
        return Eligibility::denied(IneligibleReason::Unverified);
    }
    if let Some(last) = lead.last_contacted_at
        && input.now - last < chrono::Duration::days(i64::from(input.cooldown_days))
    {
        return Eligibility::denied(IneligibleReason::Cooldown);
    }
    if input.daily_remaining <= 0 {
        return Eligibility::denied(IneligibleReason::CapReached);
    }
    if input.channel == Channel::Email
        && let Some(domain) = lead.email_domain()
        && input.domain_counts.get(&domain).copied().unwrap_or(0) >= input.per_domain_limit
    {
        return Eligibility::denied(IneligibleReason::DomainThrottled);
    }

    Eligibility::ok()
}

/// Order candidates never-contacted first, then least recently contacted.
pub fn prioritize(leads: &mut [Lead]) {
    leads.sort_by(|a, b| match (a.last_contacted_at, b.last_contacted_at) {
        (None, None) => a.created_at.cmp(&b.created_at),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    });
}

// ── Call window ─────────────────────────────────────────────────────

/// Time-of-day window (UTC) in which calls may be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub weekdays_only: bool,
}

impl Default for CallWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            weekdays_only: true,
        }
    }
}

impl CallWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if self.weekdays_only && matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = at.time();
        t >= self.start && t < self.end
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn lead() -> Lead {
        Lead::new("Rosa's Bakery", "Portland", "bakery").with_verified_email("hello@rosas.test")
    }

    fn check(lead: &Lead, remaining: i64, counts: &HashMap<String, u32>) -> Eligibility {
        is_eligible(&PolicyInput {
            lead,
            channel: Channel::Email,
            now: now(),
            daily_remaining: remaining,
            cooldown_days: 30,
            domain_counts: counts,
            per_domain_limit: 5,
        })
    }

    #[test]
    fn fresh_verified_lead_is_eligible() {
        let verdict = check(&lead(), 10, &HashMap::new());
        assert!(verdict.eligible);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn opted_out_wins_over_every_other_rule() {
        let mut l = lead();
        l.opted_out = true;
        l.email_verified = false;
        l.last_contacted_at = Some(now());
        let verdict = check(&l, 0, &HashMap::new());
        assert_eq!(verdict.reason, Some(IneligibleReason::OptedOut));
    }

    #[test]
    fn undeliverable_excluded() {
        let mut l = lead();
        l.undeliverable = true;
        assert_eq!(
            check(&l, 10, &HashMap::new()).reason,
            Some(IneligibleReason::Undeliverable)
        );
    }

    #[test]
    fn unverified_or_missing_contact() {
        let mut l = lead();
        l.email_verified = false;
        assert_eq!(
            check(&l, 10, &HashMap::new()).reason,
            Some(IneligibleReason::Unverified)
        );

        let call_lead = lead();
        let verdict = is_eligible(&PolicyInput {
            lead: &call_lead,
            channel: Channel::Call,
            now: now(),
            daily_remaining: 10,
            cooldown_days: 30,
            domain_counts: &HashMap::new(),
            per_domain_limit: 5,
        });
        assert_eq!(verdict.reason, Some(IneligibleReason::Unverified));
    }

    #[test]
    fn cooldown_boundary() {
        let mut l = lead();
        l.last_contacted_at = Some(now() - chrono::Duration::days(29));
        assert_eq!(
            check(&l, 10, &HashMap::new()).reason,
            Some(IneligibleReason::Cooldown)
        );

        l.last_contacted_at = Some(now() - chrono::Duration::days(30));
        assert!(check(&l, 10, &HashMap::new()).eligible);
    }

    #[test]
    fn cap_checked_after_cooldown() {
        assert_eq!(
            check(&lead(), 0, &HashMap::new()).reason,
            Some(IneligibleReason::CapReached)
        );

        let mut cooling = lead();
        cooling.last_contacted_at = Some(now());
        assert_eq!(
            check(&cooling, 0, &HashMap::new()).reason,
            Some(IneligibleReason::Cooldown)
        );
    }

    #[test]
    fn domain_throttle_at_limit() {
        let mut counts = HashMap::new();
        counts.insert("rosas.test".to_string(), 4);
        assert!(check(&lead(), 10, &counts).eligible);

        counts.insert("rosas.test".to_string(), 5);
        assert_eq!(
            check(&lead(), 10, &counts).reason,
            Some(IneligibleReason::DomainThrottled)
        );
    }

    #[test]
    fn never_contacted_first() {
        let mut a = lead();
        a.last_contacted_at = Some(now() - chrono::Duration::days(90));
        let mut b = lead();
        b.last_contacted_at = Some(now() - chrono::Duration::days(60));
        let c = lead();
        let c_id = c.id;
        let a_id = a.id;

        let mut leads = vec![b, a, c];
        prioritize(&mut leads);
        assert_eq!(leads[0].id, c_id);
        assert_eq!(leads[1].id, a_id);
    }

    #[test]
    fn call_window_weekdays() {
        let window = CallWindow::default();
        // 2026-03-10 is a Tuesday.
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 3, 10, 11, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 3, 10, 17, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap()));
        // Saturday.
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()));
    }
}
