//! End-to-end campaign runs against an in-memory store and stub transports.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use outreach_engine::approval::{ApprovalGate, ApprovalStatus, Decision};
use outreach_engine::campaign::{
    AttemptStatus, CampaignPhase, CampaignScheduler, CampaignServices, EngineState, HaltSwitch,
    LeadOutcome, Orchestrator,
};
use outreach_engine::compliance::{AuditLogger, OptOutMethod, OptOutRegistry};
use outreach_engine::config::{CampaignSettings, ComplianceConfig, ScheduleConfig};
use outreach_engine::content::{AiGenerator, ContentPipeline, GenerationMethod};
use outreach_engine::delivery::{DeliveryGateway, EmailTransport, OutboundEmail, TransportReceipt};
use outreach_engine::error::ProviderError;
use outreach_engine::leads::{Channel, ContactKind, Lead};
use outreach_engine::notify::{LogReportSink, Notifier, Severity};
use outreach_engine::resilience::{BreakerConfig, BreakerRegistry, RetryPolicy};
use outreach_engine::store::{Database, LibSqlBackend};

// ── Stub transport ──────────────────────────────────────────────────

#[derive(Default)]
struct StubTransport {
    /// Every call, including retries.
    calls: Mutex<Vec<String>>,
    /// Recipients that get HTTP 500.
    failing: HashSet<String>,
    fail_all: bool,
    /// Answer every send with HTTP 401.
    reject_credentials: bool,
    /// Contacts opted out during the first send.
    opt_out_on_first_send: Mutex<Option<(Arc<OptOutRegistry>, Vec<String>)>>,
    /// Operator switch tripped during the first send.
    halt_on_first_send: Mutex<Option<HaltSwitch>>,
}

impl StubTransport {
    fn calls_to(&self, to: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == to).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_to_domain(&self, domain: &str) -> usize {
        let suffix = format!("@{domain}");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.ends_with(&suffix))
            .count()
    }
}

#[async_trait]
impl EmailTransport for StubTransport {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send_email(&self, email: &OutboundEmail) -> Result<TransportReceipt, ProviderError> {
        self.calls.lock().unwrap().push(email.to.clone());

        let hook = self.opt_out_on_first_send.lock().unwrap().take();
        if let Some((registry, contacts)) = hook {
            for contact in contacts {
                registry
                    .record(ContactKind::Email, &contact, OptOutMethod::ReplyKeyword, None)
                    .await
                    .unwrap();
            }
        }

        if let Some(halt) = self.halt_on_first_send.lock().unwrap().take() {
            halt.halt();
        }

        if self.reject_credentials {
            return Err(ProviderError::Http {
                provider: "stub".into(),
                status: 401,
                body: "invalid api key".into(),
            });
        }
        if self.fail_all || self.failing.contains(&email.to) {
            return Err(ProviderError::Http {
                provider: "stub".into(),
                status: 500,
                body: "upstream error".into(),
            });
        }
        Ok(TransportReceipt {
            provider_message_id: format!("stub-{}", self.total_calls()),
            raw: serde_json::json!({ "accepted": email.to }),
        })
    }
}

// ── Stub generator and notifier ─────────────────────────────────────

/// Writes valid copy that names the business.
struct CopywriterStub;

#[async_trait]
impl AiGenerator for CopywriterStub {
    fn name(&self) -> &str {
        "ai"
    }

    async fn generate(
        &self,
        business_name: &str,
        category: &str,
        city: &str,
    ) -> Result<String, ProviderError> {
        Ok(format!(
            "Subject: A faster website for {business_name}\n\n\
             Hi {business_name} team, people in {city} clearly love your {category} and the \
             reviews say so. We design fast websites with local SEO so that nearby searchers \
             find you first and can see your hours and menu on any phone without waiting. \
             Owners we work with usually see more customers within a few weeks of launch. \
             Would you be open to a short call this week to talk it through and see whether \
             it is a good fit for you and your team?"
        ))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    fn critical(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == Severity::Critical)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn alert(&self, severity: Severity, message: &str, _context: serde_json::Value) {
        self.alerts.lock().unwrap().push((severity, message.to_string()));
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    db: Arc<dyn Database>,
    state: Arc<EngineState>,
    opt_outs: Arc<OptOutRegistry>,
    approvals: Arc<ApprovalGate>,
    notifier: Arc<RecordingNotifier>,
    orchestrator: Arc<Orchestrator>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_ratio: 0.0,
    }
}

fn live_settings() -> CampaignSettings {
    CampaignSettings {
        dry_run: false,
        approval_mode: false,
        daily_email_cap: 100,
        per_domain_limit: 5,
        concurrency: 1,
        ..Default::default()
    }
}

async fn harness(
    settings: CampaignSettings,
    breaker: BreakerConfig,
    transport: Option<Arc<StubTransport>>,
) -> Harness {
    harness_with_generator(settings, breaker, transport, None).await
}

async fn harness_with_generator(
    settings: CampaignSettings,
    breaker: BreakerConfig,
    transport: Option<Arc<StubTransport>>,
    generator: Option<Arc<dyn AiGenerator>>,
) -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let recorder = Arc::new(RecordingNotifier::default());
    let notifier: Arc<dyn Notifier> = recorder.clone();
    let breakers = Arc::new(BreakerRegistry::new(breaker, fast_retry(), notifier.clone()));
    let compliance = ComplianceConfig::default();
    let audit = AuditLogger::new(db.clone());
    let opt_outs = OptOutRegistry::new(db.clone(), audit.clone());
    let approvals = ApprovalGate::new(db.clone(), audit.clone(), compliance.clone(), 7);

    let mut gateway = DeliveryGateway::new(breakers.clone(), compliance.clone());
    if let Some(t) = transport {
        gateway = gateway.with_email_transport(t);
    }

    let state = EngineState::new(breakers.clone());
    let services = CampaignServices {
        db: db.clone(),
        state: state.clone(),
        pipeline: Arc::new(ContentPipeline::new(
            db.clone(),
            breakers,
            generator,
            compliance,
            Duration::from_secs(5),
        )),
        gateway: Arc::new(gateway),
        approvals: approvals.clone(),
        opt_outs: opt_outs.clone(),
        audit,
        notifier,
        reports: Arc::new(LogReportSink),
    };

    Harness {
        db,
        state,
        opt_outs,
        approvals,
        notifier: recorder,
        orchestrator: Arc::new(Orchestrator::new(services, settings)),
    }
}

/// `count` verified leads, each on its own domain.
async fn seed_leads(db: &Arc<dyn Database>, count: usize) -> Vec<Lead> {
    let mut leads = Vec::new();
    for i in 0..count {
        let lead = Lead::new(format!("Shop {i}"), "Portland", "bakery")
            .with_verified_email(&format!("owner@shop{i}.test"));
        db.insert_lead(&lead).await.unwrap();
        leads.push(lead);
    }
    leads
}

/// `count` verified leads sharing `domain`, created one second apart from `start`.
async fn seed_domain_leads(
    db: &Arc<dyn Database>,
    domain: &str,
    count: usize,
    start: chrono::DateTime<Utc>,
) -> Vec<Lead> {
    let mut leads = Vec::new();
    for i in 0..count {
        let mut lead = Lead::new(format!("Branch {i}"), "Portland", "bakery")
            .with_verified_email(&format!("branch{i}@{domain}"));
        lead.created_at = start + chrono::Duration::seconds(i as i64);
        db.insert_lead(&lead).await.unwrap();
        leads.push(lead);
    }
    leads
}

async fn attempts_for(db: &Arc<dyn Database>, leads: &[Lead]) -> usize {
    let mut total = 0;
    for lead in leads {
        total += db.list_attempts_for_lead(lead.id).await.unwrap().len();
    }
    total
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn daily_cap_limits_attempts() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(
        CampaignSettings {
            daily_email_cap: 10,
            ..live_settings()
        },
        BreakerConfig::default(),
        Some(transport.clone()),
    )
    .await;
    let leads = seed_leads(&h.db, 15).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Completed);
    assert_eq!(report.total_attempted, 10);
    assert_eq!(report.total_success, 10);
    assert_eq!(report.total_failed, 0);
    assert!(report.is_consistent());
    assert_eq!(transport.total_calls(), 10);

    let mut untouched = 0;
    for lead in &leads {
        let stored = h.db.get_lead(lead.id).await.unwrap().unwrap();
        if stored.last_contacted_at.is_none() {
            untouched += 1;
            assert!(h.db.list_attempts_for_lead(lead.id).await.unwrap().is_empty());
        }
    }
    assert_eq!(untouched, 5);

    // Allowance is spent for the day.
    let again = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(again.total_selected, 0);
    assert_eq!(transport.total_calls(), 10);
}

#[tokio::test]
async fn transient_failure_on_one_lead_does_not_abort_batch() {
    let failing_to = "owner@shop3.test".to_string();
    let transport = Arc::new(StubTransport {
        failing: HashSet::from([failing_to.clone()]),
        ..Default::default()
    });
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    let leads = seed_leads(&h.db, 10).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Completed);
    assert_eq!(report.total_success, 9);
    assert_eq!(report.total_failed, 1);
    assert_eq!(transport.calls_to(&failing_to), 3);

    let failed = &leads[3];
    let stored = h.db.get_lead(failed.id).await.unwrap().unwrap();
    assert!(!stored.undeliverable);
    assert!(stored.last_contacted_at.is_none());

    let attempts = h.db.list_attempts_for_lead(failed.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Failed);
    assert!(attempts[0].error.is_some());
}

#[tokio::test]
async fn opt_out_after_selection_blocks_send() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    let leads = seed_leads(&h.db, 3).await;
    let contacts = leads
        .iter()
        .filter_map(|l| l.primary_email.clone())
        .collect();
    *transport.opt_out_on_first_send.lock().unwrap() = Some((h.opt_outs.clone(), contacts));

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_selected, 3);
    assert_eq!(report.total_success, 1);
    assert_eq!(report.total_skipped, 2);
    assert_eq!(report.total_attempted, 1);
    assert_eq!(transport.total_calls(), 1);

    let mut skipped_rows = 0;
    for lead in &leads {
        for attempt in h.db.list_attempts_for_lead(lead.id).await.unwrap() {
            if attempt.status == AttemptStatus::Skipped {
                assert_eq!(attempt.error.as_deref(), Some("opted_out"));
                skipped_rows += 1;
            }
        }
    }
    assert_eq!(skipped_rows, 2);
}

#[tokio::test]
async fn opted_out_leads_are_never_attempted() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    let leads = seed_leads(&h.db, 5).await;
    for lead in &leads[..2] {
        h.opt_outs
            .record(
                ContactKind::Email,
                lead.primary_email.as_deref().unwrap(),
                OptOutMethod::Link,
                Some(lead.id),
            )
            .await
            .unwrap();
    }

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_selected, 3);
    assert_eq!(report.total_success, 3);
    for lead in &leads[..2] {
        assert_eq!(transport.calls_to(lead.primary_email.as_deref().unwrap()), 0);
        assert!(h.db.list_attempts_for_lead(lead.id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn dry_run_matches_live_policy_decisions() {
    let live_transport = Arc::new(StubTransport::default());
    let live = harness(live_settings(), BreakerConfig::default(), Some(live_transport.clone())).await;
    seed_leads(&live.db, 3).await;

    let dry = harness(
        CampaignSettings {
            dry_run: true,
            ..live_settings()
        },
        BreakerConfig::default(),
        None,
    )
    .await;
    let dry_leads = seed_leads(&dry.db, 3).await;

    let live_report = live.orchestrator.run(Channel::Email).await.unwrap();
    let dry_report = dry.orchestrator.run(Channel::Email).await.unwrap();

    assert!(dry_report.dry_run);
    assert_eq!(dry_report.status, CampaignPhase::Completed);
    assert_eq!(dry_report.total_selected, 3);
    assert_eq!(dry_report.total_selected, live_report.total_selected);
    assert_eq!(dry_report.total_attempted, live_report.total_attempted);
    assert_eq!(dry_report.total_success, live_report.total_success);

    for lead in &dry_leads {
        let stored = dry.db.get_lead(lead.id).await.unwrap().unwrap();
        assert!(stored.last_contacted_at.is_some());
        assert_eq!(stored.contact_count, 1);
        for attempt in dry.db.list_attempts_for_lead(lead.id).await.unwrap() {
            assert!(attempt.dry_run);
            assert_eq!(attempt.provider.as_deref(), Some("dry_run"));
        }
    }

    // Cooldown holds every lead back on the next run, dry or live.
    let live_again = live.orchestrator.run(Channel::Email).await.unwrap();
    let dry_again = dry.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(live_again.total_selected, 0);
    assert_eq!(dry_again.total_selected, 0);
    assert_eq!(live_transport.total_calls(), 3);
}

#[tokio::test]
async fn open_breaker_halts_remaining_leads() {
    let transport = Arc::new(StubTransport {
        fail_all: true,
        ..Default::default()
    });
    let h = harness(
        live_settings(),
        BreakerConfig {
            failure_threshold: 2,
            cool_down: Duration::from_secs(60),
        },
        Some(transport.clone()),
    )
    .await;
    let leads = seed_leads(&h.db, 5).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Halted);
    assert!(report.halt_reason.as_deref().unwrap().contains("unavailable"));
    // Two leads exhaust their retries, the third fails fast, the rest never start.
    assert_eq!(report.total_failed, 3);
    assert_eq!(report.total_skipped, 2);
    assert!(report.is_consistent());
    assert_eq!(transport.total_calls(), 6);
    assert_eq!(attempts_for(&h.db, &leads).await, 3);

    let stored = h.db.get_campaign(report.campaign_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignPhase::Halted);

    let critical = h.notifier.critical();
    assert!(critical.iter().any(|m| m.contains("campaign halted")));
}

#[tokio::test]
async fn ai_copy_is_sent_with_compliance_footer() {
    let transport = Arc::new(StubTransport::default());
    let h = harness_with_generator(
        live_settings(),
        BreakerConfig::default(),
        Some(transport.clone()),
        Some(Arc::new(CopywriterStub)),
    )
    .await;
    let leads = seed_leads(&h.db, 1).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_success, 1);

    let attempts = h.db.list_attempts_for_lead(leads[0].id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Sent);
    assert_eq!(attempts[0].provider_message_id.as_deref(), Some("stub-1"));

    let message_id = attempts[0].message_id.unwrap();
    let message = h.db.get_message(message_id).await.unwrap().unwrap();
    assert_eq!(message.method, GenerationMethod::Ai);
    assert_eq!(message.subject, "A faster website for Shop 0");
    assert!(message.text_body.contains("Hi Shop 0 team"));
    assert!(message.text_body.contains(&message.unsubscribe_url));
    assert_eq!(Some(message.content_hash.clone()), attempts[0].content_hash);
}

#[tokio::test]
async fn per_domain_limit_is_enforced() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(
        CampaignSettings {
            per_domain_limit: 3,
            ..live_settings()
        },
        BreakerConfig::default(),
        Some(transport.clone()),
    )
    .await;
    for i in 0..6 {
        let lead = Lead::new(format!("Branch {i}"), "Portland", "bakery")
            .with_verified_email(&format!("branch{i}@chain.test"));
        h.db.insert_lead(&lead).await.unwrap();
    }

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_selected, 3);
    assert_eq!(report.total_success, 3);
    assert_eq!(transport.total_calls(), 3);
    assert_eq!(report.total_skipped, 3);
    assert_eq!(report.skipped_by_reason.get("domain_throttled"), Some(&3));

    let stored = h.db.get_campaign(report.campaign_id).await.unwrap().unwrap();
    assert_eq!(stored.skipped_by_reason, report.skipped_by_reason);
    assert!(report.summary_text().contains("domain_throttled: 3"));
}

#[tokio::test]
async fn approval_mode_queues_then_sends_after_sign_off() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(
        CampaignSettings {
            approval_mode: true,
            ..live_settings()
        },
        BreakerConfig::default(),
        Some(transport.clone()),
    )
    .await;
    let leads = seed_leads(&h.db, 2).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_queued, 2);
    assert_eq!(report.total_attempted, 0);
    assert_eq!(transport.total_calls(), 0);

    let pending = h.approvals.pending().await;
    assert_eq!(pending.len(), 2);
    let item = &pending[0];

    // Unapproved items cannot be sent.
    assert!(h.orchestrator.approve_and_send(item.id).await.is_err());

    h.approvals
        .decide(item.id, Decision::Approve, "reviewer@devsync.example")
        .await
        .unwrap();
    let outcome = h.orchestrator.approve_and_send(item.id).await.unwrap();
    assert_eq!(outcome, LeadOutcome::Sent);
    assert_eq!(transport.total_calls(), 1);

    let sent = h.approvals.get(item.id).await.unwrap();
    assert_eq!(sent.status, ApprovalStatus::Sent);
    let lead = h.db.get_lead(item.lead_id).await.unwrap().unwrap();
    assert!(lead.last_contacted_at.is_some());
    assert!(leads.iter().any(|l| l.id == item.lead_id));
}

#[tokio::test]
async fn throttled_domain_ahead_of_eligible_leads_does_not_starve_selection() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(
        CampaignSettings {
            daily_email_cap: 10,
            per_domain_limit: 5,
            ..live_settings()
        },
        BreakerConfig::default(),
        Some(transport.clone()),
    )
    .await;
    let start = Utc::now() - chrono::Duration::days(1);
    seed_domain_leads(&h.db, "chain.test", 30, start).await;
    for i in 0..10 {
        let mut lead = Lead::new(format!("Shop {i}"), "Portland", "bakery")
            .with_verified_email(&format!("owner@shop{i}.test"));
        lead.created_at = start + chrono::Duration::minutes(10 + i);
        h.db.insert_lead(&lead).await.unwrap();
    }

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.total_selected, 10);
    assert_eq!(report.total_success, 10);
    assert_eq!(transport.calls_to_domain("chain.test"), 5);
    assert_eq!(report.skipped_by_reason.get("domain_throttled"), Some(&25));
}

#[tokio::test]
async fn rejected_credentials_halt_without_marking_leads_undeliverable() {
    let transport = Arc::new(StubTransport {
        reject_credentials: true,
        ..Default::default()
    });
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    let leads = seed_leads(&h.db, 3).await;

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Halted);
    assert!(report.halt_reason.as_deref().unwrap().contains("provider rejected request"));
    assert_eq!(report.total_failed, 1);
    assert_eq!(report.skipped_by_reason.get("halted"), Some(&2));
    assert!(report.is_consistent());
    // Credential failures are not retried.
    assert_eq!(transport.total_calls(), 1);

    for lead in &leads {
        let stored = h.db.get_lead(lead.id).await.unwrap().unwrap();
        assert!(!stored.undeliverable);
    }
    assert!(h.notifier.critical().iter().any(|m| m.contains("campaign halted")));
}

#[tokio::test]
async fn operator_halt_mid_run_stops_further_sends() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    let leads = seed_leads(&h.db, 5).await;
    *transport.halt_on_first_send.lock().unwrap() = Some(h.state.halt.clone());

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Halted);
    assert!(report.halt_reason.as_deref().unwrap().contains("operator"));
    assert_eq!(report.total_success, 1);
    assert_eq!(report.total_skipped, 4);
    assert_eq!(transport.total_calls(), 1);
    assert_eq!(attempts_for(&h.db, &leads).await, 1);

    // New runs are refused until the operator resumes.
    assert!(h.orchestrator.run(Channel::Email).await.is_err());
    h.state.halt.resume();
    let resumed = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(resumed.total_success, 4);
}

#[tokio::test]
async fn scheduler_runs_each_channel_at_most_once_per_day() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(live_settings(), BreakerConfig::default(), Some(transport.clone())).await;
    seed_leads(&h.db, 2).await;

    let mut scheduler = CampaignScheduler::new(
        h.orchestrator.clone(),
        h.db.clone(),
        &ScheduleConfig {
            email_cron: "* * * * * *".into(),
            call_cron: "0 0 3 1 1 * 2099".into(),
        },
    )
    .unwrap();

    let now = Utc::now() + chrono::Duration::seconds(2);
    assert!(!scheduler.ran_today(Channel::Email, now).await);
    assert_eq!(scheduler.tick(now).await, vec![Channel::Email]);
    assert_eq!(transport.total_calls(), 2);
    assert!(scheduler.ran_today(Channel::Email, now).await);
    let first = h.db.latest_campaign(Channel::Email).await.unwrap().unwrap();

    // Still due every second, but today's run already happened.
    let later = now + chrono::Duration::seconds(2);
    assert!(scheduler.tick(later).await.is_empty());
    let latest = h.db.latest_campaign(Channel::Email).await.unwrap().unwrap();
    assert_eq!(latest.campaign_id, first.campaign_id);
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn concurrent_processing_respects_cap_and_domain_limit() {
    let transport = Arc::new(StubTransport::default());
    let h = harness(
        CampaignSettings {
            daily_email_cap: 10,
            per_domain_limit: 3,
            concurrency: 8,
            ..live_settings()
        },
        BreakerConfig::default(),
        Some(transport.clone()),
    )
    .await;
    let start = Utc::now() - chrono::Duration::days(1);
    let mut leads = seed_domain_leads(&h.db, "chain.test", 6, start).await;
    leads.extend(seed_leads(&h.db, 14).await);

    let report = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(report.status, CampaignPhase::Completed);
    assert_eq!(report.total_attempted, 10);
    assert_eq!(report.total_success, 10);
    assert!(report.is_consistent());
    assert_eq!(transport.total_calls(), 10);
    assert_eq!(transport.calls_to_domain("chain.test"), 3);
    assert_eq!(attempts_for(&h.db, &leads).await, 10);

    let again = h.orchestrator.run(Channel::Email).await.unwrap();
    assert_eq!(again.total_selected, 0);
    assert_eq!(transport.total_calls(), 10);
}
