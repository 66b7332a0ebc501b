use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use outreach_engine::approval::ApprovalGate;
use outreach_engine::campaign::{
    CampaignScheduler, CampaignServices, EngineState, Orchestrator, spawn_campaign_ticker,
};
use outreach_engine::compliance::{AuditLogger, OptOutRegistry};
use outreach_engine::config::EngineConfig;
use outreach_engine::content::{AiConfig, ContentPipeline, create_generator};
use outreach_engine::delivery::{
    DeliveryGateway, EmailTransport, SendGridConfig, SendGridTransport, SmtpConfig,
    SmtpEmailTransport, TwilioCallTransport, TwilioConfig,
};
use outreach_engine::leads::Channel;
use outreach_engine::notify::{EmailReportSink, LogReportSink, Notifier, ReportSink, TracingNotifier};
use outreach_engine::resilience::{BreakerRegistry, BreakerState};
use outreach_engine::store::{Database, LibSqlBackend};
use outreach_engine::verification::{AbstractApiEmailVerifier, VerificationService};

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);
/// Leads verified per housekeeping pass.
const VERIFY_BATCH: u32 = 200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Optional rolling file log next to stderr
    let (file_layer, _log_guard) = match std::env::var("OUTREACH_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "outreach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let config = EngineConfig::from_env().context("invalid configuration")?;

    eprintln!("📨 Outreach Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Mode: {}{}",
        if config.campaign.dry_run { "DRY RUN" } else { "LIVE" },
        if config.campaign.approval_mode { " + approval" } else { "" }
    );

    // ── Database ─────────────────────────────────────────────────────────
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    db.init_schema().await.context("running migrations")?;

    // ── Shared state ─────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let breakers = Arc::new(BreakerRegistry::new(
        config.breaker.clone(),
        config.retry.clone(),
        notifier.clone(),
    ));
    let state = EngineState::new(breakers.clone());
    let audit = AuditLogger::new(db.clone());
    let opt_outs = OptOutRegistry::new(db.clone(), audit.clone());

    // ── Verification ─────────────────────────────────────────────────────
    let mut verifier =
        VerificationService::new(db.clone(), breakers.clone(), config.verification.clone());
    if let Some(abstract_api) = AbstractApiEmailVerifier::from_env() {
        eprintln!("   Verification: AbstractAPI");
        verifier = verifier.with_email_verifier(Arc::new(abstract_api));
    }
    let verifier = Arc::new(verifier);

    // ── Content ──────────────────────────────────────────────────────────
    let generator = match AiConfig::from_env(&config.compliance.sender_name)? {
        Some(ai) => {
            eprintln!("   AI: {:?} ({})", ai.backend, ai.model);
            Some(create_generator(&ai)?)
        }
        None => {
            eprintln!("   AI: disabled (template only)");
            None
        }
    };
    let pipeline = Arc::new(ContentPipeline::new(
        db.clone(),
        breakers.clone(),
        generator,
        config.compliance.clone(),
        config.ai_timeout,
    ));

    // ── Delivery ─────────────────────────────────────────────────────────
    let mut gateway = DeliveryGateway::new(breakers.clone(), config.compliance.clone());
    let mut report_transport: Option<Arc<dyn EmailTransport>> = None;
    if let Some(smtp) = SmtpConfig::from_env() {
        let transport: Arc<dyn EmailTransport> = Arc::new(SmtpEmailTransport::new(&smtp)?);
        eprintln!("   Email: SMTP {}:{}", smtp.host, smtp.port);
        report_transport.get_or_insert(transport.clone());
        gateway = gateway.with_email_transport(transport);
    }
    if let Some(sendgrid) = SendGridConfig::from_env() {
        let transport: Arc<dyn EmailTransport> = Arc::new(SendGridTransport::new(sendgrid));
        eprintln!("   Email: SendGrid");
        report_transport.get_or_insert(transport.clone());
        gateway = gateway.with_email_transport(transport);
    }
    if let Some(twilio) = TwilioConfig::from_env() {
        eprintln!("   Calls: Twilio");
        gateway = gateway.with_call_transport(Arc::new(TwilioCallTransport::new(twilio)));
    }

    let reports: Arc<dyn ReportSink> = match (report_transport, &config.operator_email) {
        (Some(transport), Some(to)) => Arc::new(EmailReportSink::new(
            transport,
            config.compliance.sender_email.clone(),
            to.clone(),
        )),
        _ => Arc::new(LogReportSink),
    };

    // ── Approval queue ───────────────────────────────────────────────────
    let approvals = ApprovalGate::new(
        db.clone(),
        audit.clone(),
        config.compliance.clone(),
        config.approval_expiry_days,
    );
    let loaded = approvals.load().await?;
    eprintln!("   Approval queue: {} items", loaded);

    let orchestrator = Arc::new(Orchestrator::new(
        CampaignServices {
            db: db.clone(),
            state,
            pipeline,
            gateway: Arc::new(gateway),
            approvals: approvals.clone(),
            opt_outs,
            audit: audit.clone(),
            notifier,
            reports,
        },
        config.campaign.clone(),
    ));

    // `once <email|call>` runs a single campaign and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [mode, channel] = args.as_slice()
        && mode == "once"
    {
        let channel: Channel = channel
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        verifier.verify_pending(VERIFY_BATCH).await?;
        let report = orchestrator.run(channel).await?;
        println!("{}", report.summary_text());
        // Let the report sink finish
        tokio::time::sleep(Duration::from_millis(500)).await;
        return Ok(());
    }

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = CampaignScheduler::new(orchestrator, db.clone(), &config.schedule)?;
    let _ticker = spawn_campaign_ticker(scheduler, TICK_INTERVAL);
    eprintln!(
        "   Schedule: email '{}', call '{}'",
        config.schedule.email_cron, config.schedule.call_cron
    );

    let retention = config.audit_retention_days;
    let _housekeeping = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = verifier.verify_pending(VERIFY_BATCH).await {
                tracing::warn!(error = %e, "Verification sweep failed");
            }
            for snap in breakers.snapshots() {
                if snap.state != BreakerState::Closed {
                    tracing::warn!(
                        provider = %snap.provider,
                        state = %snap.state,
                        failures = snap.failures,
                        "Circuit not closed"
                    );
                }
            }
            if let Err(e) = approvals.expire_stale().await {
                tracing::warn!(error = %e, "Approval expiry sweep failed");
            }
            if let Err(e) = audit.purge_older_than(retention).await {
                tracing::warn!(error = %e, "Audit purge failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
