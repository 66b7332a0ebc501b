//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                business_name TEXT NOT NULL,
                city TEXT NOT NULL,
                category TEXT NOT NULL,
                website TEXT,
                primary_email TEXT,
                primary_phone TEXT,
                email_verified INTEGER NOT NULL DEFAULT 0,
                phone_verified INTEGER NOT NULL DEFAULT 0,
                verification_confidence REAL NOT NULL DEFAULT 0,
                opted_out INTEGER NOT NULL DEFAULT 0,
                opted_out_at TEXT,
                opted_out_method TEXT,
                undeliverable INTEGER NOT NULL DEFAULT 0,
                last_contacted_at TEXT,
                contact_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(primary_email);
            CREATE INDEX IF NOT EXISTS idx_leads_phone ON leads(primary_phone);
            CREATE INDEX IF NOT EXISTS idx_leads_last_contacted ON leads(last_contacted_at);

            CREATE TABLE IF NOT EXISTS opt_outs (
                id TEXT PRIMARY KEY,
                contact TEXT NOT NULL UNIQUE,
                contact_kind TEXT NOT NULL,
                method TEXT NOT NULL,
                source_lead_id TEXT,
                opted_out_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                subject TEXT NOT NULL,
                html_body TEXT NOT NULL,
                text_body TEXT NOT NULL,
                method TEXT NOT NULL,
                unsubscribe_token TEXT NOT NULL,
                unsubscribe_url TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_lead ON messages(lead_id);

            CREATE TABLE IF NOT EXISTS unsubscribe_tokens (
                token TEXT PRIMARY KEY,
                contact TEXT NOT NULL,
                contact_kind TEXT NOT NULL,
                lead_id TEXT,
                message_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outreach_attempts (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                campaign_id TEXT,
                channel TEXT NOT NULL,
                message_id TEXT,
                content_hash TEXT,
                recipient_domain TEXT,
                status TEXT NOT NULL,
                provider TEXT,
                provider_message_id TEXT,
                provider_response TEXT,
                error TEXT,
                dry_run INTEGER NOT NULL DEFAULT 0,
                attempted_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_channel_time ON outreach_attempts(channel, attempted_at);
            CREATE INDEX IF NOT EXISTS idx_attempts_lead ON outreach_attempts(lead_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_campaign ON outreach_attempts(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_provider_id ON outreach_attempts(provider_message_id);

            CREATE TABLE IF NOT EXISTS attempt_corrections (
                id TEXT PRIMARY KEY,
                attempt_id TEXT NOT NULL REFERENCES outreach_attempts(id),
                event TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_corrections_attempt ON attempt_corrections(attempt_id);

            CREATE TABLE IF NOT EXISTS approval_items (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewer TEXT,
                reviewed_at TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_approval_status ON approval_items(status);

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                dry_run INTEGER NOT NULL,
                approval_mode INTEGER NOT NULL,
                total_selected INTEGER NOT NULL DEFAULT 0,
                total_attempted INTEGER NOT NULL DEFAULT 0,
                total_success INTEGER NOT NULL DEFAULT 0,
                total_failed INTEGER NOT NULL DEFAULT 0,
                total_skipped INTEGER NOT NULL DEFAULT 0,
                total_queued INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                halt_reason TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_channel_started ON campaigns(channel, started_at);

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                level TEXT NOT NULL,
                component TEXT NOT NULL,
                action TEXT NOT NULL,
                lead_id TEXT,
                actor TEXT,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "consent_guards",
        sql: r#"
            CREATE TRIGGER IF NOT EXISTS opt_outs_no_delete
            BEFORE DELETE ON opt_outs
            BEGIN
                SELECT RAISE(ABORT, 'opt-out records are permanent');
            END;

            CREATE TRIGGER IF NOT EXISTS opt_outs_no_update
            BEFORE UPDATE ON opt_outs
            BEGIN
                SELECT RAISE(ABORT, 'opt-out records are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS leads_opt_out_one_way
            BEFORE UPDATE OF opted_out ON leads
            WHEN OLD.opted_out = 1 AND NEW.opted_out = 0
            BEGIN
                SELECT RAISE(ABORT, 'opted_out cannot be reset');
            END;

            CREATE TRIGGER IF NOT EXISTS leads_undeliverable_one_way
            BEFORE UPDATE OF undeliverable ON leads
            WHEN OLD.undeliverable = 1 AND NEW.undeliverable = 0
            BEGIN
                SELECT RAISE(ABORT, 'undeliverable cannot be reset');
            END;
        "#,
    },
    Migration {
        version: 3,
        name: "skip_reasons_and_verified_at",
        sql: r#"
            ALTER TABLE campaigns ADD COLUMN skipped_by_reason TEXT NOT NULL DEFAULT '{}';
            ALTER TABLE leads ADD COLUMN verified_at TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record V{version}: {e}")))?;
    Ok(())
}
