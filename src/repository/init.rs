//! Startup schema provisioning.
//!
//! Creates the five tables and the fixed index set if they do not exist.
//! Every production query is tenant-scoped, so `tenant_id` leads each
//! compound index.

use diesel_async::SimpleAsyncConnection;

use super::pool::{DbPool, DieselError};
use crate::with_conn_split;

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    tenant_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    customer_id TEXT NOT NULL,
    source TEXT NOT NULL,
    subject TEXT NOT NULL,
    message TEXT NOT NULL,
    status TEXT NOT NULL,
    urgency TEXT NOT NULL,
    sentiment TEXT NOT NULL,
    requires_action INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (tenant_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_created
    ON tickets (tenant_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_status_created
    ON tickets (tenant_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_urgency_created
    ON tickets (tenant_id, urgency, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_deleted
    ON tickets (tenant_id, deleted_at);
CREATE INDEX IF NOT EXISTS idx_tickets_stats
    ON tickets (tenant_id, deleted_at, created_at DESC, status, urgency);

CREATE TABLE IF NOT EXISTS ingestion_jobs (
    job_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    total_pages INTEGER,
    processed_pages INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status
    ON ingestion_jobs (tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_jobs_started
    ON ingestion_jobs (started_at DESC);

CREATE TABLE IF NOT EXISTS ingestion_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    new_ingested INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_tenant_started
    ON ingestion_logs (tenant_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_logs_job
    ON ingestion_logs (job_id);

CREATE TABLE IF NOT EXISTS ticket_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    action TEXT NOT NULL,
    changes TEXT NOT NULL DEFAULT '{}',
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_ticket_recorded
    ON ticket_history (ticket_id, recorded_at DESC);
CREATE INDEX IF NOT EXISTS idx_history_tenant_recorded
    ON ticket_history (tenant_id, recorded_at DESC);

CREATE TABLE IF NOT EXISTS distributed_locks (
    resource_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_locks_expires
    ON distributed_locks (expires_at);
"#;

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    tenant_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    customer_id TEXT NOT NULL,
    source TEXT NOT NULL,
    subject TEXT NOT NULL,
    message TEXT NOT NULL,
    status TEXT NOT NULL,
    urgency TEXT NOT NULL,
    sentiment TEXT NOT NULL,
    requires_action BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (tenant_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_created
    ON tickets (tenant_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_status_created
    ON tickets (tenant_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_urgency_created
    ON tickets (tenant_id, urgency, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_tenant_deleted
    ON tickets (tenant_id, deleted_at);
CREATE INDEX IF NOT EXISTS idx_tickets_stats
    ON tickets (tenant_id, deleted_at, created_at DESC, status, urgency);

CREATE TABLE IF NOT EXISTS ingestion_jobs (
    job_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    total_pages INTEGER,
    processed_pages INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status
    ON ingestion_jobs (tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_jobs_started
    ON ingestion_jobs (started_at DESC);

CREATE TABLE IF NOT EXISTS ingestion_logs (
    id SERIAL PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    new_ingested INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_tenant_started
    ON ingestion_logs (tenant_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_logs_job
    ON ingestion_logs (job_id);

CREATE TABLE IF NOT EXISTS ticket_history (
    id SERIAL PRIMARY KEY,
    ticket_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    action TEXT NOT NULL,
    changes TEXT NOT NULL DEFAULT '{}',
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_ticket_recorded
    ON ticket_history (ticket_id, recorded_at DESC);
CREATE INDEX IF NOT EXISTS idx_history_tenant_recorded
    ON ticket_history (tenant_id, recorded_at DESC);

CREATE TABLE IF NOT EXISTS distributed_locks (
    resource_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_locks_expires
    ON distributed_locks (expires_at);
"#;

/// Create tables and indexes if missing. Called once at startup, before the
/// server accepts traffic.
pub async fn provision_schema(pool: &DbPool) -> Result<(), DieselError> {
    with_conn_split!(pool,
        sqlite: conn => {
            conn.batch_execute(SQLITE_SCHEMA).await?;
            Ok(())
        },
        postgres: conn => {
            conn.batch_execute(POSTGRES_SCHEMA).await?;
            Ok(())
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_url(dir.path().join("test.db").to_str().unwrap(), 1).unwrap();

        provision_schema(&pool).await.unwrap();
        provision_schema(&pool).await.unwrap();
        pool.ping().await.unwrap();
    }
}
