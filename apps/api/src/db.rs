use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id            UUID PRIMARY KEY,
        action        TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id   TEXT NOT NULL,
        initiated_by  TEXT NOT NULL,
        reason        TEXT NOT NULL,
        agent_name    TEXT NOT NULL,
        before_state  JSONB,
        after_state   JSONB,
        metadata      JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS audit_events_resource_idx ON audit_events (resource_type, resource_id)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        name       TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Creates the service's tables if they do not exist yet.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = MIGRATIONS.len(), "Database schema is up to date");
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Sync cursors
// ────────────────────────────────────────────────────────────────────────────

/// Cursor names in `sync_cursors`.
pub mod cursors {
    pub const GMAIL_HISTORY: &str = "gmail_history_id";

    pub fn airtable_webhook(webhook_id: &str) -> String {
        format!("airtable_webhook:{webhook_id}")
    }
}

/// Named positions in external change feeds.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>, sqlx::Error>;

    async fn set(&self, name: &str, value: &str) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, name: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT value FROM sync_cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (name, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        info!(cursor = name, value, "Stored sync cursor");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_names() {
        assert_eq!(cursors::airtable_webhook("ach1"), "airtable_webhook:ach1");
    }

    #[test]
    fn test_migrations_are_idempotent_ddl() {
        assert!(MIGRATIONS.iter().all(|m| m.contains("IF NOT EXISTS")));
    }
}
