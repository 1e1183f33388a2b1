//! Schema creation. Every statement is idempotent, so `chatarc init` can be
//! run repeatedly.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS exports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        name TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        digest TEXT NOT NULL UNIQUE,
        imported_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS servers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scope INTEGER NOT NULL,
        name TEXT NOT NULL,
        UNIQUE(scope, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS channels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scope INTEGER NOT NULL,
        server_id INTEGER NOT NULL,
        external_id TEXT NOT NULL,
        name TEXT NOT NULL,
        UNIQUE(scope, external_id),
        FOREIGN KEY (server_id) REFERENCES servers(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scope INTEGER NOT NULL,
        external_id TEXT NOT NULL,
        name TEXT NOT NULL,
        UNIQUE(scope, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        export_id INTEGER NOT NULL,
        server_id INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        external_id TEXT NOT NULL UNIQUE,
        timestamp_ms INTEGER NOT NULL,
        body TEXT NOT NULL,
        attachments_json TEXT,
        FOREIGN KEY (export_id) REFERENCES exports(id),
        FOREIGN KEY (server_id) REFERENCES servers(id),
        FOREIGN KEY (channel_id) REFERENCES channels(id),
        FOREIGN KEY (user_id) REFERENCES users(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_channel_ts ON messages(channel_id, timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_messages_user_ts ON messages(user_id, timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_messages_server_ts ON messages(server_id, timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_channels_server ON channels(server_id)",
];

/// Create all tables and indexes on an open pool.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    tracing::info!(path = %config.db.path.display(), "schema ready");
    pool.close().await;
    Ok(())
}
