//! SQLite-backed [`Store`] implementation.
//!
//! Every create is a single `INSERT ... ON CONFLICT DO NOTHING`; when no row
//! was inserted the existing id is looked up by natural key. Timestamps are
//! stored as UTC epoch milliseconds.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use chat_archive_core::models::{
    Channel, ChannelId, ChannelSummary, Export, ExportId, Message, MessageId, NewExport,
    NewMessage, ResolvedMessage, Scope, Server, ServerId, StoreCounts, User, UserId, UserSummary,
};
use chat_archive_core::store::{CreateOutcome, MessageFilter, MessageSlice, Store};
use chat_archive_core::text::escape_like;

use crate::config::Config;
use crate::db;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.export_id, m.server_id, m.channel_id, m.user_id, m.external_id,
           m.timestamp_ms, m.body, m.attachments_json,
           u.external_id AS user_external_id, u.name AS user_name,
           c.name AS channel_name, s.name AS server_name
    FROM messages m
    JOIN users u ON u.id = m.user_id
    JOIN channels c ON c.id = m.channel_id
    JOIN servers s ON s.id = m.server_id
"#;

const FILTER_WHERE: &str = r#"
    WHERE (? IS NULL OR m.body LIKE ? ESCAPE '\')
      AND (? IS NULL OR m.server_id = ?)
      AND (? IS NULL OR m.channel_id = ?)
      AND (? IS NULL OR m.user_id = ?)
"#;

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: MessageId(row.get("id")),
        export_id: ExportId(row.get("export_id")),
        server_id: ServerId(row.get("server_id")),
        channel_id: ChannelId(row.get("channel_id")),
        user_id: UserId(row.get("user_id")),
        external_id: row.get("external_id"),
        timestamp: timestamp_from_ms(row.get("timestamp_ms"))?,
        body: row.get("body"),
        attachments_json: row.get("attachments_json"),
    })
}

fn row_to_resolved(row: &SqliteRow) -> Result<ResolvedMessage> {
    Ok(ResolvedMessage {
        message: row_to_message(row)?,
        user_external_id: row.get("user_external_id"),
        user_name: row.get("user_name"),
        channel_name: row.get("channel_name"),
        server_name: row.get("server_name"),
    })
}

fn row_to_export(row: &SqliteRow) -> Result<Export> {
    Ok(Export {
        id: ExportId(row.get("id")),
        path: row.get("path"),
        name: row.get("name"),
        size_bytes: row.get("size_bytes"),
        digest: row.get("digest"),
        imported_at: timestamp_from_ms(row.get("imported_at"))?,
    })
}

fn row_to_server(row: &SqliteRow) -> Server {
    Server {
        id: ServerId(row.get("id")),
        export_id: Scope::from_key(row.get("scope")).export_id(),
        name: row.get("name"),
    }
}

fn row_to_channel(row: &SqliteRow) -> Channel {
    Channel {
        id: ChannelId(row.get("id")),
        export_id: Scope::from_key(row.get("scope")).export_id(),
        server_id: ServerId(row.get("server_id")),
        external_id: row.get("external_id"),
        name: row.get("name"),
    }
}

fn row_to_user(row: &SqliteRow) -> User {
    User {
        id: UserId(row.get("id")),
        export_id: Scope::from_key(row.get("scope")).export_id(),
        external_id: row.get("external_id"),
        name: row.get("name"),
    }
}

fn count(row: &SqliteRow) -> u64 {
    u64::try_from(row.get::<i64, _>("message_count")).unwrap_or_default()
}

/// Bind values for [`FILTER_WHERE`]; each appears twice.
struct FilterParams {
    pattern: Option<String>,
    server_id: Option<i64>,
    channel_id: Option<i64>,
    user_id: Option<i64>,
}

impl FilterParams {
    fn new(filter: &MessageFilter) -> Self {
        Self {
            pattern: filter
                .text
                .as_deref()
                .map(|q| format!("%{}%", escape_like(q))),
            server_id: filter.server_id.map(|id| id.0),
            channel_id: filter.channel_id.map(|id| id.0),
            user_id: filter.user_id.map(|id| id.0),
        }
    }

    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.pattern.as_deref())
            .bind(self.pattern.as_deref())
            .bind(self.server_id)
            .bind(self.server_id)
            .bind(self.channel_id)
            .bind(self.channel_id)
            .bind(self.user_id)
            .bind(self.user_id)
    }
}

impl SqliteStore {
    /// Finish a conflict-safe insert: the new rowid when a row was written,
    /// otherwise the id found by `lookup`.
    async fn outcome<'q>(
        &self,
        inserted: sqlx::sqlite::SqliteQueryResult,
        lookup: Query<'q, Sqlite, SqliteArguments<'q>>,
        what: &str,
    ) -> Result<CreateOutcome<i64>> {
        if inserted.rows_affected() > 0 {
            return Ok(CreateOutcome::Created(inserted.last_insert_rowid()));
        }
        let row = lookup
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("{} conflicted but could not be found", what))?;
        Ok(CreateOutcome::AlreadyExists(row.get("id")))
    }
}

fn map_outcome<T>(outcome: CreateOutcome<i64>, f: fn(i64) -> T) -> CreateOutcome<T> {
    match outcome {
        CreateOutcome::Created(id) => CreateOutcome::Created(f(id)),
        CreateOutcome::AlreadyExists(id) => CreateOutcome::AlreadyExists(f(id)),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_export(&self, export: &NewExport) -> Result<CreateOutcome<ExportId>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO exports (path, name, size_bytes, digest, imported_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(&export.path)
        .bind(&export.name)
        .bind(export.size_bytes)
        .bind(&export.digest)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let lookup = sqlx::query("SELECT id FROM exports WHERE digest = ?").bind(&export.digest);
        let outcome = self.outcome(inserted, lookup, "export").await?;
        Ok(map_outcome(outcome, ExportId))
    }

    async fn create_server(&self, scope: Scope, name: &str) -> Result<CreateOutcome<ServerId>> {
        let inserted = sqlx::query(
            "INSERT INTO servers (scope, name) VALUES (?, ?) ON CONFLICT(scope, name) DO NOTHING",
        )
        .bind(scope.key())
        .bind(name)
        .execute(&self.pool)
        .await?;

        let lookup = sqlx::query("SELECT id FROM servers WHERE scope = ? AND name = ?")
            .bind(scope.key())
            .bind(name);
        let outcome = self.outcome(inserted, lookup, "server").await?;
        Ok(map_outcome(outcome, ServerId))
    }

    async fn create_user(
        &self,
        scope: Scope,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<UserId>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO users (scope, external_id, name) VALUES (?, ?, ?)
            ON CONFLICT(scope, external_id) DO NOTHING
            "#,
        )
        .bind(scope.key())
        .bind(external_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        let lookup = sqlx::query("SELECT id FROM users WHERE scope = ? AND external_id = ?")
            .bind(scope.key())
            .bind(external_id);
        let outcome = self.outcome(inserted, lookup, "user").await?;
        Ok(map_outcome(outcome, UserId))
    }

    async fn create_channel(
        &self,
        scope: Scope,
        server_id: ServerId,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<ChannelId>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO channels (scope, server_id, external_id, name) VALUES (?, ?, ?, ?)
            ON CONFLICT(scope, external_id) DO NOTHING
            "#,
        )
        .bind(scope.key())
        .bind(server_id.0)
        .bind(external_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        let lookup = sqlx::query("SELECT id FROM channels WHERE scope = ? AND external_id = ?")
            .bind(scope.key())
            .bind(external_id);
        let outcome = self.outcome(inserted, lookup, "channel").await?;
        Ok(map_outcome(outcome, ChannelId))
    }

    async fn create_message(&self, message: &NewMessage) -> Result<CreateOutcome<MessageId>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (export_id, server_id, channel_id, user_id, external_id,
                                  timestamp_ms, body, attachments_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(message.export_id.0)
        .bind(message.server_id.0)
        .bind(message.channel_id.0)
        .bind(message.user_id.0)
        .bind(&message.external_id)
        .bind(message.timestamp.timestamp_millis())
        .bind(&message.body)
        .bind(&message.attachments_json)
        .execute(&self.pool)
        .await?;

        let lookup =
            sqlx::query("SELECT id FROM messages WHERE external_id = ?").bind(&message.external_id);
        let outcome = self.outcome(inserted, lookup, "message").await?;
        Ok(map_outcome(outcome, MessageId))
    }

    async fn find_server_by_name(&self, scope: Scope, name: &str) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT id, scope, name FROM servers WHERE scope = ? AND name = ?")
            .bind(scope.key())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_server))
    }

    async fn find_channel_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<Channel>> {
        let row = sqlx::query(
            r#"
            SELECT id, scope, server_id, external_id, name FROM channels
            WHERE scope = ? AND external_id = ?
            "#,
        )
        .bind(scope.key())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_channel))
    }

    async fn find_user_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, scope, external_id, name FROM users WHERE scope = ? AND external_id = ?",
        )
        .bind(scope.key())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn find_message_by_external_id(&self, external_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT id, export_id, server_id, channel_id, user_id, external_id,
                   timestamp_ms, body, attachments_json
            FROM messages WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn get_export(&self, id: ExportId) -> Result<Option<Export>> {
        let row = sqlx::query(
            "SELECT id, path, name, size_bytes, digest, imported_at FROM exports WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_export).transpose()
    }

    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT id, scope, name FROM servers WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_server))
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        let row = sqlx::query(
            "SELECT id, scope, server_id, external_id, name FROM channels WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_channel))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, scope, external_id, name FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<ResolvedMessage>> {
        let sql = format!("{} WHERE m.id = ?", MESSAGE_SELECT);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_resolved).transpose()
    }

    async fn list_exports(&self) -> Result<Vec<Export>> {
        let rows = sqlx::query(
            "SELECT id, path, name, size_bytes, digest, imported_at FROM exports ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_export).collect()
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query("SELECT id, scope, name FROM servers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_server).collect())
    }

    async fn list_channels(&self, server_id: Option<ServerId>) -> Result<Vec<ChannelSummary>> {
        let server = server_id.map(|id| id.0);
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.scope, c.server_id, c.external_id, c.name,
                   (SELECT COUNT(*) FROM messages m WHERE m.channel_id = c.id) AS message_count
            FROM channels c
            WHERE (? IS NULL OR c.server_id = ?)
            ORDER BY c.id
            "#,
        )
        .bind(server)
        .bind(server)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ChannelSummary {
                channel: row_to_channel(row),
                message_count: count(row),
            })
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.scope, u.external_id, u.name,
                   (SELECT COUNT(*) FROM messages m WHERE m.user_id = u.id) AS message_count
            FROM users u
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| UserSummary {
                user: row_to_user(row),
                message_count: count(row),
            })
            .collect())
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
        offset: u64,
        limit: u64,
    ) -> Result<MessageSlice> {
        let params = FilterParams::new(filter);

        let count_sql = format!("SELECT COUNT(*) AS total FROM messages m {}", FILTER_WHERE);
        let total: i64 = params
            .bind(sqlx::query(&count_sql))
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let page_sql = format!(
            "{} {} ORDER BY m.timestamp_ms ASC, m.id ASC LIMIT ? OFFSET ?",
            MESSAGE_SELECT, FILTER_WHERE
        );
        let rows = params
            .bind(sqlx::query(&page_sql))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(MessageSlice {
            items: rows.iter().map(row_to_resolved).collect::<Result<_>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn messages_between(
        &self,
        channel_id: ChannelId,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<ResolvedMessage>> {
        let sql = format!(
            r#"{}
            WHERE m.channel_id = ? AND m.timestamp_ms > ? AND m.timestamp_ms < ?
            ORDER BY m.timestamp_ms ASC, m.id ASC"#,
            MESSAGE_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.0)
            .bind(after.timestamp_millis())
            .bind(before.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_resolved).collect()
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM exports) AS exports,
                   (SELECT COUNT(*) FROM servers) AS servers,
                   (SELECT COUNT(*) FROM channels) AS channels,
                   (SELECT COUNT(*) FROM users) AS users,
                   (SELECT COUNT(*) FROM messages) AS messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let get = |col: &str| u64::try_from(row.get::<i64, _>(col)).unwrap_or_default();
        Ok(StoreCounts {
            exports: get("exports"),
            servers: get("servers"),
            channels: get("channels"),
            users: get("users"),
            messages: get("messages"),
        })
    }
}
