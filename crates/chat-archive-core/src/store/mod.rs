//! Storage abstraction for Chat Archive.
//!
//! The [`Store`] trait defines every operation the importer and the query
//! engine need, so both can run against SQLite or the in-memory backend.
//!
//! Creates are conflict-safe: inserting an entity whose natural key already
//! exists in its scope returns [`CreateOutcome::AlreadyExists`] with the id
//! of the existing row instead of failing. Each create is its own atomic
//! unit, so a collision never undoes earlier creates.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Channel, ChannelId, ChannelSummary, Export, ExportId, Message, MessageId, NewExport,
    NewMessage, ResolvedMessage, Scope, Server, ServerId, StoreCounts, User, UserId, UserSummary,
};

/// Result of a conflict-safe create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome<T> {
    Created(T),
    AlreadyExists(T),
}

impl<T: Copy> CreateOutcome<T> {
    /// Id of the created or pre-existing row.
    pub fn id(&self) -> T {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::AlreadyExists(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Predicate for message listings. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// ASCII case-insensitive substring of the body.
    pub text: Option<String>,
    pub server_id: Option<ServerId>,
    pub channel_id: Option<ChannelId>,
    pub user_id: Option<UserId>,
}

impl MessageFilter {
    pub fn text(query: &str, server_id: Option<ServerId>) -> Self {
        Self {
            text: Some(query.to_string()),
            server_id,
            ..Self::default()
        }
    }

    pub fn channel(channel_id: ChannelId) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Self::default()
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Evaluate the filter against a message. Used by backends that filter
    /// in process.
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(ref q) = self.text {
            if !crate::text::contains_ci(&message.body, q) {
                return false;
            }
        }
        self.server_id.map_or(true, |id| message.server_id == id)
            && self.channel_id.map_or(true, |id| message.channel_id == id)
            && self.user_id.map_or(true, |id| message.user_id == id)
    }
}

/// One page of a message listing plus the total number of matches.
#[derive(Debug, Clone, Default)]
pub struct MessageSlice {
    pub items: Vec<ResolvedMessage>,
    pub total: u64,
}

/// Abstract storage backend for Chat Archive.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | `create_*` | Conflict-safe insert returning [`CreateOutcome`] |
/// | `find_*` | Lookup by natural key within a [`Scope`] |
/// | `get_*` | Lookup by store-assigned id |
/// | `list_*` | Browse listings |
/// | [`list_messages`](Store::list_messages) | Filtered, paginated messages ordered by time |
/// | [`messages_between`](Store::messages_between) | Messages of a channel inside an open time interval |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_export(&self, export: &NewExport) -> Result<CreateOutcome<ExportId>>;

    async fn create_server(&self, scope: Scope, name: &str) -> Result<CreateOutcome<ServerId>>;

    async fn create_user(
        &self,
        scope: Scope,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<UserId>>;

    async fn create_channel(
        &self,
        scope: Scope,
        server_id: ServerId,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<ChannelId>>;

    /// Message external ids are unique across the whole store.
    async fn create_message(&self, message: &NewMessage) -> Result<CreateOutcome<MessageId>>;

    async fn find_server_by_name(&self, scope: Scope, name: &str) -> Result<Option<Server>>;

    async fn find_channel_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<Channel>>;

    async fn find_user_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<User>>;

    async fn find_message_by_external_id(&self, external_id: &str) -> Result<Option<Message>>;

    async fn get_export(&self, id: ExportId) -> Result<Option<Export>>;

    async fn get_server(&self, id: ServerId) -> Result<Option<Server>>;

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn get_message(&self, id: MessageId) -> Result<Option<ResolvedMessage>>;

    async fn list_exports(&self) -> Result<Vec<Export>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    async fn list_channels(&self, server_id: Option<ServerId>) -> Result<Vec<ChannelSummary>>;

    async fn list_users(&self) -> Result<Vec<UserSummary>>;

    /// Messages matching `filter`, ordered by timestamp then id, skipping
    /// `offset` and returning at most `limit`.
    async fn list_messages(
        &self,
        filter: &MessageFilter,
        offset: u64,
        limit: u64,
    ) -> Result<MessageSlice>;

    /// Messages of `channel_id` with `after < timestamp < before`, ascending.
    async fn messages_between(
        &self,
        channel_id: ChannelId,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<ResolvedMessage>>;

    async fn counts(&self) -> Result<StoreCounts>;
}
