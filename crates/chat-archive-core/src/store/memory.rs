//! In-memory [`Store`] implementation for tests and embedders that do not
//! need persistence.
//!
//! All tables live in one [`Inner`] behind a `std::sync::RwLock`. Ids are
//! assigned sequentially per table starting at 1, like SQLite rowids.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Channel, ChannelId, ChannelSummary, Export, ExportId, Message, MessageId, NewExport,
    NewMessage, ResolvedMessage, Scope, Server, ServerId, StoreCounts, User, UserId, UserSummary,
};

use super::{CreateOutcome, MessageFilter, MessageSlice, Store};

#[derive(Default)]
struct Inner {
    exports: Vec<Export>,
    servers: Vec<Server>,
    channels: Vec<Channel>,
    users: Vec<User>,
    messages: Vec<Message>,
    exports_by_digest: HashMap<String, ExportId>,
    servers_by_name: HashMap<(Scope, String), ServerId>,
    channels_by_key: HashMap<(Scope, String), ChannelId>,
    users_by_key: HashMap<(Scope, String), UserId>,
    messages_by_key: HashMap<String, MessageId>,
}

impl Inner {
    // Ids are 1-based positions in their vectors.
    fn server(&self, id: ServerId) -> Option<&Server> {
        slot(id.0).and_then(|i| self.servers.get(i))
    }

    fn channel(&self, id: ChannelId) -> Option<&Channel> {
        slot(id.0).and_then(|i| self.channels.get(i))
    }

    fn user(&self, id: UserId) -> Option<&User> {
        slot(id.0).and_then(|i| self.users.get(i))
    }

    fn resolve(&self, message: &Message) -> ResolvedMessage {
        let user = self.user(message.user_id);
        ResolvedMessage {
            message: message.clone(),
            user_external_id: user.map(|u| u.external_id.clone()).unwrap_or_default(),
            user_name: user.map(|u| u.name.clone()).unwrap_or_default(),
            channel_name: self
                .channel(message.channel_id)
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            server_name: self
                .server(message.server_id)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
        }
    }

    /// Messages matching `pred`, sorted by (timestamp, id).
    fn sorted_messages<F>(&self, pred: F) -> Vec<&Message>
    where
        F: Fn(&Message) -> bool,
    {
        let mut out: Vec<&Message> = self.messages.iter().filter(|m| pred(m)).collect();
        out.sort_by_key(|m| (m.timestamp, m.id));
        out
    }

    fn message_count<F>(&self, pred: F) -> u64
    where
        F: Fn(&Message) -> bool,
    {
        self.messages.iter().filter(|m| pred(m)).count() as u64
    }
}

fn slot(id: i64) -> Option<usize> {
    usize::try_from(id).ok()?.checked_sub(1)
}

fn next_id(len: usize) -> i64 {
    len as i64 + 1
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_export(&self, export: &NewExport) -> Result<CreateOutcome<ExportId>> {
        let mut inner = self.write()?;
        if let Some(id) = inner.exports_by_digest.get(&export.digest) {
            return Ok(CreateOutcome::AlreadyExists(*id));
        }
        let id = ExportId(next_id(inner.exports.len()));
        inner.exports.push(Export {
            id,
            path: export.path.clone(),
            name: export.name.clone(),
            size_bytes: export.size_bytes,
            digest: export.digest.clone(),
            imported_at: Utc::now(),
        });
        inner.exports_by_digest.insert(export.digest.clone(), id);
        Ok(CreateOutcome::Created(id))
    }

    async fn create_server(&self, scope: Scope, name: &str) -> Result<CreateOutcome<ServerId>> {
        let mut inner = self.write()?;
        let key = (scope, name.to_string());
        if let Some(id) = inner.servers_by_name.get(&key) {
            return Ok(CreateOutcome::AlreadyExists(*id));
        }
        let id = ServerId(next_id(inner.servers.len()));
        inner.servers.push(Server {
            id,
            export_id: scope.export_id(),
            name: name.to_string(),
        });
        inner.servers_by_name.insert(key, id);
        Ok(CreateOutcome::Created(id))
    }

    async fn create_user(
        &self,
        scope: Scope,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<UserId>> {
        let mut inner = self.write()?;
        let key = (scope, external_id.to_string());
        if let Some(id) = inner.users_by_key.get(&key) {
            return Ok(CreateOutcome::AlreadyExists(*id));
        }
        let id = UserId(next_id(inner.users.len()));
        inner.users.push(User {
            id,
            export_id: scope.export_id(),
            external_id: external_id.to_string(),
            name: name.to_string(),
        });
        inner.users_by_key.insert(key, id);
        Ok(CreateOutcome::Created(id))
    }

    async fn create_channel(
        &self,
        scope: Scope,
        server_id: ServerId,
        external_id: &str,
        name: &str,
    ) -> Result<CreateOutcome<ChannelId>> {
        let mut inner = self.write()?;
        let key = (scope, external_id.to_string());
        if let Some(id) = inner.channels_by_key.get(&key) {
            return Ok(CreateOutcome::AlreadyExists(*id));
        }
        if inner.server(server_id).is_none() {
            return Err(anyhow!(
                "channel {} references unknown server {}",
                external_id,
                server_id
            ));
        }
        let id = ChannelId(next_id(inner.channels.len()));
        inner.channels.push(Channel {
            id,
            export_id: scope.export_id(),
            server_id,
            external_id: external_id.to_string(),
            name: name.to_string(),
        });
        inner.channels_by_key.insert(key, id);
        Ok(CreateOutcome::Created(id))
    }

    async fn create_message(&self, message: &NewMessage) -> Result<CreateOutcome<MessageId>> {
        let mut inner = self.write()?;
        if let Some(id) = inner.messages_by_key.get(&message.external_id) {
            return Ok(CreateOutcome::AlreadyExists(*id));
        }
        if inner.channel(message.channel_id).is_none() || inner.user(message.user_id).is_none() {
            return Err(anyhow!(
                "message {} references an unknown channel or user",
                message.external_id
            ));
        }
        let id = MessageId(next_id(inner.messages.len()));
        inner.messages.push(Message {
            id,
            export_id: message.export_id,
            server_id: message.server_id,
            channel_id: message.channel_id,
            user_id: message.user_id,
            external_id: message.external_id.clone(),
            timestamp: message.timestamp,
            body: message.body.clone(),
            attachments_json: message.attachments_json.clone(),
        });
        inner.messages_by_key.insert(message.external_id.clone(), id);
        Ok(CreateOutcome::Created(id))
    }

    async fn find_server_by_name(&self, scope: Scope, name: &str) -> Result<Option<Server>> {
        let inner = self.read()?;
        Ok(inner
            .servers_by_name
            .get(&(scope, name.to_string()))
            .and_then(|id| inner.server(*id))
            .cloned())
    }

    async fn find_channel_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<Channel>> {
        let inner = self.read()?;
        Ok(inner
            .channels_by_key
            .get(&(scope, external_id.to_string()))
            .and_then(|id| inner.channel(*id))
            .cloned())
    }

    async fn find_user_by_external_id(
        &self,
        scope: Scope,
        external_id: &str,
    ) -> Result<Option<User>> {
        let inner = self.read()?;
        Ok(inner
            .users_by_key
            .get(&(scope, external_id.to_string()))
            .and_then(|id| inner.user(*id))
            .cloned())
    }

    async fn find_message_by_external_id(&self, external_id: &str) -> Result<Option<Message>> {
        let inner = self.read()?;
        Ok(inner
            .messages_by_key
            .get(external_id)
            .and_then(|id| slot(id.0))
            .and_then(|i| inner.messages.get(i))
            .cloned())
    }

    async fn get_export(&self, id: ExportId) -> Result<Option<Export>> {
        let inner = self.read()?;
        Ok(slot(id.0).and_then(|i| inner.exports.get(i)).cloned())
    }

    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        Ok(self.read()?.server(id).cloned())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        Ok(self.read()?.channel(id).cloned())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read()?.user(id).cloned())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<ResolvedMessage>> {
        let inner = self.read()?;
        Ok(slot(id.0)
            .and_then(|i| inner.messages.get(i))
            .map(|m| inner.resolve(m)))
    }

    async fn list_exports(&self) -> Result<Vec<Export>> {
        Ok(self.read()?.exports.clone())
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        Ok(self.read()?.servers.clone())
    }

    async fn list_channels(&self, server_id: Option<ServerId>) -> Result<Vec<ChannelSummary>> {
        let inner = self.read()?;
        Ok(inner
            .channels
            .iter()
            .filter(|c| server_id.map_or(true, |id| c.server_id == id))
            .map(|c| ChannelSummary {
                channel: c.clone(),
                message_count: inner.message_count(|m| m.channel_id == c.id),
            })
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let inner = self.read()?;
        Ok(inner
            .users
            .iter()
            .map(|u| UserSummary {
                user: u.clone(),
                message_count: inner.message_count(|m| m.user_id == u.id),
            })
            .collect())
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
        offset: u64,
        limit: u64,
    ) -> Result<MessageSlice> {
        let inner = self.read()?;
        let matching = inner.sorted_messages(|m| filter.matches(m));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|m| inner.resolve(m))
            .collect();
        Ok(MessageSlice { items, total })
    }

    async fn messages_between(
        &self,
        channel_id: ChannelId,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<ResolvedMessage>> {
        let inner = self.read()?;
        Ok(inner
            .sorted_messages(|m| {
                m.channel_id == channel_id && m.timestamp > after && m.timestamp < before
            })
            .into_iter()
            .map(|m| inner.resolve(m))
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.read()?;
        Ok(StoreCounts {
            exports: inner.exports.len() as u64,
            servers: inner.servers.len() as u64,
            channels: inner.channels.len() as u64,
            users: inner.users.len() as u64,
            messages: inner.messages.len() as u64,
        })
    }
}
