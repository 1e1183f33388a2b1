//! Read-side operations: search, channel and user listings, context windows
//! and browse lookups.
//!
//! A [`QueryEngine`] is built once around a shared [`Store`] and passed to
//! whatever serves requests (CLI commands, the HTTP API). Operations that
//! address an entity by id return `Ok(None)` when it does not exist.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{
    Channel, ChannelId, ChannelSummary, Export, MessageId, ResolvedMessage, Scope, Server, ServerId,
    User, UserId, UserSummary,
};
use crate::render::{mention_ids, render_message, resolve_mentions};
use crate::store::{MessageFilter, Store};

/// Half-width of the context window around a message.
pub const CONTEXT_WINDOW: Duration = Duration::hours(1);

/// Page size used when a request does not specify one.
pub const DEFAULT_PER_PAGE: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub default_per_page: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// A 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: Option<u32>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: None,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: Option<u32>) -> Self {
        Self { page, per_page }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    /// Number of pages; at least 1 so an empty result still has a page.
    pub fn pages(&self) -> u32 {
        let per_page = u64::from(self.per_page.max(1));
        let pages = self.total.div_ceil(per_page).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn prev_num(&self) -> Option<u32> {
        self.has_prev().then(|| self.page - 1)
    }

    pub fn next_num(&self) -> Option<u32> {
        self.has_next().then(|| self.page + 1)
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// A message together with the surrounding messages of its channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageContext {
    pub message: ResolvedMessage,
    pub context: Vec<ResolvedMessage>,
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    options: QueryOptions,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>, options: QueryOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Normalize a request into (page, per_page).
    fn resolve_page(&self, req: PageRequest) -> (u32, u32) {
        let per_page = match req.per_page {
            Some(n) if n > 0 => n,
            _ => self.options.default_per_page.max(1),
        };
        (req.page.max(1), per_page)
    }

    async fn page(
        &self,
        filter: &MessageFilter,
        req: PageRequest,
    ) -> Result<Page<ResolvedMessage>> {
        let (page, per_page) = self.resolve_page(req);
        let offset = u64::from(page - 1) * u64::from(per_page);
        let slice = self
            .store
            .list_messages(filter, offset, u64::from(per_page))
            .await?;
        Ok(Page {
            items: slice.items,
            total: slice.total,
            page,
            per_page,
        })
    }

    /// Messages whose body contains `query`, ignoring ASCII case, optionally
    /// restricted to one server. `None` when `server` does not exist.
    pub async fn search(
        &self,
        query: &str,
        server: Option<ServerId>,
        req: PageRequest,
    ) -> Result<Option<Page<ResolvedMessage>>> {
        if let Some(id) = server {
            if self.store.get_server(id).await?.is_none() {
                return Ok(None);
            }
        }
        tracing::debug!(query, server = ?server, page = req.page, "search");
        let page = self.page(&MessageFilter::text(query, server), req).await?;
        Ok(Some(page))
    }

    pub async fn list_by_channel(
        &self,
        channel: ChannelId,
        req: PageRequest,
    ) -> Result<Option<Page<ResolvedMessage>>> {
        if self.store.get_channel(channel).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.page(&MessageFilter::channel(channel), req).await?))
    }

    pub async fn list_by_user(
        &self,
        user: UserId,
        req: PageRequest,
    ) -> Result<Option<Page<ResolvedMessage>>> {
        if self.store.get_user(user).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.page(&MessageFilter::user(user), req).await?))
    }

    /// Messages of `channel` strictly within [`CONTEXT_WINDOW`] of `center`.
    /// Bounds past the representable range are clamped to it.
    pub async fn context_window(
        &self,
        channel: ChannelId,
        center: DateTime<Utc>,
    ) -> Result<Option<Vec<ResolvedMessage>>> {
        if self.store.get_channel(channel).await?.is_none() {
            return Ok(None);
        }
        let start = center
            .checked_sub_signed(CONTEXT_WINDOW)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = center
            .checked_add_signed(CONTEXT_WINDOW)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let messages = self.store.messages_between(channel, start, end).await?;
        Ok(Some(messages))
    }

    /// A message and its context window.
    pub async fn view(&self, id: MessageId) -> Result<Option<MessageContext>> {
        let Some(message) = self.store.get_message(id).await? else {
            return Ok(None);
        };
        let context = self
            .context_window(message.message.channel_id, message.message.timestamp)
            .await?
            .unwrap_or_default();
        Ok(Some(MessageContext { message, context }))
    }

    pub async fn servers(&self) -> Result<Vec<Server>> {
        self.store.list_servers().await
    }

    pub async fn channels(&self, server: Option<ServerId>) -> Result<Vec<ChannelSummary>> {
        self.store.list_channels(server).await
    }

    pub async fn users(&self) -> Result<Vec<UserSummary>> {
        self.store.list_users().await
    }

    pub async fn exports(&self) -> Result<Vec<Export>> {
        self.store.list_exports().await
    }

    pub async fn server(&self, id: ServerId) -> Result<Option<Server>> {
        self.store.get_server(id).await
    }

    pub async fn channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        self.store.get_channel(id).await
    }

    pub async fn user(&self, id: UserId) -> Result<Option<User>> {
        self.store.get_user(id).await
    }

    /// Display names for the users mentioned in `message`, looked up in the
    /// scope its author was imported under.
    async fn mentioned_names<'m>(
        &self,
        message: &'m ResolvedMessage,
    ) -> Result<HashMap<&'m str, String>> {
        let mut names = HashMap::new();
        let ids = mention_ids(&message.message.body);
        if ids.is_empty() {
            return Ok(names);
        }
        let scope = match self.store.get_user(message.message.user_id).await? {
            Some(User {
                export_id: Some(export),
                ..
            }) => Scope::Export(export),
            _ => Scope::Global,
        };
        for id in ids {
            if names.contains_key(id) {
                continue;
            }
            if let Some(user) = self.store.find_user_by_external_id(scope, id).await? {
                names.insert(id, user.name);
            }
        }
        Ok(names)
    }

    /// Render a message body as HTML with mentions resolved and `query`
    /// highlighted.
    pub async fn render(&self, message: &ResolvedMessage, query: Option<&str>) -> Result<String> {
        let names = self.mentioned_names(message).await?;
        Ok(render_message(&message.message.body, query, |id| {
            names.get(id).cloned()
        }))
    }

    /// The message body with mentions resolved and no markup, for terminals.
    pub async fn plain_text(&self, message: &ResolvedMessage) -> Result<String> {
        let names = self.mentioned_names(message).await?;
        Ok(resolve_mentions(&message.message.body, |id| {
            names.get(id).cloned()
        }))
    }
}
