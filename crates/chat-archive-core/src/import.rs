//! Export import pipeline.
//!
//! An import runs in two stages:
//!
//! 1. **Plan**: the decoded [`ExportPayload`] is checked and flattened into
//!    an in-memory plan: server positions resolved to names, user references
//!    resolved to external ids, timestamps converted, attachments
//!    serialized. Anything malformed fails here, before the store is touched.
//! 2. **Write**: entities are created in dependency order
//!    (export → servers → users → channels → messages), each through a
//!    conflict-safe [`Store`] create. Collisions count as skipped; dangling
//!    references skip only the affected record and are listed in the
//!    [`ImportReport`].
//!
//! Importing the same payload twice leaves the store unchanged the second
//! time and reports every entity as skipped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::models::{
    Channel, ExportId, IdentityScope, NewExport, NewMessage, Scope, UserId,
};
use crate::query::CONTEXT_WINDOW;
use crate::store::{CreateOutcome, Store};

// ============ Raw export format ============

/// A decoded export document.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportPayload {
    pub meta: ExportMeta,
    /// channel external id → message external id → message
    pub data: BTreeMap<String, BTreeMap<String, RawMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportMeta {
    pub servers: Vec<RawServer>,
    pub users: RawUsers,
    pub channels: BTreeMap<String, RawChannel>,
    /// index → external user id, present in index-addressed exports.
    #[serde(default)]
    pub userindex: Option<Vec<RawRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawServer {
    pub name: String,
}

/// The two observed shapes of the `users` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawUsers {
    /// external id → user
    Map(BTreeMap<String, RawUser>),
    /// users addressed by position through `userindex`
    List(Vec<RawUser>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub name: String,
    #[serde(default)]
    pub id: Option<RawRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChannel {
    pub name: String,
    pub server: RawRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    /// Epoch milliseconds.
    pub t: i64,
    #[serde(default)]
    pub m: Option<String>,
    pub u: RawRef,
    #[serde(default)]
    pub a: Option<serde_json::Value>,
}

/// A reference that exports write either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawRef {
    Index(u64),
    Text(String),
}

impl fmt::Display for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawRef::Index(i) => write!(f, "{}", i),
            RawRef::Text(s) => f.write_str(s),
        }
    }
}

impl RawRef {
    /// Interpret the reference as a position: `3`, `"3"` or `"s3"`.
    fn position(&self) -> Option<usize> {
        match self {
            RawRef::Index(i) => usize::try_from(*i).ok(),
            RawRef::Text(s) => {
                let digits = s.strip_prefix('s').unwrap_or(s);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()
            }
        }
    }
}

impl ExportPayload {
    /// Decode a JSON export document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ImportError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn numeric_user_refs(&self) -> bool {
        self.data
            .values()
            .flat_map(|messages| messages.values())
            .all(|m| matches!(m.u, RawRef::Index(_)))
    }
}

impl RawChannel {
    /// The server name this channel points at. An exact name in `servers`
    /// wins over a position; an unmatched name is looked up in the store.
    fn server_name<'p>(&'p self, servers: &[&'p str]) -> Result<&'p str, String> {
        if let RawRef::Text(name) = &self.server {
            if servers.contains(&name.as_str()) {
                return Ok(name.as_str());
            }
        }
        if let Some(name) = self.server.position().and_then(|pos| servers.get(pos).copied()) {
            return Ok(name);
        }
        match &self.server {
            RawRef::Text(name) => Ok(name.as_str()),
            RawRef::Index(i) => Err(i.to_string()),
        }
    }
}

// ============ Identity mode ============

/// How message `u` fields address users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRefMode {
    /// `Indexed` when the payload carries a `userindex` and every `u` is a
    /// number, else `Direct`.
    #[default]
    Auto,
    /// `u` is the external user id.
    Direct,
    /// `u` is a position in `userindex`.
    Indexed,
}

impl UserRefMode {
    /// Settle `Auto` against a concrete payload. De-duplicated exports keep
    /// their `userindex` but write external ids into `u`.
    pub fn resolve(self, payload: &ExportPayload) -> UserRefMode {
        match self {
            UserRefMode::Auto if payload.meta.userindex.is_some() && payload.numeric_user_refs() => {
                UserRefMode::Indexed
            }
            UserRefMode::Auto => UserRefMode::Direct,
            other => other,
        }
    }
}

impl fmt::Display for UserRefMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserRefMode::Auto => "auto",
            UserRefMode::Direct => "direct",
            UserRefMode::Indexed => "indexed",
        })
    }
}

/// Natural-key scope and user addressing for one import call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMode {
    #[serde(default)]
    pub scope: IdentityScope,
    #[serde(default)]
    pub user_refs: UserRefMode,
}

// ============ Report ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub created: u64,
    pub skipped: u64,
}

impl PhaseCounts {
    fn record<T>(&mut self, outcome: &CreateOutcome<T>) {
        match outcome {
            CreateOutcome::Created(_) => self.created += 1,
            CreateOutcome::AlreadyExists(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.skipped
    }
}

/// A record skipped because something it references could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportFailure {
    ServerNotFound { channel_id: String, server: String },
    ChannelNotFound { message_id: String, channel_id: String },
    UserNotFound { message_id: String, user: String },
}

impl ImportFailure {
    /// External id of the record that was skipped.
    pub fn external_id(&self) -> &str {
        match self {
            ImportFailure::ServerNotFound { channel_id, .. } => channel_id,
            ImportFailure::ChannelNotFound { message_id, .. }
            | ImportFailure::UserNotFound { message_id, .. } => message_id,
        }
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportFailure::ServerNotFound { channel_id, server } => {
                write!(f, "channel {}: server '{}' not found", channel_id, server)
            }
            ImportFailure::ChannelNotFound {
                message_id,
                channel_id,
            } => write!(f, "message {}: channel {} not found", message_id, channel_id),
            ImportFailure::UserNotFound { message_id, user } => {
                write!(f, "message {}: user {} not found", message_id, user)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub export_id: ExportId,
    /// The user addressing actually used for this payload.
    pub user_refs: UserRefMode,
    pub exports: PhaseCounts,
    pub servers: PhaseCounts,
    pub users: PhaseCounts,
    pub channels: PhaseCounts,
    pub messages: PhaseCounts,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn created_total(&self) -> u64 {
        self.exports.created
            + self.servers.created
            + self.users.created
            + self.channels.created
            + self.messages.created
    }
}

// ============ Plan ============

struct PlannedChannel<'a> {
    external_id: &'a str,
    name: &'a str,
    /// Server name, or the unresolvable reference.
    server: Result<&'a str, String>,
}

struct PlannedMessage<'a> {
    channel_id: &'a str,
    external_id: &'a str,
    timestamp: DateTime<Utc>,
    body: &'a str,
    /// External user id, or the unresolvable reference.
    user: Result<String, String>,
    attachments_json: Option<String>,
}

struct Plan<'a> {
    user_refs: UserRefMode,
    servers: Vec<&'a str>,
    users: Vec<(String, &'a str)>,
    channels: Vec<PlannedChannel<'a>>,
    messages: Vec<PlannedMessage<'a>>,
}

/// Convert epoch milliseconds to an instant. `None` unless the instant and
/// its whole context window are representable.
pub fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    let timestamp = DateTime::from_timestamp_millis(ms)?;
    timestamp.checked_sub_signed(CONTEXT_WINDOW)?;
    timestamp.checked_add_signed(CONTEXT_WINDOW)?;
    Some(timestamp)
}

fn plan(payload: &ExportPayload, user_refs: UserRefMode) -> Result<Plan<'_>, ImportError> {
    let meta = &payload.meta;
    let user_refs = user_refs.resolve(payload);
    let index: &[RawRef] = meta.userindex.as_deref().unwrap_or_default();

    if user_refs == UserRefMode::Indexed && meta.userindex.is_none() {
        return Err(ImportError::Invalid(
            "indexed user references require a userindex section".to_string(),
        ));
    }

    let servers: Vec<&str> = meta.servers.iter().map(|s| s.name.as_str()).collect();

    let users = match &meta.users {
        RawUsers::Map(map) => map
            .iter()
            .map(|(id, u)| (id.clone(), u.name.as_str()))
            .collect(),
        RawUsers::List(list) => list
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let id = u.id.as_ref().or_else(|| index.get(i)).ok_or_else(|| {
                    ImportError::Invalid(format!("user #{} ({}) has no external id", i, u.name))
                })?;
                Ok((id.to_string(), u.name.as_str()))
            })
            .collect::<Result<Vec<_>, ImportError>>()?,
    };

    let channels = meta
        .channels
        .iter()
        .map(|(id, c)| PlannedChannel {
            external_id: id,
            name: &c.name,
            server: c.server_name(&servers),
        })
        .collect();

    let mut messages = Vec::new();
    for (channel_id, channel_messages) in &payload.data {
        for (message_id, m) in channel_messages {
            let timestamp = timestamp_from_millis(m.t).ok_or_else(|| {
                ImportError::Invalid(format!(
                    "message {}: timestamp {} out of range",
                    message_id, m.t
                ))
            })?;
            let user = match (user_refs, &m.u) {
                (UserRefMode::Indexed, RawRef::Index(i)) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| index.get(i))
                    .map(|id| id.to_string())
                    .ok_or_else(|| m.u.to_string()),
                (UserRefMode::Indexed, RawRef::Text(_)) => Err(m.u.to_string()),
                (_, r) => Ok(r.to_string()),
            };
            let attachments_json = match &m.a {
                Some(a) => Some(serde_json::to_string(a)?),
                None => None,
            };
            messages.push(PlannedMessage {
                channel_id,
                external_id: message_id,
                timestamp,
                body: m.m.as_deref().unwrap_or_default(),
                user,
                attachments_json,
            });
        }
    }

    Ok(Plan {
        user_refs,
        servers,
        users,
        channels,
        messages,
    })
}

// ============ Importer ============

/// Writes export payloads into a [`Store`].
pub struct Importer<'a> {
    store: &'a dyn Store,
    mode: IdentityMode,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a dyn Store, mode: IdentityMode) -> Self {
        Self { store, mode }
    }

    /// Import one complete payload read from `source`.
    pub async fn import(
        &self,
        source: &NewExport,
        payload: &ExportPayload,
    ) -> Result<ImportReport, ImportError> {
        let plan = plan(payload, self.mode.user_refs)?;
        let store = self.store;

        let mut exports = PhaseCounts::default();
        let outcome = store.create_export(source).await?;
        exports.record(&outcome);
        let export_id = outcome.id();
        let scope = Scope::for_export(self.mode.scope, export_id);
        tracing::info!(
            export = %export_id,
            path = %source.path,
            scope = ?scope,
            user_refs = %plan.user_refs,
            "importing export"
        );

        let mut report = ImportReport {
            export_id,
            user_refs: plan.user_refs,
            exports,
            servers: PhaseCounts::default(),
            users: PhaseCounts::default(),
            channels: PhaseCounts::default(),
            messages: PhaseCounts::default(),
            failures: Vec::new(),
        };

        for name in &plan.servers {
            let outcome = store.create_server(scope, name).await?;
            report.servers.record(&outcome);
        }
        tracing::info!(
            created = report.servers.created,
            skipped = report.servers.skipped,
            "servers"
        );

        for (external_id, name) in &plan.users {
            let outcome = store.create_user(scope, external_id, name).await?;
            report.users.record(&outcome);
        }
        tracing::info!(
            created = report.users.created,
            skipped = report.users.skipped,
            "users"
        );

        for channel in &plan.channels {
            let server = match channel.server {
                Ok(name) => store.find_server_by_name(scope, name).await?,
                Err(_) => None,
            };
            let Some(server) = server else {
                let failure = ImportFailure::ServerNotFound {
                    channel_id: channel.external_id.to_string(),
                    server: match &channel.server {
                        Ok(name) => name.to_string(),
                        Err(raw) => raw.clone(),
                    },
                };
                tracing::warn!(%failure, "skipping channel");
                report.failures.push(failure);
                continue;
            };
            let outcome = store
                .create_channel(scope, server.id, channel.external_id, channel.name)
                .await?;
            report.channels.record(&outcome);
        }
        tracing::info!(
            created = report.channels.created,
            skipped = report.channels.skipped,
            "channels"
        );

        let mut channels: HashMap<&str, Option<Channel>> = HashMap::new();
        let mut users: HashMap<String, Option<UserId>> = HashMap::new();

        for message in &plan.messages {
            let channel = match channels.get(message.channel_id) {
                Some(cached) => cached.clone(),
                None => {
                    let found = store
                        .find_channel_by_external_id(scope, message.channel_id)
                        .await?;
                    channels.insert(message.channel_id, found.clone());
                    found
                }
            };
            let Some(channel) = channel else {
                let failure = ImportFailure::ChannelNotFound {
                    message_id: message.external_id.to_string(),
                    channel_id: message.channel_id.to_string(),
                };
                tracing::warn!(%failure, "skipping message");
                report.failures.push(failure);
                continue;
            };

            let user_id = match &message.user {
                Ok(external_id) => match users.get(external_id) {
                    Some(cached) => *cached,
                    None => {
                        let found = store
                            .find_user_by_external_id(scope, external_id)
                            .await?
                            .map(|u| u.id);
                        users.insert(external_id.clone(), found);
                        found
                    }
                },
                Err(_) => None,
            };
            let Some(user_id) = user_id else {
                let failure = ImportFailure::UserNotFound {
                    message_id: message.external_id.to_string(),
                    user: match &message.user {
                        Ok(id) | Err(id) => id.clone(),
                    },
                };
                tracing::warn!(%failure, "skipping message");
                report.failures.push(failure);
                continue;
            };

            let outcome = store
                .create_message(&NewMessage {
                    export_id,
                    server_id: channel.server_id,
                    channel_id: channel.id,
                    user_id,
                    external_id: message.external_id.to_string(),
                    timestamp: message.timestamp,
                    body: message.body.to_string(),
                    attachments_json: message.attachments_json.clone(),
                })
                .await?;
            if !outcome.is_created() {
                tracing::debug!(message = message.external_id, "message already imported");
            }
            report.messages.record(&outcome);
        }
        tracing::info!(
            created = report.messages.created,
            skipped = report.messages.skipped,
            failures = report.failures.len(),
            "messages"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn source(digest: &str) -> NewExport {
        NewExport {
            path: format!("/exports/{}.json", digest),
            name: format!("{}.json", digest),
            size_bytes: 42,
            digest: digest.to_string(),
        }
    }

    fn payload(value: serde_json::Value) -> ExportPayload {
        ExportPayload::from_slice(value.to_string().as_bytes()).unwrap()
    }

    fn direct_payload() -> ExportPayload {
        payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}, {"name": "Other"}],
                "users": {"u1": {"name": "Ann"}, "u2": {"name": "Bob"}},
                "channels": {
                    "c1": {"name": "general", "server": "s0"},
                    "c2": {"name": "random", "server": 1},
                    "c3": {"name": "lost", "server": 9}
                }
            },
            "data": {
                "c1": {
                    "m1": {"t": 1_000_000, "m": "hello", "u": "u1"},
                    "m2": {"t": 2_000_000, "m": "world", "u": "u2", "a": [{"url": "x.png"}]},
                    "m3": {"t": 3_000_000, "m": "ghost", "u": "nobody"}
                },
                "c2": {"m4": {"t": 4_000_000, "m": "elsewhere", "u": "u1"}},
                "c9": {"m5": {"t": 5_000_000, "m": "orphan", "u": "u1"}}
            }
        }))
    }

    #[tokio::test]
    async fn test_import_direct_payload() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let report = importer.import(&source("a"), &direct_payload()).await.unwrap();

        assert_eq!(report.user_refs, UserRefMode::Direct);
        assert_eq!(report.exports.created, 1);
        assert_eq!(report.servers.created, 2);
        assert_eq!(report.users.created, 2);
        assert_eq!(report.channels.created, 2);
        assert_eq!(report.messages.created, 3);
        assert_eq!(report.failures.len(), 3);

        let ids: Vec<&str> = report.failures.iter().map(|f| f.external_id()).collect();
        assert!(ids.contains(&"c3"));
        assert!(ids.contains(&"m3"));
        assert!(ids.contains(&"m5"));

        let m2 = store.find_message_by_external_id("m2").await.unwrap().unwrap();
        assert_eq!(m2.attachments_json.as_deref(), Some(r#"[{"url":"x.png"}]"#));
        assert_eq!(m2.timestamp.timestamp_millis(), 2_000_000);
        let m1 = store.find_message_by_external_id("m1").await.unwrap().unwrap();
        assert!(m1.attachments_json.is_none());
        assert!(m1.attachments().is_empty());
    }

    #[tokio::test]
    async fn test_reimport_is_noop() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let first = importer.import(&source("a"), &direct_payload()).await.unwrap();
        let before = store.counts().await.unwrap();

        let second = importer.import(&source("a"), &direct_payload()).await.unwrap();
        assert_eq!(second.created_total(), 0);
        assert_eq!(second.exports.skipped, 1);
        assert_eq!(second.servers.skipped, first.servers.total());
        assert_eq!(second.users.skipped, first.users.total());
        assert_eq!(second.channels.skipped, first.channels.total());
        assert_eq!(second.messages.skipped, first.messages.total());
        assert_eq!(second.failures, first.failures);
        assert_eq!(store.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reimport_export_scoped_is_noop() {
        let store = InMemoryStore::new();
        let mode = IdentityMode {
            scope: IdentityScope::Export,
            user_refs: UserRefMode::Auto,
        };
        let importer = Importer::new(&store, mode);
        importer.import(&source("a"), &direct_payload()).await.unwrap();
        let before = store.counts().await.unwrap();
        let again = importer.import(&source("a"), &direct_payload()).await.unwrap();
        assert_eq!(again.created_total(), 0);
        assert_eq!(store.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_export_scope_separates_identities() {
        let store = InMemoryStore::new();
        let mode = IdentityMode {
            scope: IdentityScope::Export,
            user_refs: UserRefMode::Direct,
        };
        let importer = Importer::new(&store, mode);
        let p1 = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m1": {"t": 1, "m": "first", "u": "u1"}}}
        }));
        let p2 = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann (renamed)"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m2": {"t": 2, "m": "second", "u": "u1"}}}
        }));
        let r1 = importer.import(&source("one"), &p1).await.unwrap();
        let r2 = importer.import(&source("two"), &p2).await.unwrap();
        assert_eq!(r2.servers.created, 1);
        assert_eq!(r2.users.created, 1);
        assert_eq!(r2.channels.created, 1);

        let u1 = store
            .find_user_by_external_id(Scope::Export(r1.export_id), "u1")
            .await
            .unwrap()
            .unwrap();
        let u2 = store
            .find_user_by_external_id(Scope::Export(r2.export_id), "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(u1.name, "Ann");
        assert_eq!(u2.name, "Ann (renamed)");
        assert_ne!(u1.id, u2.id);
    }

    #[tokio::test]
    async fn test_global_scope_shares_identities() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p1 = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m1": {"t": 1, "m": "first", "u": "u1"}}}
        }));
        let p2 = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {
                "m1": {"t": 1, "m": "edited text", "u": "u1"},
                "m2": {"t": 2, "m": "second", "u": "u1"}
            }}
        }));
        importer.import(&source("one"), &p1).await.unwrap();
        let r2 = importer.import(&source("two"), &p2).await.unwrap();
        assert_eq!(r2.exports.created, 1);
        assert_eq!(r2.servers.skipped, 1);
        assert_eq!(r2.users.skipped, 1);
        assert_eq!(r2.channels.skipped, 1);
        assert_eq!(r2.messages, PhaseCounts { created: 1, skipped: 1 });

        let m1 = store.find_message_by_external_id("m1").await.unwrap().unwrap();
        assert_eq!(m1.body, "first");
    }

    #[tokio::test]
    async fn test_indexed_user_refs() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"111": {"name": "Ann"}, "222": {"name": "Bob"}},
                "userindex": ["111", "222"],
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {
                "m1": {"t": 10, "m": "by bob", "u": 1},
                "m2": {"t": 20, "m": "bad index", "u": 7}
            }}
        }));
        let report = importer.import(&source("idx"), &p).await.unwrap();
        assert_eq!(report.user_refs, UserRefMode::Indexed);
        assert_eq!(report.messages.created, 1);
        assert_eq!(
            report.failures,
            vec![ImportFailure::UserNotFound {
                message_id: "m2".to_string(),
                user: "7".to_string(),
            }]
        );

        let m1 = store.find_message_by_external_id("m1").await.unwrap().unwrap();
        let bob = store.get_user(m1.user_id).await.unwrap().unwrap();
        assert_eq!(bob.external_id, "222");
    }

    #[tokio::test]
    async fn test_user_list_with_side_index() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": [{"name": "Ann"}, {"name": "Bob"}],
                "userindex": ["111", "222"],
                "channels": {"c1": {"name": "general", "server": "Guild"}}
            },
            "data": {"c1": {"m1": {"t": 10, "m": "hi", "u": 0}}}
        }));
        let report = importer.import(&source("list"), &p).await.unwrap();
        assert_eq!(report.users.created, 2);
        assert_eq!(report.channels.created, 1);
        let ann = store
            .find_user_by_external_id(Scope::Global, "111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ann.name, "Ann");
    }

    #[tokio::test]
    async fn test_server_reference_by_unknown_name() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {},
                "channels": {"c1": {"name": "general", "server": "Nowhere"}}
            },
            "data": {}
        }));
        let report = importer.import(&source("srv"), &p).await.unwrap();
        assert_eq!(report.channels.created, 0);
        assert_eq!(
            report.failures,
            vec![ImportFailure::ServerNotFound {
                channel_id: "c1".to_string(),
                server: "Nowhere".to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_section_is_malformed() {
        let err = ExportPayload::from_slice(br#"{"meta": {"servers": []}}"#).unwrap_err();
        assert!(matches!(err, ImportError::Malformed(_)));
    }

    #[test]
    fn test_non_numeric_timestamp_is_malformed() {
        let raw = json!({
            "meta": {"servers": [], "users": {}, "channels": {}},
            "data": {"c1": {"m1": {"t": "yesterday", "m": "x", "u": "u1"}}}
        });
        let err = ExportPayload::from_slice(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_invalid_payload_writes_nothing() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": [{"name": "No Id"}],
                "channels": {}
            },
            "data": {}
        }));
        let err = importer.import(&source("bad"), &p).await.unwrap_err();
        assert!(matches!(err, ImportError::Invalid(_)));
        assert_eq!(store.counts().await.unwrap(), crate::models::StoreCounts::default());
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_writes_nothing() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m1": {"t": i64::MAX, "m": "far future", "u": "u1"}}}
        }));
        let err = importer.import(&source("far"), &p).await.unwrap_err();
        assert!(matches!(err, ImportError::Invalid(_)));
        assert_eq!(store.counts().await.unwrap().servers, 0);
    }

    #[tokio::test]
    async fn test_timestamp_without_room_for_context_rejected() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let last = DateTime::<Utc>::MAX_UTC.timestamp_millis();
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m1": {"t": last, "m": "end of time", "u": "u1"}}}
        }));
        let err = importer.import(&source("edge"), &p).await.unwrap_err();
        assert!(matches!(err, ImportError::Invalid(_)));
        assert_eq!(store.counts().await.unwrap().messages, 0);

        assert!(timestamp_from_millis(last).is_none());
        assert!(timestamp_from_millis(DateTime::<Utc>::MIN_UTC.timestamp_millis()).is_none());
        assert!(timestamp_from_millis(last - 2 * 3_600_000).is_some());
    }

    #[test]
    fn test_server_ref_positions() {
        assert_eq!(RawRef::Index(2).position(), Some(2));
        assert_eq!(RawRef::Text("3".to_string()).position(), Some(3));
        assert_eq!(RawRef::Text("s0".to_string()).position(), Some(0));
        assert_eq!(RawRef::Text("s".to_string()).position(), None);
        assert_eq!(RawRef::Text("Guild".to_string()).position(), None);
    }

    #[test]
    fn test_user_ref_mode_auto() {
        let with_index = payload(json!({
            "meta": {"servers": [], "users": {}, "channels": {}, "userindex": []},
            "data": {}
        }));
        let without = payload(json!({
            "meta": {"servers": [], "users": {}, "channels": {}},
            "data": {}
        }));
        assert_eq!(UserRefMode::Auto.resolve(&with_index), UserRefMode::Indexed);
        assert_eq!(UserRefMode::Auto.resolve(&without), UserRefMode::Direct);
        assert_eq!(UserRefMode::Direct.resolve(&with_index), UserRefMode::Direct);
    }

    #[tokio::test]
    async fn test_deduplicated_export_with_userindex() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}],
                "users": {"111": {"name": "Ann"}},
                "userindex": ["111"],
                "channels": {"c1": {"name": "general", "server": 0}}
            },
            "data": {"c1": {"m1": {"t": 1_000, "m": "hi", "u": "111"}}}
        }));
        let report = importer.import(&source("dedup"), &p).await.unwrap();
        assert_eq!(report.user_refs, UserRefMode::Direct);
        assert_eq!(report.messages.created, 1);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_server_named_like_a_position() {
        let store = InMemoryStore::new();
        let importer = Importer::new(&store, IdentityMode::default());
        let p = payload(json!({
            "meta": {
                "servers": [{"name": "Guild"}, {"name": "2024"}, {"name": "s0"}],
                "users": {"u1": {"name": "Ann"}},
                "channels": {
                    "c1": {"name": "yearly", "server": "2024"},
                    "c2": {"name": "odd", "server": "s0"},
                    "c3": {"name": "general", "server": "s1"},
                    "c4": {"name": "lost", "server": 7}
                }
            },
            "data": {}
        }));
        let report = importer.import(&source("digits"), &p).await.unwrap();
        assert_eq!(report.channels.created, 3);
        assert_eq!(
            report.failures,
            vec![ImportFailure::ServerNotFound {
                channel_id: "c4".to_string(),
                server: "7".to_string(),
            }]
        );

        for (channel, expected) in [("c1", "2024"), ("c2", "s0"), ("c3", "2024")] {
            let channel = store
                .find_channel_by_external_id(Scope::Global, channel)
                .await
                .unwrap()
                .unwrap();
            let server = store.get_server(channel.server_id).await.unwrap().unwrap();
            assert_eq!(server.name, expected);
        }
    }
}
