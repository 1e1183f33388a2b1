//! Core data models used throughout Chat Archive.
//!
//! Entities are created by the [`Store`](crate::store::Store) and carry
//! store-assigned ids. Natural keys (`external_id`, server `name`) come from
//! the export files and are unique within an [`IdentityScope`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Id of an ingested export file.
    ExportId
);
entity_id!(
    /// Id of a server (chat community).
    ServerId
);
entity_id!(ChannelId);
entity_id!(UserId);
entity_id!(MessageId);

/// Whether natural keys are unique across the whole archive or only
/// within the export that introduced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityScope {
    #[default]
    Global,
    Export,
}

/// The concrete uniqueness scope of one entity: everything in
/// [`IdentityScope::Global`] mode shares one scope, otherwise each export
/// has its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Export(ExportId),
}

impl Scope {
    pub fn for_export(mode: IdentityScope, export: ExportId) -> Self {
        match mode {
            IdentityScope::Global => Scope::Global,
            IdentityScope::Export => Scope::Export(export),
        }
    }

    /// Integer key persisted in the `scope` column (0 for global).
    pub fn key(&self) -> i64 {
        match self {
            Scope::Global => 0,
            Scope::Export(id) => id.0,
        }
    }

    pub fn export_id(&self) -> Option<ExportId> {
        match self {
            Scope::Global => None,
            Scope::Export(id) => Some(*id),
        }
    }

    /// Inverse of [`Scope::key`].
    pub fn from_key(key: i64) -> Self {
        if key == 0 {
            Scope::Global
        } else {
            Scope::Export(ExportId(key))
        }
    }
}

/// One ingested export file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Export {
    pub id: ExportId,
    pub path: String,
    pub name: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the file content; the export's natural key.
    pub digest: String,
    pub imported_at: DateTime<Utc>,
}

/// Attributes of an export to be created.
#[derive(Debug, Clone)]
pub struct NewExport {
    pub path: String,
    pub name: String,
    pub size_bytes: i64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Server {
    pub id: ServerId,
    /// The scoping export; `None` for globally scoped entities.
    pub export_id: Option<ExportId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: ChannelId,
    pub export_id: Option<ExportId>,
    pub server_id: ServerId,
    pub external_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub export_id: Option<ExportId>,
    pub external_id: String,
    pub name: String,
}

/// One posted message as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub export_id: ExportId,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Attachment list serialized verbatim from the export.
    pub attachments_json: Option<String>,
}

impl Message {
    /// Parsed attachment list. Empty when absent or not a JSON array.
    pub fn attachments(&self) -> Vec<serde_json::Value> {
        self.attachments_json
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<serde_json::Value>>(raw).ok())
            .unwrap_or_default()
    }
}

/// Attributes of a message to be created.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub export_id: ExportId,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub attachments_json: Option<String>,
}

/// A message joined with the names of its author, channel and server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub user_external_id: String,
    pub user_name: String,
    pub channel_name: String,
    pub server_name: String,
}

impl ResolvedMessage {
    pub fn formatted_timestamp(&self) -> String {
        self.message
            .timestamp
            .format("%b %d, %Y %I:%M:%S %p")
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    #[serde(flatten)]
    pub channel: Channel,
    pub message_count: u64,
}

/// Row counts per table, used for reporting and idempotence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub exports: u64,
    pub servers: u64,
    pub channels: u64,
    pub users: u64,
    pub messages: u64,
}
