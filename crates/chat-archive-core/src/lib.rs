//! # Chat Archive Core
//!
//! Runtime-agnostic logic for Chat Archive: the normalized entity model,
//! the [`store::Store`] abstraction, the export importer, the query engine
//! and the message text renderer.
//!
//! This crate contains no tokio runtime, sqlx, filesystem I/O or HTTP
//! dependencies. The SQLite backend, CLI and HTTP API live in the
//! `chat-archive` crate and only reach the core through these modules.
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐   ┌──────────┐
//! │ Importer │──▶│  Store  │◀──│ Query Engine │──▶│ Renderer │
//! └──────────┘   └─────────┘   └──────────────┘   └──────────┘
//! ```

pub mod error;
pub mod import;
pub mod models;
pub mod query;
pub mod render;
pub mod store;
pub mod text;
