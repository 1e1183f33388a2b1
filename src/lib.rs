//! # Chat Archive
//!
//! Imports chat-platform export files into a normalized SQLite archive and
//! serves search and browsing over it from a CLI (`chatarc`) and a JSON
//! HTTP API.
//!
//! The entity model, importer, query engine and text renderer live in
//! [`chat_archive_core`]; this crate adds the SQLite [`Store`] backend,
//! configuration, the CLI commands and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌──────────────┐
//! │ export files │──▶│ Importer │──▶│ SQLite store │
//! └──────────────┘   └──────────┘   └──────┬───────┘
//!                                          │
//!                                   ┌──────┴───────┐
//!                                   │ Query Engine │
//!                                   └──────┬───────┘
//!                          ┌───────────────┤
//!                          ▼               ▼
//!                     ┌─────────┐     ┌──────────┐
//!                     │   CLI   │     │   HTTP   │
//!                     │(chatarc)│     │  (JSON)  │
//!                     └─────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chatarc init
//! chatarc import 'exports/**/*.json'
//! chatarc search "deploy" --server 1
//! chatarc serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite [`Store`] implementation |
//! | [`import_cmd`] | File reading, digests and glob expansion for imports |
//! | [`search`] | Message listings for the terminal |
//! | [`browse`] | Server, channel, user and export listings |
//! | [`server`] | JSON HTTP API |
//!
//! [`Store`]: chat_archive_core::store::Store

pub mod browse;
pub mod config;
pub mod db;
pub mod import_cmd;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;

pub use chat_archive_core;
