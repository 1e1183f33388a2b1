//! TOML configuration.
//!
//! Only `[db]` is required. `[import]`, `[query]` and `[server]` fall back to
//! their defaults when absent.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use chat_archive_core::import::{IdentityMode, UserRefMode};
use chat_archive_core::models::IdentityScope;
use chat_archive_core::query::{QueryOptions, DEFAULT_PER_PAGE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImportConfig {
    #[serde(default)]
    pub identity_scope: IdentityScope,
    #[serde(default)]
    pub user_refs: UserRefMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_per_page: DEFAULT_PER_PAGE,
        }
    }
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl Config {
    /// A config with every section defaulted and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            import: ImportConfig::default(),
            query: QueryConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn identity_mode(&self) -> IdentityMode {
        IdentityMode {
            scope: self.import.identity_scope,
            user_refs: self.import.user_refs,
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            default_per_page: self.query.default_per_page,
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.query.default_per_page < 1 {
        anyhow::bail!("query.default_per_page must be >= 1");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
