//! # Chat Archive CLI (`chatarc`)
//!
//! ## Usage
//!
//! ```bash
//! chatarc --config ./config/chatarc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatarc init` | Create the SQLite database and schema |
//! | `chatarc import <PATTERN>...` | Import export files (paths or globs) |
//! | `chatarc search "<query>"` | Substring search over message bodies |
//! | `chatarc view <id>` | Show a message with its one-hour context |
//! | `chatarc channel <id>` | List a channel's messages |
//! | `chatarc user <id>` | List a user's messages |
//! | `chatarc servers` / `channels` / `users` / `exports` | Browse listings |
//! | `chatarc serve` | Start the JSON HTTP API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chat_archive::chat_archive_core::query::PageRequest;
use chat_archive::{browse, config, import_cmd, migrate, search, server};

/// Chat Archive: import chat exports into SQLite and search them.
#[derive(Parser)]
#[command(name = "chatarc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chatarc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PageArgs {
    /// Page number, starting at 1.
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Messages per page. Defaults to `[query].default_per_page`.
    #[arg(long)]
    per_page: Option<u32>,
}

impl PageArgs {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.per_page)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import one or more export files.
    ///
    /// Each argument is a path or a glob pattern (quote it so the shell
    /// does not expand it). Matches are imported in sorted order; files
    /// already imported are skipped entity by entity.
    Import {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Search message bodies (case-insensitive substring).
    Search {
        query: String,

        /// Restrict results to one server id.
        #[arg(long)]
        server: Option<i64>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Show one message and the messages around it.
    View { id: i64 },

    /// List the messages of a channel.
    Channel {
        id: i64,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List the messages of a user.
    User {
        id: i64,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List servers.
    Servers,

    /// List channels with message counts.
    Channels {
        /// Only channels of this server id.
        #[arg(long)]
        server: Option<i64>,
    },

    /// List users with message counts.
    Users,

    /// List imported export files.
    Exports,

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { patterns } => {
            import_cmd::run_import(&cfg, &patterns).await?;
        }
        Commands::Search {
            query,
            server,
            page,
        } => {
            search::run_search(&cfg, &query, server, page.request()).await?;
        }
        Commands::View { id } => {
            search::run_view(&cfg, id).await?;
        }
        Commands::Channel { id, page } => {
            search::run_channel(&cfg, id, page.request()).await?;
        }
        Commands::User { id, page } => {
            search::run_user(&cfg, id, page.request()).await?;
        }
        Commands::Servers => browse::run_servers(&cfg).await?,
        Commands::Channels { server } => browse::run_channels(&cfg, server).await?,
        Commands::Users => browse::run_users(&cfg).await?,
        Commands::Exports => browse::run_exports(&cfg).await?,
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
