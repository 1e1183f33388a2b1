//! Terminal output for message listings: `chatarc search`, `chatarc channel`
//! and `chatarc user`.

use anyhow::{bail, Result};
use std::sync::Arc;

use chat_archive_core::models::{ChannelId, MessageId, ResolvedMessage, ServerId, UserId};
use chat_archive_core::query::{Page, PageRequest, QueryEngine};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Build a query engine over the configured database.
pub async fn open_engine(config: &Config) -> Result<QueryEngine> {
    let store = SqliteStore::open(config).await?;
    Ok(QueryEngine::new(Arc::new(store), config.query_options()))
}

/// Print one message the way every listing shows it.
pub async fn print_message(engine: &QueryEngine, message: &ResolvedMessage) -> Result<()> {
    println!(
        "[{}] #{} ({}) {}",
        message.formatted_timestamp(),
        message.channel_name,
        message.server_name,
        message.user_name
    );
    for line in engine.plain_text(message).await?.lines() {
        println!("    {}", line);
    }
    let attachments = message.message.attachments();
    if !attachments.is_empty() {
        println!("    ({} attachment(s))", attachments.len());
    }
    println!("    id: {}", message.message.id);
    Ok(())
}

async fn print_page(engine: &QueryEngine, heading: &str, page: &Page<ResolvedMessage>) -> Result<()> {
    if page.total == 0 {
        println!("No results.");
        return Ok(());
    }
    println!(
        "{} ({} messages, page {} of {})",
        heading,
        page.total,
        page.page,
        page.pages()
    );
    println!();
    for message in &page.items {
        print_message(engine, message).await?;
        println!();
    }
    if let Some(next) = page.next_num() {
        println!("More results: --page {}", next);
    }
    Ok(())
}

fn not_found(what: &str) -> ! {
    eprintln!("Error: {} not found", what);
    std::process::exit(1);
}

pub async fn run_search(
    config: &Config,
    query: &str,
    server: Option<i64>,
    page: PageRequest,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("search query must not be empty");
    }

    let engine = open_engine(config).await?;
    // 0 selects all servers, as in the API.
    let server = server.filter(|&id| id != 0);
    let Some(results) = engine.search(query, server.map(ServerId), page).await? else {
        not_found(&format!("server {}", server.unwrap_or_default()));
    };
    print_page(&engine, &format!("Search \"{}\"", query), &results).await
}

pub async fn run_channel(config: &Config, id: i64, page: PageRequest) -> Result<()> {
    let engine = open_engine(config).await?;
    let Some(channel) = engine.channel(ChannelId(id)).await? else {
        not_found(&format!("channel {}", id));
    };
    let Some(results) = engine.list_by_channel(channel.id, page).await? else {
        not_found(&format!("channel {}", id));
    };
    print_page(&engine, &format!("Channel #{}", channel.name), &results).await
}

pub async fn run_user(config: &Config, id: i64, page: PageRequest) -> Result<()> {
    let engine = open_engine(config).await?;
    let Some(user) = engine.user(UserId(id)).await? else {
        not_found(&format!("user {}", id));
    };
    let Some(results) = engine.list_by_user(user.id, page).await? else {
        not_found(&format!("user {}", id));
    };
    print_page(&engine, &format!("User {}", user.name), &results).await
}

pub async fn run_view(config: &Config, id: i64) -> Result<()> {
    let engine = open_engine(config).await?;
    let Some(view) = engine.view(MessageId(id)).await? else {
        not_found(&format!("message {}", id));
    };

    println!("--- Message ---");
    print_message(&engine, &view.message).await?;
    println!();
    println!("--- Context ({} messages within one hour) ---", view.context.len());
    for message in &view.context {
        let marker = if message.message.id == view.message.message.id {
            ">>"
        } else {
            "  "
        };
        println!(
            "{} [{}] {}: {}",
            marker,
            message.formatted_timestamp(),
            message.user_name,
            engine.plain_text(message).await?.replace('\n', " ")
        );
    }
    Ok(())
}
