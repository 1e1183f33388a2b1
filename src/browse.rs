//! `chatarc servers`, `chatarc channels`, `chatarc users` and
//! `chatarc exports`.

use anyhow::Result;

use chat_archive_core::models::ServerId;

use crate::config::Config;
use crate::search::open_engine;

pub async fn run_servers(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let servers = engine.servers().await?;
    if servers.is_empty() {
        println!("No servers.");
        return Ok(());
    }
    for server in servers {
        match server.export_id {
            Some(export) => println!("{:>6}  {}  (export {})", server.id, server.name, export),
            None => println!("{:>6}  {}", server.id, server.name),
        }
    }
    Ok(())
}

pub async fn run_channels(config: &Config, server: Option<i64>) -> Result<()> {
    let engine = open_engine(config).await?;
    let channels = engine.channels(server.map(ServerId)).await?;
    if channels.is_empty() {
        println!("No channels.");
        return Ok(());
    }
    for summary in channels {
        println!(
            "{:>6}  #{}  server {}  {} messages",
            summary.channel.id,
            summary.channel.name,
            summary.channel.server_id,
            summary.message_count
        );
    }
    Ok(())
}

pub async fn run_users(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let users = engine.users().await?;
    if users.is_empty() {
        println!("No users.");
        return Ok(());
    }
    for summary in users {
        println!(
            "{:>6}  {}  ({})  {} messages",
            summary.user.id, summary.user.name, summary.user.external_id, summary.message_count
        );
    }
    Ok(())
}

pub async fn run_exports(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let exports = engine.exports().await?;
    if exports.is_empty() {
        println!("No exports imported.");
        return Ok(());
    }
    for export in exports {
        println!(
            "{:>6}  {}  {} bytes  {}  imported {}",
            export.id,
            export.name,
            export.size_bytes,
            &export.digest[..export.digest.len().min(12)],
            export.imported_at.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    Ok(())
}
