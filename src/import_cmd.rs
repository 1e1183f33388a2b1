//! `chatarc import`: read export files from disk and feed them to the
//! importer.
//!
//! Arguments may be plain paths or glob patterns. Patterns are matched with
//! `globset` against every file under the pattern's literal base directory,
//! and all matches are imported one after another in sorted order.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobMatcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use chat_archive_core::error::ImportError;
use chat_archive_core::import::{ExportPayload, IdentityMode, ImportReport, Importer};
use chat_archive_core::models::NewExport;
use chat_archive_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Import one export file.
pub async fn import_file(
    store: &dyn Store,
    path: &Path,
    mode: IdentityMode,
) -> Result<ImportReport, ImportError> {
    let bytes = std::fs::read(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let payload = ExportPayload::from_slice(&bytes)?;

    let source = NewExport {
        path: path.display().to_string(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size_bytes: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        digest: digest_hex(&bytes),
    };

    Importer::new(store, mode).import(&source, &payload).await
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Longest leading run of path components without glob metacharacters.
fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        let part = component.as_os_str().to_string_lossy();
        if is_glob(&part) {
            break;
        }
        base.push(component);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    Ok(Glob::new(pattern)
        .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        .compile_matcher())
}

/// Expand plain paths and glob patterns into a sorted, de-duplicated list
/// of files.
pub fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        if !is_glob(pattern) {
            let path = PathBuf::from(pattern);
            if !path.is_file() {
                bail!("Export file does not exist: {}", path.display());
            }
            files.push(path);
            continue;
        }

        let matcher = build_matcher(pattern)?;
        let base = glob_base(pattern);
        let mut matched = 0usize;
        for entry in WalkDir::new(&base) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            // Patterns without a directory part match relative to `.`.
            let candidate = path.strip_prefix("./").unwrap_or(path);
            if matcher.is_match(candidate) || matcher.is_match(path) {
                files.push(path.to_path_buf());
                matched += 1;
            }
        }
        if matched == 0 {
            tracing::warn!(pattern = %pattern, "pattern matched no files");
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn print_report(path: &Path, report: &ImportReport) {
    println!("import {}", path.display());
    println!("  export id: {}", report.export_id);
    println!("  user refs: {}", report.user_refs);
    for (label, counts) in [
        ("exports", &report.exports),
        ("servers", &report.servers),
        ("users", &report.users),
        ("channels", &report.channels),
        ("messages", &report.messages),
    ] {
        println!(
            "  {:<9} created: {}, skipped: {}",
            format!("{}:", label),
            counts.created,
            counts.skipped
        );
    }
    if !report.failures.is_empty() {
        println!("  failures: {}", report.failures.len());
        for failure in &report.failures {
            println!("    {}", failure);
        }
    }
}

/// CLI entry point.
pub async fn run_import(config: &Config, patterns: &[String]) -> Result<()> {
    let files = expand_patterns(patterns)?;
    if files.is_empty() {
        println!("No export files matched.");
        return Ok(());
    }

    let store = SqliteStore::open(config).await?;
    let mode = config.identity_mode();

    let mut failed = 0usize;
    for path in &files {
        match import_file(&store, path, mode).await {
            Ok(report) => print_report(path, &report),
            Err(ImportError::Store(e)) => {
                store.pool().close().await;
                return Err(e.context(format!("Import of {} failed", path.display())));
            }
            Err(e) => {
                // Unreadable and malformed files are reported and the batch
                // continues.
                tracing::error!(path = %path.display(), error = %e, "import rejected");
                println!("import {}", path.display());
                println!("  error: {}", e);
                failed += 1;
            }
        }
    }

    store.pool().close().await;

    if failed > 0 {
        bail!("{} of {} export files could not be imported", failed, files.len());
    }
    Ok(())
}
