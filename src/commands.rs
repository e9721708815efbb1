//! CLI command implementations.
//!
//! Each `run_*` function backs one `baobab` subcommand: it opens what it
//! needs from the config, does the work, and prints a human-readable result
//! to stdout. Errors propagate to `main`, which exits non-zero.

use std::path::Path;

use anyhow::{Context, Result};

use baobab_core::models::Ebook;
use baobab_core::store::ServerStore;
use baobab_core::sync::SyncOutcome;

use crate::catalog::{Catalog, EbookEdit, NewEbook, SyncReport};
use crate::config::Config;
use crate::remote_client::HttpRemoteStore;
use crate::remote_store::SqliteRemoteStore;
use crate::{db, migrate};

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Databases initialized successfully.");
    println!("  local:  {}", config.local.path.display());
    println!("  remote: {}", config.remote.path.display());
    Ok(())
}

pub async fn run_add(config: &Config, offline: bool, new: NewEbook) -> Result<()> {
    let catalog = Catalog::open(config, offline).await?;
    let ebook = catalog.add(new).await?;
    println!("Added {} ({})", ebook.id, ebook.filename);
    Ok(())
}

/// Extracts metadata from a local PDF, adds it to the catalog, and pushes it.
pub async fn run_upload(config: &Config, offline: bool, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file: {}", path.display()))?;

    let catalog = Catalog::open(config, offline).await?;
    let ebook = catalog.import(&filename, bytes).await?;
    println!("Added {} ({})", ebook.id, ebook.filename);
    print_ebook(&ebook);

    let outcome = catalog.sync_one(&ebook.id).await;
    println!();
    println!("sync: {}", outcome);
    Ok(())
}

pub async fn run_edit(config: &Config, offline: bool, id: &str, edit: EbookEdit) -> Result<()> {
    if edit.is_empty() {
        anyhow::bail!("nothing to edit: pass at least one of --title, --author, --filename, --tags");
    }
    let catalog = Catalog::open(config, offline).await?;
    let ebook = catalog.edit(id, edit).await?;
    println!("Updated {} (now {})", ebook.id, ebook.sync_status);
    Ok(())
}

pub async fn run_delete(config: &Config, offline: bool, id: &str) -> Result<()> {
    let catalog = Catalog::open(config, offline).await?;
    catalog.delete(id).await?;
    println!("Deleted {} (local copy only)", id);
    Ok(())
}

pub async fn run_show(config: &Config, offline: bool, id: &str) -> Result<()> {
    let catalog = Catalog::open(config, offline).await?;
    let ebook = catalog.get(id).await?;
    print_ebook(&ebook);
    Ok(())
}

/// Prints the catalog, then waits for the syncs the load launched.
pub async fn run_list(config: &Config, offline: bool, tag: Option<&str>) -> Result<()> {
    let catalog = Catalog::open(config, offline).await?;
    let (records, batch) = catalog.load().await?;

    let shown: Vec<&Ebook> = records
        .iter()
        .filter(|e| tag.map_or(true, |t| e.tags.iter().any(|x| x == t)))
        .collect();
    if shown.is_empty() {
        println!("No ebooks.");
    }
    for ebook in shown {
        print_summary(ebook);
    }

    if !batch.is_empty() {
        let report = batch.join().await;
        println!();
        print_report(&report);
    }
    Ok(())
}

pub async fn run_sync(config: &Config, offline: bool, id: Option<&str>) -> Result<()> {
    let catalog = Catalog::open(config, offline).await?;
    match id {
        Some(id) => {
            let outcome = catalog.sync_one(id).await;
            println!("{}: {}", id, outcome);
            if outcome == SyncOutcome::Missing {
                anyhow::bail!("no local ebook with id: {}", id);
            }
        }
        None => {
            let report = catalog.sync_pending().await?;
            for (id, outcome) in &report.outcomes {
                println!("{}: {}", id, outcome);
            }
            print_report(&report);
        }
    }
    Ok(())
}

/// Lists the server's records, over HTTP when `[remote].url` is set.
pub async fn run_remote_list(config: &Config) -> Result<()> {
    let records = match &config.remote.url {
        Some(url) => {
            let client = HttpRemoteStore::new(
                url,
                std::time::Duration::from_secs(config.remote.timeout_secs),
            )?;
            client.list().await?
        }
        None => {
            let pool = db::connect_remote(config).await?;
            migrate::migrate_remote(&pool).await?;
            let store = SqliteRemoteStore::new(pool);
            let records = store.list().await?;
            store.pool().close().await;
            records
        }
    };

    if records.is_empty() {
        println!("No remote records.");
    }
    for ebook in &records {
        println!(
            "#{:<5} {}  {}  ({})",
            ebook.internal_id.unwrap_or_default(),
            ebook.id,
            ebook.display_title(),
            ebook.filename
        );
    }
    Ok(())
}

fn print_summary(ebook: &Ebook) {
    let author = ebook
        .author
        .as_deref()
        .map(|a| format!(" by {}", a))
        .unwrap_or_default();
    println!(
        "{} [{}] {}{}  ({})",
        ebook.id,
        ebook.sync_status,
        ebook.display_title(),
        author,
        ebook.filename
    );
    if !ebook.tags.is_empty() {
        println!("    tags: {}", ebook.tags.join(", "));
    }
}

fn print_ebook(ebook: &Ebook) {
    println!("--- Ebook ---");
    println!("id:           {}", ebook.id);
    if let Some(internal_id) = ebook.internal_id {
        println!("internal_id:  {}", internal_id);
    }
    println!("filename:     {}", ebook.filename);
    println!("title:        {}", ebook.display_title());
    if let Some(ref author) = ebook.author {
        println!("author:       {}", author);
    }
    if !ebook.tags.is_empty() {
        println!("tags:         {}", ebook.tags.join(", "));
    }
    println!("uploaded_at:  {}", ebook.uploaded_at.to_rfc3339());
    println!("sync_status:  {}", ebook.sync_status);

    if let Some(ref meta) = ebook.metadata {
        println!();
        println!("--- Metadata ---");
        if let Some(ref subject) = meta.subject {
            println!("subject:      {}", subject);
        }
        if !meta.keywords.is_empty() {
            println!("keywords:     {}", meta.keywords.join(", "));
        }
        if let Some(pages) = meta.page_count {
            println!("pages:        {}", pages);
        }
        if let Some(ref creator) = meta.creator {
            println!("creator:      {}", creator);
        }
        if let Some(ref producer) = meta.producer {
            println!("producer:     {}", producer);
        }
        if let Some(created) = meta.creation_date {
            println!("created:      {}", created.to_rfc3339());
        }
        if let Some(modified) = meta.modification_date {
            println!("modified:     {}", modified.to_rfc3339());
        }
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "Sync: {} synced, {} failed, {} deferred (offline)",
        report.synced(),
        report.failed(),
        report.offline()
    );
    if report.superseded() > 0 {
        println!("      {} edited during sync, still pending", report.superseded());
    }
}
