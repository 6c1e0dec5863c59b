//! Database statistics.
//!
//! A quick summary of what has been ingested: article and story counts,
//! how many articles were folded as duplicates, and the impact breakdown
//! by kind and by confidence (high `>= 0.8`, medium `>= 0.5`, low).
//! Used by `nd stats`.

use anyhow::Result;

use newsdesk_core::store::{Store, StoreStats};
use newsdesk_core::ConfidenceBucket;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn collect_stats(config: &Config) -> Result<StoreStats> {
    let pool = db::connect(config).await?;
    let stats = SqliteStore::new(pool.clone()).stats().await;
    pool.close().await;
    stats
}

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let stats = collect_stats(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Newsdesk — Database Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Articles:    {}", stats.articles);
    println!(
        "  Stories:     {} ({} duplicates folded)",
        stats.stories,
        stats.articles.saturating_sub(stats.stories)
    );
    println!("  Entities:    {}", stats.entities);
    println!("  Impacts:     {}", stats.impacts);

    if !stats.impacts_by_kind.is_empty() {
        println!();
        println!("  By impact kind:");
        for (kind, n) in &stats.impacts_by_kind {
            println!("    {:<14} {:>8}", kind, n);
        }
    }
    if stats.impacts > 0 {
        println!();
        println!("  By confidence:");
        for bucket in ConfidenceBucket::ALL {
            let n = stats.impacts_by_confidence.get(bucket.as_str()).copied().unwrap_or(0);
            println!("    {:<14} {:>8}", bucket.as_str(), n);
        }
    }
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
