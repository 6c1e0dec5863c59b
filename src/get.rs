//! Story retrieval by ID.
//!
//! Prints a consolidated story with its member articles, entities and
//! stock impacts. Used by `nd get`.

use anyhow::{bail, Result};

use newsdesk_core::store::{Store, StoryDetail};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn get_story(config: &Config, id: &str) -> Result<StoryDetail> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let detail = store.get_story_detail(id).await;
    pool.close().await;

    match detail? {
        Some(d) => Ok(d),
        None => bail!("story not found: {}", id),
    }
}

pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let detail = get_story(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let story = &detail.story;
    println!("--- Story ---");
    println!("id:           {}", story.id);
    println!("title:        {}", story.title);
    println!(
        "published_at: {}",
        story
            .published_at
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    );
    if !story.sources.is_empty() {
        println!("sources:      {}", story.sources.join(", "));
    }
    println!("members:      {}", story.member_ids.join(", "));
    println!();

    println!("--- Body ---");
    println!("{}", story.body);
    println!();

    println!("--- Entities ({}) ---", detail.entities.len());
    for e in &detail.entities {
        println!(
            "  {:<10} {:<32} {:.2}  \"{}\"",
            e.category.as_str(),
            e.name,
            e.confidence,
            e.mention
        );
    }
    println!();

    println!("--- Impacts ({}) ---", detail.impacts.len());
    for i in &detail.impacts {
        println!(
            "  {:<12} {:<12} {:.2}  {} via {}",
            i.kind.as_str(),
            i.symbol,
            i.confidence,
            i.sector.as_deref().unwrap_or("-"),
            i.source_entity
        );
    }

    Ok(())
}
