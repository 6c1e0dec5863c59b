//! `nd query`: classify a free-text question and print ranked stories.

use anyhow::Result;

use newsdesk_core::QueryResponse;

use crate::config::Config;
use crate::db;
use crate::engine::Engine;
use crate::provider;
use crate::sqlite_store::SqliteStore;

/// Run a query against the configured database.
pub async fn query_stories(config: &Config, text: &str, limit: Option<i64>) -> Result<QueryResponse> {
    let engine = Engine::from_config(config)?;
    let client = provider::create_client(&config.model)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let limit = limit.unwrap_or(config.retrieval.final_limit).max(1) as usize;
    let response = engine.query.query(&client, &store, text, limit).await;

    pool.close().await;
    response
}

pub async fn run_query(config: &Config, text: &str, limit: Option<i64>, json: bool) -> Result<()> {
    let response = query_stories(config, text, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("intent: {}", response.intent.label());
    if !response.entities.is_empty() {
        let names: Vec<String> = response
            .entities
            .iter()
            .map(|e| format!("{} ({}, {:.2})", e.name, e.category.as_str(), e.confidence))
            .collect();
        println!("entities: {}", names.join(", "));
    }
    println!();

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, ranked) in response.results.iter().enumerate() {
        let story = &ranked.story;
        let date = story
            .published_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());

        println!("{}. [{:.2}] {}", i + 1, ranked.score, story.title);
        println!("    published: {}", date);
        println!("    via: {}", ranked.via);
        if !story.sources.is_empty() {
            println!("    sources: {}", story.sources.join(", "));
        }
        println!("    articles: {}", story.member_ids.len());
        println!("    id: {}", story.id);
        println!();
    }

    Ok(())
}
