//! News for one ticker. Used by `nd stock`.
//!
//! The argument may be a ticker, a company name or an alias; it is resolved
//! through the configured symbol table, so `nd stock "HDFC Bank"` and
//! `nd stock hdfcbank` list the same stories.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::Serialize;

use newsdesk_core::models::{ConsolidatedStory, StockImpact};
use newsdesk_core::store::Store;
use newsdesk_core::SymbolTable;

use crate::config::Config;
use crate::db;
use crate::engine::Engine;
use crate::sqlite_store::SqliteStore;

/// A story together with its impacts on the requested symbol.
#[derive(Debug, Serialize)]
pub struct StockStory {
    pub story: ConsolidatedStory,
    pub impacts: Vec<StockImpact>,
}

#[derive(Debug, Serialize)]
pub struct StockNews {
    pub symbol: String,
    /// Listed company name, when the symbol belongs to one.
    pub company: Option<String>,
    /// Newest first; undated stories last.
    pub stories: Vec<StockStory>,
}

/// Canonical ticker and company name for `input`.
///
/// Symbols that only appear as sector members resolve without a company.
pub fn resolve_symbol(table: &SymbolTable, input: &str) -> Result<(String, Option<String>)> {
    if let Some(listing) = table.resolve_company(input) {
        return Ok((listing.symbol.clone(), Some(listing.name.clone())));
    }
    let symbol = input.trim().to_uppercase();
    let member = table
        .sectors()
        .iter()
        .any(|s| table.sector_members(&s.name).iter().any(|m| m.eq_ignore_ascii_case(&symbol)));
    if member {
        return Ok((symbol, None));
    }
    bail!("unknown symbol or company: '{}'", input.trim())
}

/// Stories with at least one impact on `symbol`, grouped per story.
pub async fn stock_news<S: Store + ?Sized>(
    store: &S,
    symbol: &str,
    company: Option<String>,
) -> Result<StockNews> {
    let hits = store.find_stories_by_symbol(symbol).await?;

    let mut order: Vec<String> = Vec::new();
    let mut by_story: HashMap<String, Vec<StockImpact>> = HashMap::new();
    for hit in hits {
        if !by_story.contains_key(&hit.story_id) {
            order.push(hit.story_id.clone());
        }
        by_story.entry(hit.story_id).or_default().push(hit.impact);
    }

    let mut stories: Vec<StockStory> = store
        .get_stories(&order)
        .await?
        .into_iter()
        .map(|story| StockStory {
            impacts: by_story.remove(&story.id).unwrap_or_default(),
            story,
        })
        .collect();
    stories.sort_by(|a, b| {
        b.story
            .published_at
            .cmp(&a.story.published_at)
            .then_with(|| a.story.id.cmp(&b.story.id))
    });

    Ok(StockNews {
        symbol: symbol.to_string(),
        company,
        stories,
    })
}

pub async fn run_stock(config: &Config, input: &str, json: bool) -> Result<()> {
    let engine = Engine::from_config(config)?;
    let (symbol, company) = resolve_symbol(&engine.table, input)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let news = stock_news(&store, &symbol, company).await;
    pool.close().await;
    let news = news?;

    if json {
        println!("{}", serde_json::to_string_pretty(&news)?);
        return Ok(());
    }

    match &news.company {
        Some(name) => println!("{} ({}): {} stories", news.symbol, name, news.stories.len()),
        None => println!("{}: {} stories", news.symbol, news.stories.len()),
    }
    println!();

    for (i, item) in news.stories.iter().enumerate() {
        let story = &item.story;
        let date = story
            .published_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());

        println!("{}. {}", i + 1, story.title);
        println!("    published: {}", date);
        for impact in &item.impacts {
            println!(
                "    impact: {} {:.2} via {}",
                impact.kind, impact.confidence, impact.source_entity
            );
        }
        println!("    id: {}", story.id);
        println!();
    }

    Ok(())
}
