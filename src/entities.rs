//! Every extracted entity, grouped by category. Used by `nd entities`.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use serde::Serialize;

use newsdesk_core::store::{EntityHit, Store};
use newsdesk_core::symbols::normalize_name;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// One distinct entity and how often it was seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub name: String,
    /// Number of stories mentioning it.
    pub stories: usize,
    pub max_confidence: f64,
}

/// Group entity hits by category, merging names that normalise alike.
///
/// Within a category, entities are ordered by story count (descending),
/// then name.
pub fn summarize(hits: &[EntityHit]) -> BTreeMap<String, Vec<EntitySummary>> {
    let mut groups: BTreeMap<String, Vec<EntitySummary>> = BTreeMap::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for hit in hits {
        let e = &hit.entity;
        let category = e.category.as_str().to_string();
        let group = groups.entry(category.clone()).or_default();
        match index.get(&(category.clone(), normalize_name(&e.name))) {
            Some(&i) => {
                let summary = &mut group[i];
                summary.stories += 1;
                summary.max_confidence = summary.max_confidence.max(e.confidence);
            }
            None => {
                index.insert((category, normalize_name(&e.name)), group.len());
                group.push(EntitySummary {
                    name: e.name.clone(),
                    stories: 1,
                    max_confidence: e.confidence,
                });
            }
        }
    }

    for group in groups.values_mut() {
        group.sort_by(|a, b| b.stories.cmp(&a.stories).then_with(|| a.name.cmp(&b.name)));
    }
    groups
}

pub async fn run_entities(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let hits = SqliteStore::new(pool.clone()).all_entities().await;
    pool.close().await;
    let groups = summarize(&hits?);

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No entities.");
        return Ok(());
    }

    for (category, entities) in &groups {
        println!("--- {} ({}) ---", category, entities.len());
        for e in entities {
            println!("  {:<32} {:>4} stories  max {:.2}", e.name, e.stories, e.max_confidence);
        }
        println!();
    }

    Ok(())
}
