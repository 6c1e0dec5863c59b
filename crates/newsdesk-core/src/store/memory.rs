//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. `save_story` holds
//! the story write lock across its existence check and insert, so two
//! writers for the same story id cannot both succeed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{Article, ConsolidatedStory, Entity, EntityCategory, StockImpact};
use crate::symbols::normalize_name;

use super::{EntityHit, ImpactHit, Store, StoreStats, StoryDetail};

struct StoredStory {
    story: ConsolidatedStory,
    embedding: Vec<f32>,
    /// Insertion order, so scans are deterministic.
    seq: usize,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    articles: RwLock<HashMap<String, (Article, String)>>,
    stories: RwLock<HashMap<String, StoredStory>>,
    entities: RwLock<HashMap<String, Vec<Entity>>>,
    impacts: RwLock<HashMap<String, Vec<StockImpact>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Story id an article was folded into, if it has been saved.
    pub fn story_of(&self, article_id: &str) -> Result<Option<String>> {
        Ok(read(&self.articles)?.get(article_id).map(|(_, s)| s.clone()))
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Flatten a per-story map into hits, ordered by story insertion order.
fn collect_hits<T: Clone, H>(
    by_story: &HashMap<String, Vec<T>>,
    stories: &HashMap<String, StoredStory>,
    keep: impl Fn(&T) -> bool,
    hit: impl Fn(&str, &T) -> H,
) -> Vec<H> {
    let mut ids: Vec<&String> = by_story.keys().collect();
    ids.sort_by_key(|id| stories.get(*id).map(|s| s.seq).unwrap_or(usize::MAX));
    ids.into_iter()
        .flat_map(|id| {
            by_story[id]
                .iter()
                .filter(|t| keep(t))
                .map(|t| hit(id, t))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_article(&self, article: &Article, story_id: &str) -> Result<()> {
        let mut articles = write(&self.articles)?;
        match articles.get(&article.id) {
            Some((_, owner)) if owner == story_id => Ok(()),
            Some((_, owner)) => Err(PipelineError::already_ingested(&article.id, owner).into()),
            None => {
                articles.insert(article.id.clone(), (article.clone(), story_id.to_string()));
                Ok(())
            }
        }
    }

    async fn article_stories(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        let articles = read(&self.articles)?;
        Ok(ids
            .iter()
            .filter_map(|id| articles.get(id).map(|(_, story)| (id.clone(), story.clone())))
            .collect())
    }

    async fn save_story(&self, story: &ConsolidatedStory, embedding: &[f32]) -> Result<()> {
        let mut stories = write(&self.stories)?;
        if stories.contains_key(&story.id) {
            return Err(PipelineError::StorageConflict {
                story_id: story.id.clone(),
            }
            .into());
        }
        let seq = stories.len();
        stories.insert(
            story.id.clone(),
            StoredStory {
                story: story.clone(),
                embedding: embedding.to_vec(),
                seq,
            },
        );
        Ok(())
    }

    async fn save_entities(&self, story_id: &str, entities: &[Entity]) -> Result<()> {
        write(&self.entities)?.insert(story_id.to_string(), entities.to_vec());
        Ok(())
    }

    async fn save_impacts(&self, story_id: &str, impacts: &[StockImpact]) -> Result<()> {
        write(&self.impacts)?.insert(story_id.to_string(), impacts.to_vec());
        Ok(())
    }

    async fn find_stories_by_symbol(&self, symbol: &str) -> Result<Vec<ImpactHit>> {
        let impacts = read(&self.impacts)?;
        let stories = read(&self.stories)?;
        Ok(collect_hits(
            &impacts,
            &stories,
            |i| i.symbol.eq_ignore_ascii_case(symbol),
            |id, i| ImpactHit {
                story_id: id.to_string(),
                impact: i.clone(),
            },
        ))
    }

    async fn find_stories_by_sector(&self, sector: &str) -> Result<Vec<ImpactHit>> {
        let impacts = read(&self.impacts)?;
        let stories = read(&self.stories)?;
        Ok(collect_hits(
            &impacts,
            &stories,
            |i| i.sector.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sector)),
            |id, i| ImpactHit {
                story_id: id.to_string(),
                impact: i.clone(),
            },
        ))
    }

    async fn find_stories_by_regulator(&self, regulator: &str) -> Result<Vec<EntityHit>> {
        let key = normalize_name(regulator);
        let entities = read(&self.entities)?;
        let stories = read(&self.stories)?;
        Ok(collect_hits(
            &entities,
            &stories,
            |e| e.category == EntityCategory::Regulator && normalize_name(&e.name) == key,
            |id, e| EntityHit {
                story_id: id.to_string(),
                entity: e.clone(),
            },
        ))
    }

    async fn all_story_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let stories = read(&self.stories)?;
        let mut all: Vec<&StoredStory> = stories.values().collect();
        all.sort_by_key(|s| s.seq);
        Ok(all
            .into_iter()
            .map(|s| (s.story.id.clone(), s.embedding.clone()))
            .collect())
    }

    async fn all_entities(&self) -> Result<Vec<EntityHit>> {
        let entities = read(&self.entities)?;
        let stories = read(&self.stories)?;
        Ok(collect_hits(
            &entities,
            &stories,
            |_| true,
            |id, e| EntityHit {
                story_id: id.to_string(),
                entity: e.clone(),
            },
        ))
    }

    async fn get_stories(&self, ids: &[String]) -> Result<Vec<ConsolidatedStory>> {
        let stories = read(&self.stories)?;
        Ok(ids
            .iter()
            .filter_map(|id| stories.get(id).map(|s| s.story.clone()))
            .collect())
    }

    async fn get_story_detail(&self, id: &str) -> Result<Option<StoryDetail>> {
        let story = match read(&self.stories)?.get(id) {
            Some(s) => s.story.clone(),
            None => return Ok(None),
        };
        let entities = read(&self.entities)?.get(id).cloned().unwrap_or_default();
        let impacts = read(&self.impacts)?.get(id).cloned().unwrap_or_default();
        Ok(Some(StoryDetail {
            story,
            entities,
            impacts,
        }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let impacts = read(&self.impacts)?;
        let mut impacts_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut impacts_by_confidence = StoreStats::empty_confidence_buckets();
        for i in impacts.values().flatten() {
            *impacts_by_kind.entry(i.kind.to_string()).or_default() += 1;
            *impacts_by_confidence.entry(i.bucket().to_string()).or_default() += 1;
        }
        Ok(StoreStats {
            articles: read(&self.articles)?.len() as u64,
            stories: read(&self.stories)?.len() as u64,
            entities: read(&self.entities)?.values().map(|v| v.len() as u64).sum(),
            impacts: impacts.values().map(|v| v.len() as u64).sum(),
            impacts_by_kind,
            impacts_by_confidence,
        })
    }
}
