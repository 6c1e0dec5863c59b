//! Storage abstraction for Newsdesk.
//!
//! The [`Store`] trait covers everything the pipeline writes and the query
//! engine reads: articles, consolidated stories with their embeddings,
//! entities, and stock impacts. Backends: [`memory::InMemoryStore`] here,
//! and the SQLite store in the `newsdesk` app crate.
//!
//! Implementations must be `Send + Sync`; queries may run concurrently with
//! ingestion.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Article, ConfidenceBucket, ConsolidatedStory, Entity, StockImpact};

/// A stored impact together with the story it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactHit {
    pub story_id: String,
    pub impact: StockImpact,
}

/// A stored entity together with the story it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHit {
    pub story_id: String,
    pub entity: Entity,
}

/// A story with everything derived from it, for `get`-style lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryDetail {
    pub story: ConsolidatedStory,
    pub entities: Vec<Entity>,
    pub impacts: Vec<StockImpact>,
}

/// Row counts for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub articles: u64,
    pub stories: u64,
    pub entities: u64,
    pub impacts: u64,
    /// Impact counts keyed by kind (`direct`, `sector_wide`, `regulatory`).
    pub impacts_by_kind: BTreeMap<String, u64>,
    /// Impact counts keyed by [`ConfidenceBucket`]. Every bucket is present.
    pub impacts_by_confidence: BTreeMap<String, u64>,
}

impl StoreStats {
    /// Zeroed confidence buckets, ready to be counted into.
    pub fn empty_confidence_buckets() -> BTreeMap<String, u64> {
        ConfidenceBucket::ALL
            .iter()
            .map(|b| (b.to_string(), 0))
            .collect()
    }
}

/// A story ready to be persisted with everything derived from it.
#[derive(Debug, Clone, Copy)]
pub struct NewStory<'a> {
    pub story: &'a ConsolidatedStory,
    pub embedding: &'a [f32],
    pub members: &'a [Article],
    pub entities: &'a [Entity],
    pub impacts: &'a [StockImpact],
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_article`](Store::save_article) | Record a raw article and the story it folded into |
/// | [`save_story`](Store::save_story) | Atomically create a story and its embedding |
/// | [`save_entities`](Store::save_entities) | Replace a story's entities |
/// | [`save_impacts`](Store::save_impacts) | Replace a story's impacts |
/// | [`save_new_story`](Store::save_new_story) | All of the above for one new story |
/// | [`article_stories`](Store::article_stories) | Owners of already-stored articles |
/// | [`find_stories_by_symbol`](Store::find_stories_by_symbol) | Impacts on a symbol |
/// | [`find_stories_by_sector`](Store::find_stories_by_sector) | Impacts tagged with a sector |
/// | [`find_stories_by_regulator`](Store::find_stories_by_regulator) | Regulator entity mentions |
/// | [`all_story_embeddings`](Store::all_story_embeddings) | Every story vector, for thematic search |
/// | [`all_entities`](Store::all_entities) | Every stored entity |
#[async_trait]
pub trait Store: Send + Sync {
    /// Record an article as a member of `story_id`.
    ///
    /// Re-saving an article under the same story is a no-op. An article
    /// already owned by a different story fails with
    /// [`PipelineError::MalformedInput`](crate::PipelineError), so no
    /// article ever belongs to two stories.
    async fn save_article(&self, article: &Article, story_id: &str) -> Result<()>;

    /// Create a story with its embedding.
    ///
    /// Check-and-insert is atomic per story id: if the id already exists the
    /// call fails with [`PipelineError::StorageConflict`](crate::PipelineError)
    /// wrapped in `anyhow::Error`.
    async fn save_story(&self, story: &ConsolidatedStory, embedding: &[f32]) -> Result<()>;

    async fn save_entities(&self, story_id: &str, entities: &[Entity]) -> Result<()>;

    async fn save_impacts(&self, story_id: &str, impacts: &[StockImpact]) -> Result<()>;

    /// Persist a new story, its member articles, entities and impacts.
    ///
    /// The default runs the individual saves in that order. Backends with
    /// transactions write all of it or none of it.
    async fn save_new_story(&self, new: NewStory<'_>) -> Result<()> {
        self.save_story(new.story, new.embedding).await?;
        for article in new.members {
            self.save_article(article, &new.story.id).await?;
        }
        self.save_entities(&new.story.id, new.entities).await?;
        self.save_impacts(&new.story.id, new.impacts).await
    }

    /// `(article id, story id)` for each of `ids` that is already stored.
    /// Unknown ids are skipped.
    async fn article_stories(&self, ids: &[String]) -> Result<Vec<(String, String)>>;

    /// All impacts (any kind) on a ticker symbol.
    async fn find_stories_by_symbol(&self, symbol: &str) -> Result<Vec<ImpactHit>>;

    /// All impacts (any kind) tagged with a sector, case-insensitive.
    async fn find_stories_by_sector(&self, sector: &str) -> Result<Vec<ImpactHit>>;

    /// Regulator entities whose normalised name matches `regulator`.
    async fn find_stories_by_regulator(&self, regulator: &str) -> Result<Vec<EntityHit>>;

    async fn all_story_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>>;

    /// Every stored entity, in story insertion order.
    async fn all_entities(&self) -> Result<Vec<EntityHit>>;

    /// Fetch stories by id. Unknown ids are skipped.
    async fn get_stories(&self, ids: &[String]) -> Result<Vec<ConsolidatedStory>>;

    async fn get_story_detail(&self, id: &str) -> Result<Option<StoryDetail>>;

    async fn stats(&self) -> Result<StoreStats>;
}
