//! Batch ingestion: dedup → extraction → impact mapping → storage.
//!
//! Entities and impacts for the whole batch are derived before the first
//! write, and every story id is checked against the store at that point, so
//! a conflicting batch writes nothing. Each story is then persisted with
//! [`Store::save_new_story`]; whether a reader can observe a story before
//! its entities land depends on the backend (the SQLite store writes each
//! story in one transaction).
//!
//! Articles that already belong to a stored story are rejected before
//! dedup. Per-item provider failures and rejections are collected in the
//! [`BatchReport`]; only storage errors abort the batch.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::dedup::{Deduplicator, ItemFailure, StoryDraft};
use crate::embedding::cosine_similarity;
use crate::error::PipelineError;
use crate::extract::EntityExtractor;
use crate::impact::ImpactMapper;
use crate::models::{Article, ConsolidatedStory, Entity, StockImpact};
use crate::provider::ModelProvider;
use crate::store::{NewStory, Store};

/// A new story that looks like one already in storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossBatchMatch {
    pub story_id: String,
    pub existing_story_id: String,
    pub similarity: f32,
}

/// What happened to one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Stories written, in batch order.
    pub stories: Vec<ConsolidatedStory>,
    /// Articles or stories that hit a provider failure or were rejected.
    pub failures: Vec<ItemFailure>,
    /// Entities that did not resolve to a symbol, sector, or regulator.
    pub mapping_misses: usize,
    pub entities: usize,
    pub impacts: usize,
    /// Only populated when cross-batch checking is enabled.
    pub cross_batch_matches: Vec<CrossBatchMatch>,
}

impl BatchReport {
    /// Number of articles folded into another article's story.
    pub fn duplicates_folded(&self) -> usize {
        self.stories.iter().map(|s| s.duplicate_ids().len()).sum()
    }
}

struct Prepared {
    draft: StoryDraft,
    members: Vec<Article>,
    entities: Vec<Entity>,
    impacts: Vec<StockImpact>,
}

/// The ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dedup: Deduplicator,
    extractor: EntityExtractor,
    mapper: ImpactMapper,
    cross_batch_check: bool,
}

impl Pipeline {
    pub fn new(dedup: Deduplicator, extractor: EntityExtractor, mapper: ImpactMapper) -> Self {
        Self {
            dedup,
            extractor,
            mapper,
            cross_batch_check: false,
        }
    }

    /// Compare new stories against stored story embeddings and report
    /// likely duplicates. Matches are reported, never merged.
    pub fn with_cross_batch_check(mut self, enabled: bool) -> Self {
        self.cross_batch_check = enabled;
        self
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    /// Process one batch of articles.
    ///
    /// Returns `Err` only for storage failures, including
    /// [`PipelineError::StorageConflict`] when a story id already exists.
    /// A conflict found before writing leaves the store untouched, so the
    /// caller can fix or drop the offending article and retry.
    pub async fn process_batch<S, P>(&self, store: &S, provider: &P, articles: &[Article]) -> Result<BatchReport>
    where
        S: Store + ?Sized,
        P: ModelProvider + ?Sized,
    {
        let mut report = BatchReport::default();

        let mut seen = HashSet::new();
        let mut accepted: Vec<Article> = Vec::with_capacity(articles.len());
        for article in articles {
            if let Err(e) = article.validate() {
                report.failures.push(ItemFailure {
                    item_id: article.id.clone(),
                    error: e,
                });
                continue;
            }
            if !seen.insert(article.id.as_str()) {
                report.failures.push(ItemFailure {
                    item_id: article.id.clone(),
                    error: PipelineError::MalformedInput {
                        item_id: article.id.clone(),
                        reason: "duplicate article id in batch".to_string(),
                    },
                });
                continue;
            }
            accepted.push(article.clone());
        }

        let ids: Vec<String> = accepted.iter().map(|a| a.id.clone()).collect();
        let owned: HashMap<String, String> = store.article_stories(&ids).await?.into_iter().collect();
        if !owned.is_empty() {
            accepted.retain(|article| match owned.get(&article.id) {
                Some(story_id) => {
                    tracing::debug!(article = %article.id, story = %story_id, "article already ingested");
                    report.failures.push(ItemFailure {
                        item_id: article.id.clone(),
                        error: PipelineError::already_ingested(&article.id, story_id),
                    });
                    false
                }
                None => true,
            });
        }

        let outcome = self.dedup.group(provider, &accepted).await;
        report.failures.extend(outcome.failures);

        if self.cross_batch_check && !outcome.drafts.is_empty() {
            report.cross_batch_matches = self.cross_batch_matches(store, &outcome.drafts).await?;
        }

        let mut prepared = Vec::with_capacity(outcome.drafts.len());
        for draft in outcome.drafts {
            let story = &draft.story;
            let entities = match self.extractor.extract(provider, &story.id, &story.text()).await {
                Ok(entities) => entities,
                Err(e) => {
                    tracing::warn!(story = %story.id, error = %e, "entity extraction failed; story kept without entities");
                    report.failures.push(ItemFailure {
                        item_id: story.id.clone(),
                        error: e,
                    });
                    Vec::new()
                }
            };
            let mapping = self.mapper.map(&entities);
            report.mapping_misses += mapping.misses;

            let members = story
                .member_ids
                .iter()
                .filter_map(|id| accepted.iter().find(|a| &a.id == id).cloned())
                .collect();
            prepared.push(Prepared {
                draft,
                members,
                entities,
                impacts: mapping.impacts,
            });
        }

        let story_ids: Vec<String> = prepared.iter().map(|p| p.draft.story.id.clone()).collect();
        if let Some(existing) = store.get_stories(&story_ids).await?.into_iter().next() {
            return Err(PipelineError::StorageConflict { story_id: existing.id }.into());
        }

        for p in prepared {
            let story = &p.draft.story;
            store
                .save_new_story(NewStory {
                    story,
                    embedding: &p.draft.embedding,
                    members: &p.members,
                    entities: &p.entities,
                    impacts: &p.impacts,
                })
                .await?;

            tracing::debug!(
                story = %story.id,
                members = story.member_ids.len(),
                entities = p.entities.len(),
                impacts = p.impacts.len(),
                "story stored"
            );
            report.entities += p.entities.len();
            report.impacts += p.impacts.len();
            report.stories.push(p.draft.story);
        }

        tracing::info!(
            articles = articles.len(),
            stories = report.stories.len(),
            duplicates = report.duplicates_folded(),
            failures = report.failures.len(),
            mapping_misses = report.mapping_misses,
            "batch processed"
        );

        Ok(report)
    }

    async fn cross_batch_matches<S>(&self, store: &S, drafts: &[StoryDraft]) -> Result<Vec<CrossBatchMatch>>
    where
        S: Store + ?Sized,
    {
        let existing = store.all_story_embeddings().await?;
        let mut matches = Vec::new();
        for draft in drafts {
            let best = existing
                .iter()
                .map(|(id, v)| (id, cosine_similarity(&draft.embedding, v)))
                .filter(|(_, sim)| *sim >= self.dedup.threshold())
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((existing_id, similarity)) = best {
                tracing::warn!(
                    story = %draft.story.id,
                    existing = %existing_id,
                    similarity,
                    "story resembles one from an earlier batch"
                );
                matches.push(CrossBatchMatch {
                    story_id: draft.story.id.clone(),
                    existing_story_id: existing_id.clone(),
                    similarity,
                });
            }
        }
        Ok(matches)
    }
}
