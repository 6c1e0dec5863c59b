//! Natural-language query engine with entity-driven expansion.
//!
//! # Algorithm
//!
//! 1. Extract entities from the query text with the same extractor used at
//!    ingestion.
//! 2. Classify intent once: Company, else Sector, else Regulator, else
//!    Thematic.
//! 3. Retrieve candidates through the [`Store`]:
//!    - Company: Direct impacts on the symbol, plus SectorWide impacts
//!      tagged with the company's sector (context expansion).
//!    - Sector: any impact tagged with the sector.
//!    - Regulator: stories mentioning the regulator. Never expanded.
//!    - Thematic: cosine similarity against every stored story embedding.
//! 4. Score `match_weight × strength + confidence_weight × confidence`
//!    (strength `1.0` direct, `0.5` expanded); thematic score is the
//!    similarity itself. A story reached several ways keeps its best score.
//! 5. Sort by score (desc), published_at (desc, missing last), id (asc).
//! 6. Truncate to `limit`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::error::PipelineError;
use crate::extract::EntityExtractor;
use crate::models::{ConsolidatedStory, Entity, EntityCategory, ImpactKind};
use crate::provider::ModelProvider;
use crate::store::Store;
use crate::symbols::SymbolTable;

/// Match strength for a story reached directly.
pub const DIRECT_STRENGTH: f64 = 1.0;
/// Match strength for a story reached through sector expansion.
pub const EXPANDED_STRENGTH: f64 = 0.5;

/// Ranking parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub match_weight: f64,
    pub confidence_weight: f64,
    /// Thematic results below this cosine similarity are dropped.
    pub thematic_min_similarity: Option<f32>,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            match_weight: 0.6,
            confidence_weight: 0.4,
            thematic_min_similarity: None,
        }
    }
}

impl RankingWeights {
    pub fn score(&self, strength: f64, confidence: f64) -> f64 {
        self.match_weight * strength + self.confidence_weight * confidence
    }
}

/// The one-shot classification of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryIntent {
    Company {
        names: Vec<String>,
        /// Resolved ticker symbols; empty when no company name resolved.
        symbols: Vec<String>,
        /// Primary sectors of the resolved companies.
        sectors: Vec<String>,
    },
    Sector {
        names: Vec<String>,
    },
    Regulator {
        names: Vec<String>,
    },
    Thematic,
}

impl QueryIntent {
    /// Pick the intent from a query's entities.
    pub fn classify(entities: &[Entity], table: &SymbolTable) -> Self {
        let of = |cat: EntityCategory| {
            entities
                .iter()
                .filter(move |e| e.category == cat)
                .collect::<Vec<_>>()
        };

        let companies = of(EntityCategory::Company);
        if !companies.is_empty() {
            let mut symbols = Vec::new();
            let mut sectors = Vec::new();
            for listing in companies.iter().filter_map(|e| table.resolve_company(&e.name)) {
                push_unique(&mut symbols, &listing.symbol);
                push_unique(&mut sectors, &listing.sector);
            }
            return QueryIntent::Company {
                names: companies.iter().map(|e| e.name.clone()).collect(),
                symbols,
                sectors,
            };
        }

        let sectors = of(EntityCategory::Sector);
        if !sectors.is_empty() {
            let mut names = Vec::new();
            for e in sectors {
                let name = table.resolve_sector(&e.name).map(|s| s.name.as_str()).unwrap_or(e.name.as_str());
                push_unique(&mut names, name);
            }
            return QueryIntent::Sector { names };
        }

        let regulators = of(EntityCategory::Regulator);
        if !regulators.is_empty() {
            let mut names = Vec::new();
            for e in regulators {
                let name = table.resolve_regulator(&e.name).map(|r| r.name.as_str()).unwrap_or(e.name.as_str());
                push_unique(&mut names, name);
            }
            return QueryIntent::Regulator { names };
        }

        QueryIntent::Thematic
    }

    pub fn label(&self) -> &'static str {
        match self {
            QueryIntent::Company { .. } => "company",
            QueryIntent::Sector { .. } => "sector",
            QueryIntent::Regulator { .. } => "regulator",
            QueryIntent::Thematic => "thematic",
        }
    }
}

fn push_unique(v: &mut Vec<String>, s: &str) {
    if !v.iter().any(|x| x == s) {
        v.push(s.to_string());
    }
}

/// A ranked story in a query response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStory {
    pub story: ConsolidatedStory,
    pub score: f64,
    /// How the story was reached, e.g. `direct:HDFCBANK` or `sector:Banking`.
    pub via: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub intent: QueryIntent,
    pub entities: Vec<Entity>,
    pub results: Vec<RankedStory>,
}

/// Answers free-text queries against committed storage.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    extractor: EntityExtractor,
    table: Arc<SymbolTable>,
    weights: RankingWeights,
}

impl QueryEngine {
    pub fn new(extractor: EntityExtractor, table: Arc<SymbolTable>, weights: RankingWeights) -> Self {
        Self {
            extractor,
            table,
            weights,
        }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Run a query. Read-only against `store`.
    ///
    /// If the NER collaborator fails on the query text, dictionary rules
    /// alone decide the entities. A failed query embedding (thematic
    /// intent only) is returned as [`PipelineError::ProviderFailure`].
    pub async fn query<P, S>(&self, provider: &P, store: &S, text: &str, limit: usize) -> Result<QueryResponse>
    where
        P: ModelProvider + ?Sized,
        S: Store + ?Sized,
    {
        let query = text.trim().to_string();
        if query.is_empty() {
            return Ok(QueryResponse {
                query,
                intent: QueryIntent::Thematic,
                entities: Vec::new(),
                results: Vec::new(),
            });
        }

        let entities = match self.extractor.extract(provider, "query", &query).await {
            Ok(entities) => entities,
            Err(e) => {
                tracing::warn!(error = %e, "query NER failed; using dictionary rules only");
                self.extractor.extract_with_spans(&query, &[])
            }
        };
        let intent = QueryIntent::classify(&entities, &self.table);
        tracing::debug!(intent = intent.label(), entities = entities.len(), "query classified");

        let mut best: HashMap<String, (f64, String)> = HashMap::new();
        let mut offer = |story_id: &str, score: f64, via: String| match best.get(story_id) {
            Some((existing, _)) if *existing >= score => {}
            _ => {
                best.insert(story_id.to_string(), (score, via));
            }
        };

        match &intent {
            QueryIntent::Company { symbols, sectors, .. } => {
                for symbol in symbols {
                    for hit in store.find_stories_by_symbol(symbol).await? {
                        if hit.impact.kind == ImpactKind::Direct {
                            let score = self.weights.score(DIRECT_STRENGTH, hit.impact.confidence);
                            offer(&hit.story_id, score, format!("direct:{}", symbol));
                        }
                    }
                }
                for sector in sectors {
                    for hit in store.find_stories_by_sector(sector).await? {
                        if hit.impact.kind == ImpactKind::SectorWide {
                            let score = self.weights.score(EXPANDED_STRENGTH, hit.impact.confidence);
                            offer(&hit.story_id, score, format!("sector:{}", sector));
                        }
                    }
                }
            }
            QueryIntent::Sector { names } => {
                for sector in names {
                    for hit in store.find_stories_by_sector(sector).await? {
                        let score = self.weights.score(DIRECT_STRENGTH, hit.impact.confidence);
                        offer(&hit.story_id, score, format!("sector:{}", sector));
                    }
                }
            }
            QueryIntent::Regulator { names } => {
                for regulator in names {
                    for hit in store.find_stories_by_regulator(regulator).await? {
                        let score = self.weights.score(DIRECT_STRENGTH, hit.entity.confidence);
                        offer(&hit.story_id, score, format!("regulator:{}", regulator));
                    }
                }
            }
            QueryIntent::Thematic => {
                let query_vec = provider
                    .embed(&query)
                    .await
                    .map_err(|e| PipelineError::provider("query", e))?;
                for (story_id, vector) in store.all_story_embeddings().await? {
                    let sim = cosine_similarity(&query_vec, &vector);
                    if self.weights.thematic_min_similarity.is_some_and(|min| sim < min) {
                        continue;
                    }
                    offer(&story_id, sim as f64, "thematic".to_string());
                }
            }
        }

        let ids: Vec<String> = best.keys().cloned().collect();
        let mut results: Vec<RankedStory> = store
            .get_stories(&ids)
            .await?
            .into_iter()
            .filter_map(|story| {
                let (score, via) = best.remove(&story.id)?;
                Some(RankedStory { story, score, via })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.story.published_at.cmp(&a.story.published_at))
                .then(a.story.id.cmp(&b.story.id))
        });
        results.truncate(limit);

        tracing::info!(
            query = %query,
            intent = intent.label(),
            results = results.len(),
            "query answered"
        );

        Ok(QueryResponse {
            query,
            intent,
            entities,
            results,
        })
    }
}
