//! Core data models used throughout Newsdesk.
//!
//! These types represent the articles, consolidated stories, entities, and
//! stock impacts that flow through the ingestion and query pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// A raw news article as accepted at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Article {
    /// Text handed to the embedding model: title and body joined by a space.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }

    /// SHA-256 of `title + "\n" + body`, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Reject articles that must never enter the pipeline.
    ///
    /// An article needs a non-blank id and at least one of title or body
    /// carrying text.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::MalformedInput {
                item_id: "(missing id)".to_string(),
                reason: "article id is empty".to_string(),
            });
        }
        if self.title.trim().is_empty() && self.body.trim().is_empty() {
            return Err(PipelineError::MalformedInput {
                item_id: self.id.clone(),
                reason: "article has neither title nor body text".to_string(),
            });
        }
        Ok(())
    }
}

/// The deduplicated representative of one or more articles about the same event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedStory {
    pub id: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Member article ids, in batch order.
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ConsolidatedStory {
    /// Derive the story id from its first member article.
    pub fn id_for(first_member: &str) -> String {
        format!("story-{}", first_member)
    }

    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }

    /// Member ids other than the representative (first) one.
    pub fn duplicate_ids(&self) -> &[String] {
        self.member_ids.get(1..).unwrap_or(&[])
    }
}

/// Category of an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    Company,
    Sector,
    Regulator,
    Person,
    Event,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Company => "company",
            EntityCategory::Sector => "sector",
            EntityCategory::Regulator => "regulator",
            EntityCategory::Person => "person",
            EntityCategory::Event => "event",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "company" => Ok(EntityCategory::Company),
            "sector" => Ok(EntityCategory::Sector),
            "regulator" => Ok(EntityCategory::Regulator),
            "person" => Ok(EntityCategory::Person),
            "event" => Ok(EntityCategory::Event),
            other => anyhow::bail!("unknown entity category: '{}'", other),
        }
    }
}

/// Which extraction source(s) produced an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    /// Generic NER span with the model's label.
    Model { label: String },
    /// Dictionary / regex rule match.
    Pattern { rule: String },
    /// Both sources fired on the same span.
    Both { label: String, rule: String },
}

impl Provenance {
    pub fn has_pattern(&self) -> bool {
        matches!(self, Provenance::Pattern { .. } | Provenance::Both { .. })
    }
}

/// A structured mention extracted from a consolidated story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical name (dictionary name when a rule matched, else the surface text).
    pub name: String,
    /// Surface text as it appeared in the story.
    pub mention: String,
    pub category: EntityCategory,
    /// Combined confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub provenance: Provenance,
}

/// How a story is linked to a stock symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactKind {
    Direct,
    SectorWide,
    Regulatory,
}

impl ImpactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactKind::Direct => "direct",
            ImpactKind::SectorWide => "sector_wide",
            ImpactKind::Regulatory => "regulatory",
        }
    }
}

impl fmt::Display for ImpactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ImpactKind::Direct),
            "sector_wide" => Ok(ImpactKind::SectorWide),
            "regulatory" => Ok(ImpactKind::Regulatory),
            other => anyhow::bail!("unknown impact kind: '{}'", other),
        }
    }
}

/// A derived mapping from a story to a tradeable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockImpact {
    pub symbol: String,
    /// Confidence in `[0.0, 1.0]`. Always `1.0` for [`ImpactKind::Direct`].
    pub confidence: f64,
    pub kind: ImpactKind,
    /// Canonical name of the entity this impact was derived from.
    pub source_entity: String,
    /// Sector or industry the impact is tagged with, if known.
    pub sector: Option<String>,
}

impl StockImpact {
    pub fn bucket(&self) -> ConfidenceBucket {
        ConfidenceBucket::of(self.confidence)
    }
}

/// Coarse confidence grade for impact summaries: high `>= 0.8`,
/// medium `>= 0.5`, low below that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

impl ConfidenceBucket {
    pub const ALL: [ConfidenceBucket; 3] = [ConfidenceBucket::High, ConfidenceBucket::Medium, ConfidenceBucket::Low];

    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.8 {
            ConfidenceBucket::High
        } else if confidence >= 0.5 {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBucket::High => "high",
            ConfidenceBucket::Medium => "medium",
            ConfidenceBucket::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw span returned by the NER collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSpan {
    pub text: String,
    /// Model label, e.g. `ORG`, `PERSON`, `EVENT`.
    pub label: String,
    /// Byte offset of the span start in the analysed text.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
    #[serde(default)]
    pub confidence: Option<f64>,
}
