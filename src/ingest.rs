//! Batch ingestion from a JSON file.
//!
//! The input is a JSON array of articles:
//!
//! ```json
//! [
//!   {"id": "a1", "title": "RBI hikes repo rate", "body": "...",
//!    "published_at": "2024-02-08T10:00:00Z", "source": "Mint", "url": "https://..."}
//! ]
//! ```
//!
//! `id` is optional (a UUID v4 is assigned) and `content` is accepted in
//! place of `body`. The whole file is one batch: duplicates are only folded
//! within it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use newsdesk_core::{Article, BatchReport, PipelineError};

use crate::config::Config;
use crate::db;
use crate::engine::Engine;
use crate::provider;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
struct IncomingArticle {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "content")]
    body: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<IncomingArticle> for Article {
    fn from(a: IncomingArticle) -> Self {
        Article {
            id: a.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: a.title,
            body: a.body,
            published_at: a.published_at,
            source: a.source,
            url: a.url,
        }
    }
}

/// Parse a JSON article array.
pub fn parse_articles(json: &str) -> Result<Vec<Article>> {
    let incoming: Vec<IncomingArticle> =
        serde_json::from_str(json).context("Expected a JSON array of articles")?;
    Ok(incoming.into_iter().map(Article::from).collect())
}

pub fn read_articles(path: &Path) -> Result<Vec<Article>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read articles file: {}", path.display()))?;
    parse_articles(&content).with_context(|| format!("Invalid articles file: {}", path.display()))
}

/// Counts of each failure kind in a report.
#[derive(Debug, Default, PartialEq)]
pub struct FailureCounts {
    pub rejected: usize,
    pub provider: usize,
}

pub fn failure_counts(report: &BatchReport) -> FailureCounts {
    let mut counts = FailureCounts::default();
    for f in &report.failures {
        match f.error {
            PipelineError::MalformedInput { .. } => counts.rejected += 1,
            PipelineError::ProviderFailure { .. } => counts.provider += 1,
            PipelineError::StorageConflict { .. } => {}
        }
    }
    counts
}

pub async fn run_ingest(config: &Config, path: &Path, dry_run: bool) -> Result<()> {
    let articles = read_articles(path)?;
    tracing::info!(file = %path.display(), articles = articles.len(), "ingesting batch");

    if dry_run {
        let invalid: Vec<PipelineError> = articles.iter().filter_map(|a| a.validate().err()).collect();
        println!("Dry run: {}", path.display());
        println!("  articles:  {}", articles.len());
        println!("  valid:     {}", articles.len() - invalid.len());
        println!("  rejected:  {}", invalid.len());
        for e in &invalid {
            println!("    {}", e);
        }
        return Ok(());
    }

    let engine = Engine::from_config(config)?;
    let client = provider::create_client(&config.model)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let report = engine
        .pipeline
        .process_batch(&store, &client, &articles)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    let counts = failure_counts(&report);
    println!("Ingested {}", path.display());
    println!("  articles:            {}", articles.len());
    println!("  stories:             {}", report.stories.len());
    println!("  duplicates folded:   {}", report.duplicates_folded());
    println!("  entities:            {}", report.entities);
    println!("  impacts:             {}", report.impacts);
    println!("  rejected:            {}", counts.rejected);
    println!("  provider failures:   {}", counts.provider);
    println!("  mapping misses:      {}", report.mapping_misses);
    if !report.cross_batch_matches.is_empty() {
        println!("  cross-batch matches: {}", report.cross_batch_matches.len());
        for m in &report.cross_batch_matches {
            println!(
                "    {} ~ {} ({:.3})",
                m.story_id, m.existing_story_id, m.similarity
            );
        }
    }
    for f in &report.failures {
        eprintln!("  ! {}", f.error);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assigns_ids_and_accepts_content_alias() {
        let articles = parse_articles(
            r#"[
                {"title": "Infosys wins deal", "content": "Large contract."},
                {"id": "a2", "title": "RBI holds rates", "body": "Unchanged.",
                 "published_at": "2024-02-08T10:00:00Z", "source": "Mint"}
            ]"#,
        )
        .unwrap();

        assert_eq!(articles.len(), 2);
        assert!(Uuid::parse_str(&articles[0].id).is_ok());
        assert_eq!(articles[0].body, "Large contract.");
        assert_eq!(articles[1].id, "a2");
        assert_eq!(articles[1].source.as_deref(), Some("Mint"));
        assert!(articles[1].published_at.is_some());
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_articles(r#"{"title": "x"}"#).is_err());
    }

    #[test]
    fn test_failure_counts_by_kind() {
        use newsdesk_core::dedup::ItemFailure;
        let report = BatchReport {
            failures: vec![
                ItemFailure {
                    item_id: "a".into(),
                    error: PipelineError::MalformedInput {
                        item_id: "a".into(),
                        reason: "empty".into(),
                    },
                },
                ItemFailure {
                    item_id: "b".into(),
                    error: PipelineError::provider("b", "timeout"),
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            failure_counts(&report),
            FailureCounts {
                rejected: 1,
                provider: 1
            }
        );
    }
}
