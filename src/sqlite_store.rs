//! SQLite-backed [`Store`] implementation.
//!
//! Tables: `consolidated_stories`, `articles`, `story_embeddings`,
//! `entities`, `stock_impacts` (see [`crate::migrate`]). Timestamps are
//! stored as Unix seconds; member ids, sources, and entity provenance as
//! JSON text.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use newsdesk_core::embedding::{blob_to_vec, vec_to_blob};
use newsdesk_core::models::{Article, ConfidenceBucket, ConsolidatedStory, Entity, Provenance, StockImpact};
use newsdesk_core::store::{EntityHit, ImpactHit, NewStory, Store, StoreStats, StoryDetail};
use newsdesk_core::symbols::normalize_name;
use newsdesk_core::PipelineError;

/// SQLite implementation of the [`Store`] trait.
///
/// `save_story` relies on the `consolidated_stories` primary key: the
/// insert and its embedding run in one transaction, and a second writer for
/// the same id sees zero affected rows and gets a
/// [`PipelineError::StorageConflict`]. `save_new_story` widens that
/// transaction to the members, entities and impacts.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

fn to_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp())
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

fn story_from_row(row: &SqliteRow) -> Result<ConsolidatedStory> {
    let member_ids: String = row.get("member_ids");
    let sources: String = row.get("sources");
    Ok(ConsolidatedStory {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        published_at: from_ts(row.get("published_at")),
        member_ids: serde_json::from_str(&member_ids).context("corrupt member_ids column")?,
        sources: serde_json::from_str(&sources).context("corrupt sources column")?,
    })
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let category: String = row.get("category");
    let provenance: String = row.get("provenance");
    Ok(Entity {
        name: row.get("name"),
        mention: row.get("mention"),
        category: category.parse()?,
        confidence: row.get("confidence"),
        provenance: serde_json::from_str::<Provenance>(&provenance).context("corrupt provenance column")?,
    })
}

fn impact_from_row(row: &SqliteRow) -> Result<StockImpact> {
    let kind: String = row.get("kind");
    Ok(StockImpact {
        symbol: row.get("symbol"),
        confidence: row.get("confidence"),
        kind: kind.parse()?,
        source_entity: row.get("source_entity"),
        sector: row.get("sector"),
    })
}

fn impact_hits(rows: &[SqliteRow]) -> Result<Vec<ImpactHit>> {
    rows.iter()
        .map(|row| {
            Ok(ImpactHit {
                story_id: row.get("story_id"),
                impact: impact_from_row(row)?,
            })
        })
        .collect()
}

fn entity_hits(rows: &[SqliteRow]) -> Result<Vec<EntityHit>> {
    rows.iter()
        .map(|row| {
            Ok(EntityHit {
                story_id: row.get("story_id"),
                entity: entity_from_row(row)?,
            })
        })
        .collect()
}

const IMPACT_COLUMNS: &str = "i.story_id, i.symbol, i.confidence, i.kind, i.sector, i.source_entity";

async fn insert_story(conn: &mut SqliteConnection, story: &ConsolidatedStory, embedding: &[f32]) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO consolidated_stories (id, title, body, published_at,
                                          member_ids, sources, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&story.id)
    .bind(&story.title)
    .bind(&story.body)
    .bind(to_ts(story.published_at))
    .bind(serde_json::to_string(&story.member_ids)?)
    .bind(serde_json::to_string(&story.sources)?)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        return Err(PipelineError::StorageConflict {
            story_id: story.id.clone(),
        }
        .into());
    }

    sqlx::query("INSERT INTO story_embeddings (story_id, dims, embedding) VALUES (?, ?, ?)")
        .bind(&story.id)
        .bind(embedding.len() as i64)
        .bind(vec_to_blob(embedding))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_article(conn: &mut SqliteConnection, article: &Article, story_id: &str) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO articles (id, story_id, title, body, source, url,
                              published_at, content_hash, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&article.id)
    .bind(story_id)
    .bind(&article.title)
    .bind(&article.body)
    .bind(&article.source)
    .bind(&article.url)
    .bind(to_ts(article.published_at))
    .bind(article.content_hash())
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        let owner: String = sqlx::query_scalar("SELECT story_id FROM articles WHERE id = ?")
            .bind(&article.id)
            .fetch_one(&mut *conn)
            .await?;
        if owner != story_id {
            return Err(PipelineError::already_ingested(&article.id, &owner).into());
        }
    }
    Ok(())
}

async fn replace_entities(conn: &mut SqliteConnection, story_id: &str, entities: &[Entity]) -> Result<()> {
    sqlx::query("DELETE FROM entities WHERE story_id = ?")
        .bind(story_id)
        .execute(&mut *conn)
        .await?;

    for e in entities {
        sqlx::query(
            r#"
            INSERT INTO entities (story_id, name, name_key, mention, category, confidence, provenance)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(story_id)
        .bind(&e.name)
        .bind(normalize_name(&e.name))
        .bind(&e.mention)
        .bind(e.category.as_str())
        .bind(e.confidence)
        .bind(serde_json::to_string(&e.provenance)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn replace_impacts(conn: &mut SqliteConnection, story_id: &str, impacts: &[StockImpact]) -> Result<()> {
    sqlx::query("DELETE FROM stock_impacts WHERE story_id = ?")
        .bind(story_id)
        .execute(&mut *conn)
        .await?;

    for i in impacts {
        sqlx::query(
            r#"
            INSERT INTO stock_impacts (story_id, symbol, confidence, kind, sector, source_entity)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(story_id)
        .bind(&i.symbol)
        .bind(i.confidence)
        .bind(i.kind.as_str())
        .bind(&i.sector)
        .bind(&i.source_entity)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_article(&self, article: &Article, story_id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_article(&mut *conn, article, story_id).await
    }

    async fn save_story(&self, story: &ConsolidatedStory, embedding: &[f32]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_story(&mut *tx, story, embedding).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_entities(&self, story_id: &str, entities: &[Entity]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        replace_entities(&mut *tx, story_id, entities).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_impacts(&self, story_id: &str, impacts: &[StockImpact]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        replace_impacts(&mut *tx, story_id, impacts).await?;
        tx.commit().await?;
        Ok(())
    }

    /// One transaction per story: readers never see a story without its
    /// members, entities and impacts.
    async fn save_new_story(&self, new: NewStory<'_>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_story(&mut *tx, new.story, new.embedding).await?;
        for article in new.members {
            insert_article(&mut *tx, article, &new.story.id).await?;
        }
        replace_entities(&mut *tx, &new.story.id, new.entities).await?;
        replace_impacts(&mut *tx, &new.story.id, new.impacts).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn article_stories(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        let mut owners = Vec::new();
        for id in ids {
            let story: Option<String> = sqlx::query_scalar("SELECT story_id FROM articles WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(story) = story {
                owners.push((id.clone(), story));
            }
        }
        Ok(owners)
    }

    async fn find_stories_by_symbol(&self, symbol: &str) -> Result<Vec<ImpactHit>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {IMPACT_COLUMNS}
            FROM stock_impacts i
            JOIN consolidated_stories s ON s.id = i.story_id
            WHERE i.symbol = ? COLLATE NOCASE
            ORDER BY s.rowid, i.id
            "#
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        impact_hits(&rows)
    }

    async fn find_stories_by_sector(&self, sector: &str) -> Result<Vec<ImpactHit>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {IMPACT_COLUMNS}
            FROM stock_impacts i
            JOIN consolidated_stories s ON s.id = i.story_id
            WHERE i.sector = ? COLLATE NOCASE
            ORDER BY s.rowid, i.id
            "#
        ))
        .bind(sector)
        .fetch_all(&self.pool)
        .await?;
        impact_hits(&rows)
    }

    async fn find_stories_by_regulator(&self, regulator: &str) -> Result<Vec<EntityHit>> {
        let rows = sqlx::query(
            r#"
            SELECT e.story_id, e.name, e.mention, e.category, e.confidence, e.provenance
            FROM entities e
            JOIN consolidated_stories s ON s.id = e.story_id
            WHERE e.category = 'regulator' AND e.name_key = ?
            ORDER BY s.rowid, e.id
            "#,
        )
        .bind(normalize_name(regulator))
        .fetch_all(&self.pool)
        .await?;
        entity_hits(&rows)
    }

    async fn all_story_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query(
            r#"
            SELECT e.story_id, e.embedding
            FROM story_embeddings e
            JOIN consolidated_stories s ON s.id = e.story_id
            ORDER BY s.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("story_id"), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn all_entities(&self) -> Result<Vec<EntityHit>> {
        let rows = sqlx::query(
            r#"
            SELECT e.story_id, e.name, e.mention, e.category, e.confidence, e.provenance
            FROM entities e
            JOIN consolidated_stories s ON s.id = e.story_id
            ORDER BY s.rowid, e.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        entity_hits(&rows)
    }

    async fn get_stories(&self, ids: &[String]) -> Result<Vec<ConsolidatedStory>> {
        let mut stories = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT id, title, body, published_at, member_ids, sources FROM consolidated_stories WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                stories.push(story_from_row(&row)?);
            }
        }
        Ok(stories)
    }

    async fn get_story_detail(&self, id: &str) -> Result<Option<StoryDetail>> {
        let story = match self.get_stories(&[id.to_string()]).await?.pop() {
            Some(s) => s,
            None => return Ok(None),
        };

        let entity_rows = sqlx::query(
            "SELECT name, mention, category, confidence, provenance FROM entities WHERE story_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let entities = entity_rows.iter().map(entity_from_row).collect::<Result<Vec<_>>>()?;

        let impact_rows = sqlx::query(
            "SELECT symbol, confidence, kind, sector, source_entity FROM stock_impacts WHERE story_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let impacts = impact_rows.iter().map(impact_from_row).collect::<Result<Vec<_>>>()?;

        Ok(Some(StoryDetail {
            story,
            entities,
            impacts,
        }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let kind_rows = sqlx::query("SELECT kind, COUNT(*) AS n FROM stock_impacts GROUP BY kind ORDER BY kind")
            .fetch_all(&self.pool)
            .await?;
        let impacts_by_kind: BTreeMap<String, u64> = kind_rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get::<String, _>("kind"), n as u64)
            })
            .collect();

        let mut impacts_by_confidence = StoreStats::empty_confidence_buckets();
        let confidences: Vec<f64> = sqlx::query_scalar("SELECT confidence FROM stock_impacts")
            .fetch_all(&self.pool)
            .await?;
        for c in confidences {
            *impacts_by_confidence
                .entry(ConfidenceBucket::of(c).to_string())
                .or_default() += 1;
        }

        Ok(StoreStats {
            articles: self.count_rows("articles").await?,
            stories: self.count_rows("consolidated_stories").await?,
            entities: self.count_rows("entities").await?,
            impacts: self.count_rows("stock_impacts").await?,
            impacts_by_kind,
            impacts_by_confidence,
        })
    }
}
