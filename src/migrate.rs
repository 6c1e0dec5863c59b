use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema at the configured database path. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per deduplicated event; member ids and sources are JSON arrays.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidated_stories (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            published_at INTEGER,
            member_ids TEXT NOT NULL,
            sources TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            story_id TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            source TEXT,
            url TEXT,
            published_at INTEGER,
            content_hash TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            FOREIGN KEY (story_id) REFERENCES consolidated_stories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS story_embeddings (
            story_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (story_id) REFERENCES consolidated_stories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            story_id TEXT NOT NULL,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            mention TEXT NOT NULL,
            category TEXT NOT NULL,
            confidence REAL NOT NULL,
            provenance TEXT NOT NULL,
            FOREIGN KEY (story_id) REFERENCES consolidated_stories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_impacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            story_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            confidence REAL NOT NULL,
            kind TEXT NOT NULL,
            sector TEXT,
            source_entity TEXT NOT NULL,
            FOREIGN KEY (story_id) REFERENCES consolidated_stories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_articles_story_id ON articles(story_id)",
        "CREATE INDEX IF NOT EXISTS idx_entities_story_id ON entities(story_id)",
        "CREATE INDEX IF NOT EXISTS idx_entities_category_key ON entities(category, name_key)",
        "CREATE INDEX IF NOT EXISTS idx_impacts_story_id ON stock_impacts(story_id)",
        "CREATE INDEX IF NOT EXISTS idx_impacts_symbol ON stock_impacts(symbol)",
        "CREATE INDEX IF NOT EXISTS idx_impacts_sector ON stock_impacts(sector COLLATE NOCASE)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    tracing::debug!("schema ready");
    Ok(())
}
