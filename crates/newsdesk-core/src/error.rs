use thiserror::Error;

/// Domain errors raised by the Newsdesk pipeline.
///
/// Mapping misses are deliberately absent: an entity that does not resolve
/// to a symbol is counted, not raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The embedding or NER collaborator failed or timed out for one item.
    #[error("model provider failed for '{item_id}': {reason}")]
    ProviderFailure { item_id: String, reason: String },

    /// An article was rejected at the ingestion boundary.
    #[error("malformed article '{item_id}': {reason}")]
    MalformedInput { item_id: String, reason: String },

    /// Another writer already created this story.
    #[error("story '{story_id}' already exists")]
    StorageConflict { story_id: String },
}

impl PipelineError {
    pub fn provider(item_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PipelineError::ProviderFailure {
            item_id: item_id.into(),
            reason: err.to_string(),
        }
    }

    /// An article that already belongs to a stored story.
    pub fn already_ingested(article_id: impl Into<String>, story_id: &str) -> Self {
        PipelineError::MalformedInput {
            item_id: article_id.into(),
            reason: format!("already ingested into '{}'", story_id),
        }
    }

    /// Whether an `anyhow` error carries a [`PipelineError::StorageConflict`].
    pub fn is_storage_conflict(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::StorageConflict { .. })
        )
    }
}
