//! The model collaborator: text embeddings and named-entity recognition.
//!
//! Concrete providers (hashed, OpenAI, Ollama, fastembed, HTTP NER) live in
//! the `newsdesk` app crate. Core code only sees this trait, so tests can run
//! against deterministic stubs.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::RecognizedSpan;

/// A pretrained embedding + NER capability.
///
/// Both calls are treated as pure functions of their input. Implementations
/// are responsible for bounding call time; a timeout surfaces as an error
/// and is handled as a per-item failure by the pipeline.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the embedding model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Embed a single text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Recognise generic named-entity spans in a text.
    async fn extract_entities(&self, text: &str) -> Result<Vec<RecognizedSpan>>;
}
