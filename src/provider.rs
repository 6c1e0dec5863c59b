//! Concrete [`ModelProvider`] backends.
//!
//! [`ModelClient`] dispatches on `[model] provider`:
//!
//! | Config value | Embeddings                                   |
//! |--------------|----------------------------------------------|
//! | `"disabled"` | every call fails                             |
//! | `"hashed"`   | offline feature-hashing bag of words         |
//! | `"openai"`   | `POST https://api.openai.com/v1/embeddings`  |
//! | `"ollama"`   | `POST {url}/api/embed`                       |
//! | `"local"`    | fastembed (`local-embeddings-fastembed`)     |
//!
//! Named-entity recognition goes to `[model] ner_url` when set
//! (`POST {"text": ...}` → `[{"text","label","start","end","score"}]`).
//! Without it the model contributes no spans and dictionary rules do the
//! work.
//!
//! # Retry Strategy
//!
//! HTTP backends retry with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every call is additionally bounded by `[model] timeout_secs`; expiry is
//! an ordinary error, which the pipeline records as a per-item failure.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;

use newsdesk_core::embedding::normalize;
use newsdesk_core::models::RecognizedSpan;
use newsdesk_core::ModelProvider;

use crate::config::ModelConfig;

/// Default dimensionality of the `hashed` backend.
pub const DEFAULT_HASHED_DIMS: usize = 256;

#[derive(Debug, Clone)]
enum Backend {
    Disabled,
    Hashed { dims: usize },
    OpenAI { model: String, api_key: String },
    Ollama { model: String, url: String },
    #[cfg(feature = "local-embeddings-fastembed")]
    Local { model: String },
}

/// The model collaborator used by the `nd` binary.
pub struct ModelClient {
    backend: Backend,
    model_name: String,
    ner_url: Option<String>,
    max_retries: u32,
    timeout: Duration,
    http: reqwest::Client,
    #[cfg(feature = "local-embeddings-fastembed")]
    local: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

/// Build a [`ModelClient`] from configuration.
///
/// # Errors
///
/// Unknown provider names, missing model names for remote providers, a
/// missing `OPENAI_API_KEY`, or `"local"` without the fastembed feature.
pub fn create_client(config: &ModelConfig) -> Result<ModelClient> {
    let backend = match config.provider.as_str() {
        "disabled" => Backend::Disabled,
        "hashed" => Backend::Hashed {
            dims: config.dims.unwrap_or(DEFAULT_HASHED_DIMS),
        },
        "openai" => {
            let model = config
                .model
                .clone()
                .ok_or_else(|| anyhow!("model.model required for OpenAI provider"))?;
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Backend::OpenAI { model, api_key }
        }
        "ollama" => Backend::Ollama {
            model: config
                .model
                .clone()
                .ok_or_else(|| anyhow!("model.model required for Ollama provider"))?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        },
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Backend::Local {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string()),
        },
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local model provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown model provider: {}", other),
    };

    let model_name = match &backend {
        Backend::Disabled => "disabled".to_string(),
        Backend::Hashed { dims } => format!("hashed-{}", dims),
        Backend::OpenAI { model, .. } | Backend::Ollama { model, .. } => model.clone(),
        #[cfg(feature = "local-embeddings-fastembed")]
        Backend::Local { model } => model.clone(),
    };

    let timeout = Duration::from_secs(config.timeout_secs);
    let http = reqwest::Client::builder().timeout(timeout).build()?;

    Ok(ModelClient {
        backend,
        model_name,
        ner_url: config.ner_url.clone(),
        max_retries: config.max_retries,
        timeout,
        http,
        #[cfg(feature = "local-embeddings-fastembed")]
        local: Default::default(),
    })
}

impl ModelClient {
    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {}s", what, self.timeout.as_secs()))?
    }

    /// POST a JSON body with retry/backoff and return the parsed response.
    async fn post_json(
        &self,
        service: &str,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(service, attempt, delay_secs = delay.as_secs(), "retrying model call");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.http.post(url).header("Content-Type", "application/json");
            if let Some(token) = bearer {
                req = req.header("Authorization", format!("Bearer {}", token));
            }

            match req.json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("{} error {}: {}", service, status, body_text));
                        continue;
                    }
                    bail!("{} error {}: {}", service, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!("{} connection error ({}): {}", service, url, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} call failed after retries", service)))
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            Backend::Disabled => bail!("Model provider is disabled"),
            Backend::Hashed { dims } => Ok(hashed_embedding(text, *dims)),
            Backend::OpenAI { model, api_key } => {
                let body = serde_json::json!({ "model": model, "input": [text] });
                let json = self
                    .post_json("OpenAI API", "https://api.openai.com/v1/embeddings", Some(api_key.as_str()), &body)
                    .await?;
                first(parse_openai_response(&json)?)
            }
            Backend::Ollama { model, url } => {
                let body = serde_json::json!({ "model": model, "input": [text] });
                let json = self
                    .post_json("Ollama API", &format!("{}/api/embed", url), None, &body)
                    .await?;
                first(parse_ollama_response(&json)?)
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local { model } => self.embed_local(model, text).await,
        }
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    async fn embed_local(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let fastembed_model = config_to_fastembed_model(model)?;
        let cell = self.local.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = cell.lock().map_err(|_| anyhow!("local model lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
                )
                .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local embedding model unavailable"))?;
            let embeddings = model
                .embed(vec![text], Some(1))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))?;
            first(embeddings)
        })
        .await?
    }

    async fn ner_inner(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
        if matches!(self.backend, Backend::Disabled) {
            bail!("Model provider is disabled");
        }
        let Some(url) = &self.ner_url else {
            return Ok(Vec::new());
        };
        let json = self
            .post_json("NER service", url, None, &serde_json::json!({ "text": text }))
            .await?;
        parse_ner_response(json)
    }
}

#[async_trait]
impl ModelProvider for ModelClient {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.bounded("embedding", self.embed_inner(text)).await
    }

    async fn extract_entities(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
        self.bounded("entity recognition", self.ner_inner(text)).await
    }
}

fn first(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    if vectors.is_empty() {
        bail!("Empty embedding response");
    }
    Ok(vectors.swap_remove(0))
}

/// Deterministic bag-of-words embedding.
///
/// Each lower-cased alphanumeric token is hashed with SHA-256; the first
/// eight bytes pick a bucket and the top bit a sign. The result is
/// L2-normalised, so texts sharing most of their words score close to `1.0`.
pub fn hashed_embedding(text: &str, dims: usize) -> Vec<f32> {
    let dims = dims.max(1);
    let mut v = vec![0.0f32; dims];
    let lowered = text.to_lowercase();
    for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let digest = Sha256::digest(token.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(word);
        let bucket = (h % dims as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
    normalize(&mut v);
    v
}

/// Parse the OpenAI embeddings API response (`data[].embedding`).
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
            Ok(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

/// Parse the Ollama `/api/embed` response (`embeddings[][]`).
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            Ok(embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct NerSpan {
    text: String,
    label: String,
    #[serde(default)]
    start: usize,
    #[serde(default)]
    end: usize,
    #[serde(default, alias = "confidence")]
    score: Option<f64>,
}

/// Parse an NER service response: either a bare array of spans or
/// `{"entities": [...]}`.
fn parse_ner_response(json: serde_json::Value) -> Result<Vec<RecognizedSpan>> {
    let spans = match json {
        serde_json::Value::Object(mut map) => map
            .remove("entities")
            .ok_or_else(|| anyhow!("Invalid NER response: missing entities array"))?,
        other => other,
    };
    let spans: Vec<NerSpan> = serde_json::from_value(spans)?;
    Ok(spans
        .into_iter()
        .map(|s| RecognizedSpan {
            text: s.text,
            label: s.label,
            start: s.start,
            end: s.end,
            confidence: s.score,
        })
        .collect())
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_core::embedding::cosine_similarity;

    fn config(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_hashed_embedding_is_deterministic_unit_vector() {
        let a = hashed_embedding("RBI hikes repo rate", 64);
        let b = hashed_embedding("RBI hikes repo rate", 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashed_embedding_ranks_overlap_higher() {
        let base = hashed_embedding("RBI increases repo rate by 25 basis points", 256);
        let near = hashed_embedding("RBI increases the repo rate by 25 basis points", 256);
        let far = hashed_embedding("Infosys wins a large outsourcing contract", 256);
        assert!(cosine_similarity(&base, &near) > 0.85);
        assert!(cosine_similarity(&base, &far) < cosine_similarity(&base, &near));
    }

    #[tokio::test]
    async fn test_disabled_client_fails_every_call() {
        let client = create_client(&config("disabled")).unwrap();
        assert_eq!(client.model_name(), "disabled");
        assert!(client.embed("x").await.is_err());
        assert!(client.extract_entities("x").await.is_err());
    }

    #[tokio::test]
    async fn test_hashed_client_without_ner_returns_no_spans() {
        let client = create_client(&config("hashed")).unwrap();
        assert_eq!(client.model_name(), "hashed-256");
        assert_eq!(client.embed("HDFC Bank").await.unwrap().len(), DEFAULT_HASHED_DIMS);
        assert!(client.extract_entities("HDFC Bank").await.unwrap().is_empty());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(create_client(&config("bert")).is_err());
    }

    #[test]
    fn test_parse_ner_response_shapes() {
        let bare = serde_json::json!([{"text": "RBI", "label": "ORG", "start": 0, "end": 3, "score": 0.9}]);
        let spans = parse_ner_response(bare).unwrap();
        assert_eq!(spans[0].confidence, Some(0.9));
        assert_eq!(spans[0].end, 3);

        let wrapped = serde_json::json!({"entities": [{"text": "Das", "label": "PERSON"}]});
        let spans = parse_ner_response(wrapped).unwrap();
        assert_eq!(spans[0].label, "PERSON");
        assert_eq!(spans[0].confidence, None);
    }

    #[test]
    fn test_parse_embedding_responses() {
        let openai = serde_json::json!({"data": [{"embedding": [0.5, -0.5]}]});
        assert_eq!(parse_openai_response(&openai).unwrap(), vec![vec![0.5f32, -0.5]]);
        let ollama = serde_json::json!({"embeddings": [[1.0, 2.0]]});
        assert_eq!(parse_ollama_response(&ollama).unwrap(), vec![vec![1.0f32, 2.0]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }
}
