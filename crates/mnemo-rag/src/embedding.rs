use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use mnemo_core::{MnemoError, MnemoResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Longest slice of an upstream error body kept in error messages.
const ERROR_BODY_LIMIT: usize = 300;

/// Trait for turning text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for a single text.
    ///
    /// Empty text is passed through; trimming is the caller's business.
    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>>;

    /// Dimension of the vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// No retries: a failed call is reported once and the caller decides what
/// to do about it.
pub struct OpenAiEmbeddingClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimension: Option<usize>,
    http: reqwest::Client,
}

impl OpenAiEmbeddingClient {
    /// Build a client from configuration.
    ///
    /// A missing API key is not an error here; it surfaces as
    /// [`MnemoError::Config`] on the first [`embed`](EmbeddingProvider::embed).
    pub fn new(config: &EmbeddingConfig) -> MnemoResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| MnemoError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            http,
        })
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            MnemoError::Config("embedding API key is not configured (OPENAI_API_KEY)".to_string())
        })?;

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        debug!(model = %self.model, chars = text.len(), "Requesting embedding");

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MnemoError::Timeout(format!("embedding request: {e}"))
                } else {
                    MnemoError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(MnemoError::Upstream(format!(
                "embedding service returned {status}: {detail}"
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MnemoError::Upstream(format!("malformed embedding payload: {e}")))?;

        parse_embedding(&payload, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension.unwrap_or(match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        })
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding(payload: &serde_json::Value, expected: Option<usize>) -> MnemoResult<Vec<f32>> {
    let raw = payload
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|first| first.get("embedding"))
        .ok_or_else(|| MnemoError::Upstream("embedding payload has no data[0].embedding".into()))?;

    let values = raw
        .as_array()
        .ok_or_else(|| MnemoError::Upstream("embedding field is not an array".into()))?;

    let vector = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| MnemoError::Upstream("embedding contains non-numeric values".into()))?;

    if let Some(dim) = expected {
        if vector.len() != dim {
            return Err(MnemoError::Upstream(format!(
                "embedding has {} dimensions, expected {dim}",
                vector.len()
            )));
        }
    }

    Ok(vector)
}

/// Local bag-of-words hashing embedder (no external API needed).
///
/// Deterministic and L2-normalised. Good enough for offline runs and tests;
/// use a hosted model for real ranking quality.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Embedder producing vectors of `dimension` (at least 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .collect();

        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for &word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            let h1 = fnv1a(word.as_bytes()) as usize;
            let h2 = fnv1a(&[word.as_bytes(), &[1u8]].concat()) as usize;
            vector[h1 % self.dimension] += tf;
            vector[h2 % self.dimension] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
