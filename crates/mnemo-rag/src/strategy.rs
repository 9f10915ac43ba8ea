use crate::config::{EmbeddingBackend, RagConfig, StrategyKind};
use crate::embedding::{EmbeddingProvider, HashingEmbedder, OpenAiEmbeddingClient};
use crate::store::{KnowledgeRecord, KnowledgeStore};
use mnemo_core::{Hints, MnemoError, MnemoResult, RetrievalResult, Snippet, SnippetSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of snippets any strategy returns.
pub const MAX_RESULTS: usize = 8;

/// Confidence given to every literal match. Literal search carries no
/// ranking signal beyond presence and recency.
pub const LITERAL_CONFIDENCE: f32 = 0.6;

/// Hint key restricting a search to one record layer.
pub const LAYER_HINT: &str = "layer";

fn layer_hint(hints: &Hints) -> Option<&str> {
    hints.get(LAYER_HINT).and_then(serde_json::Value::as_str)
}

fn record_snippet(source: SnippetSource, record: KnowledgeRecord, confidence: f32) -> Snippet {
    Snippet::new(source, record.content, confidence)
        .with_meta("key", record.key)
        .with_meta("layer", record.layer)
        .with_meta("updated_at", record.updated_at.to_rfc3339())
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> MnemoResult<T>
where
    F: Future<Output = MnemoResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MnemoError::Timeout(format!("{what} exceeded {}ms", limit.as_millis())))?
}

/// Case-insensitive substring search, newest records first.
pub struct LiteralTextStrategy {
    store: Arc<dyn KnowledgeStore>,
    store_timeout: Duration,
}

impl LiteralTextStrategy {
    /// Literal search over `store`, each query bounded by `store_timeout`.
    pub fn new(store: Arc<dyn KnowledgeStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    async fn try_search(&self, query: &str, hints: &Hints) -> MnemoResult<Vec<Snippet>> {
        let records = bounded(
            self.store_timeout,
            "text search",
            self.store.search_text(query, layer_hint(hints), MAX_RESULTS),
        )
        .await?;

        Ok(records
            .into_iter()
            .map(|r| record_snippet(SnippetSource::InternalStore, r, LITERAL_CONFIDENCE))
            .collect())
    }

    /// Run the search. Failures come back as `ok = false`, never as an error.
    pub async fn search(&self, query: &str, hints: &Hints) -> RetrievalResult {
        match self.try_search(query, hints).await {
            Ok(snippets) => {
                debug!(hits = snippets.len(), "Literal search finished");
                RetrievalResult::success(snippets)
            }
            Err(e) => {
                warn!(error = %e, "Literal search failed");
                RetrievalResult::failed()
            }
        }
    }
}

/// Embedding nearest-neighbour search.
pub struct VectorSimilarityStrategy {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    store_timeout: Duration,
}

impl VectorSimilarityStrategy {
    /// Vector search over `store` using `embedder` for queries.
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            store_timeout,
        }
    }

    async fn try_search(&self, query: &str, hints: &Hints) -> MnemoResult<Vec<Snippet>> {
        let vector = self.embedder.embed(query).await?;

        let neighbours = bounded(
            self.store_timeout,
            "similarity search",
            self.store.nearest(&vector, layer_hint(hints), MAX_RESULTS),
        )
        .await?;

        Ok(neighbours
            .into_iter()
            .map(|(record, distance)| {
                let confidence = confidence_from_distance(distance);
                record_snippet(SnippetSource::VectorIndex, record, confidence)
                    .with_meta("distance", distance)
            })
            .collect())
    }

    /// Run the search. Any embedding or store failure comes back as
    /// `ok = false` with no snippets.
    pub async fn search(&self, query: &str, hints: &Hints) -> RetrievalResult {
        match self.try_search(query, hints).await {
            Ok(snippets) => {
                debug!(hits = snippets.len(), "Vector search finished");
                RetrievalResult::success(snippets)
            }
            Err(e) => {
                warn!(error = %e, "Vector search failed");
                RetrievalResult::failed()
            }
        }
    }
}

/// `max(0, 1 - distance)`, capped at 1 against float error.
pub fn confidence_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// The active retrieval technique of a gateway. Chosen once at construction.
pub enum Strategy {
    /// See [`LiteralTextStrategy`].
    Literal(LiteralTextStrategy),
    /// See [`VectorSimilarityStrategy`].
    Vector(VectorSimilarityStrategy),
}

impl Strategy {
    /// Build the strategy named by `config.provider` over `store`.
    pub fn from_config(config: &RagConfig, store: Arc<dyn KnowledgeStore>) -> MnemoResult<Self> {
        let timeout = config.store_timeout();
        Ok(match config.provider {
            StrategyKind::Literal => Self::Literal(LiteralTextStrategy::new(store, timeout)),
            StrategyKind::Vector => {
                let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
                    EmbeddingBackend::OpenAi => {
                        Arc::new(OpenAiEmbeddingClient::new(&config.embedding)?)
                    }
                    EmbeddingBackend::Local => Arc::new(HashingEmbedder::new(
                        config.embedding.dimension.unwrap_or(256),
                    )),
                };
                Self::Vector(VectorSimilarityStrategy::new(store, embedder, timeout))
            }
        })
    }

    /// Which variant this is.
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Literal(_) => StrategyKind::Literal,
            Self::Vector(_) => StrategyKind::Vector,
        }
    }

    /// Run the active strategy.
    pub async fn search(&self, query: &str, hints: &Hints) -> RetrievalResult {
        match self {
            Self::Literal(s) => s.search(query, hints).await,
            Self::Vector(s) => s.search(query, hints).await,
        }
    }
}
