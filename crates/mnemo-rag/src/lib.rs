//! Retrieval gateway backing the chat's memory feature.
//!
//! Queries a knowledge store through one of two interchangeable search
//! strategies, shields callers from an unhealthy store with a circuit
//! breaker, and absorbs bursts of identical queries with a short-lived
//! result cache. [`RetrievalGateway::retrieve`] always resolves to a
//! [`RetrievalResult`](mnemo_core::RetrievalResult); failures show up as
//! `ok = false` or `degraded = true`, never as errors.
//!
//! # Main types
//!
//! - [`RetrievalGateway`] — Cache → breaker → strategy orchestration.
//! - [`Strategy`] — Closed set of search strategies chosen at construction.
//! - [`CircuitBreaker`] — Consecutive-failure breaker with half-open trials.
//! - [`ResultCache`] — Fingerprint-keyed cache with stale fallback.
//! - [`KnowledgeStore`] — Read contract over stored records.
//! - [`EmbeddingProvider`] — Text to vector conversion.
//! - [`RagConfig`] — Defaults, TOML and environment configuration.

/// Consecutive-failure circuit breaker.
pub mod breaker;
/// Result cache and request fingerprints.
pub mod cache;
/// Gateway configuration.
pub mod config;
/// Embedding providers: OpenAI-compatible HTTP client and local hashing.
pub mod embedding;
/// Retrieval gateway.
pub mod gateway;
/// SQLite knowledge store.
pub mod sqlite;
/// Knowledge store trait and in-memory implementation.
pub mod store;
/// Literal and vector search strategies.
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cache::{fingerprint, normalize_query, ResultCache};
pub use config::{EmbeddingBackend, EmbeddingConfig, RagConfig, StoreConfig, StrategyKind};
pub use embedding::{EmbeddingProvider, HashingEmbedder, OpenAiEmbeddingClient};
pub use gateway::{GatewayStats, RetrievalGateway};
pub use sqlite::SqliteKnowledgeStore;
pub use store::{cosine_distance, InMemoryKnowledgeStore, KnowledgeRecord, KnowledgeStore};
pub use strategy::{
    confidence_from_distance, LiteralTextStrategy, Strategy, VectorSimilarityStrategy,
    LAYER_HINT, MAX_RESULTS,
};
