use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_core::{MnemoError, MnemoResult};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One record of the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Unique record key.
    pub key: String,
    /// Grouping the record belongs to, e.g. `prefs`.
    pub layer: String,
    /// Text body searched by the literal strategy.
    pub content: String,
    /// Last update; literal results are ordered by it, newest first.
    pub updated_at: DateTime<Utc>,
    /// Precomputed embedding; only records that have one take part in vector search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeRecord {
    /// Creates a record stamped with the current time and no embedding.
    pub fn new(
        key: impl Into<String>,
        layer: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            layer: layer.into(),
            content: content.into(),
            updated_at: Utc::now(),
            embedding: None,
        }
    }

    /// Sets the last-update timestamp. Chainable.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    /// Sets the precomputed embedding. Chainable.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Read-only query contract the retrieval strategies need from a knowledge store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Case-insensitive substring match over record content, newest first.
    async fn search_text(
        &self,
        needle: &str,
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<KnowledgeRecord>>;

    /// Records with an embedding, ordered by ascending cosine distance to
    /// `vector`. Records whose embedding length differs are skipped.
    async fn nearest(
        &self,
        vector: &[f32],
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<(KnowledgeRecord, f32)>>;
}

/// In-memory knowledge store.
/// Suitable for tests, demos and small datasets.
pub struct InMemoryKnowledgeStore {
    records: RwLock<Vec<KnowledgeRecord>>,
}

impl InMemoryKnowledgeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Insert a record, replacing any record with the same key.
    pub async fn insert(&self, record: KnowledgeRecord) {
        let mut records = self.records.write().await;
        records.retain(|r| r.key != record.key);
        records.push(record);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search_text(
        &self,
        needle: &str,
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<KnowledgeRecord>> {
        let needle = needle.to_lowercase();
        let records = self.records.read().await;

        let mut hits: Vec<KnowledgeRecord> = records
            .iter()
            .filter(|r| layer.map_or(true, |l| r.layer == l))
            .filter(|r| r.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn nearest(
        &self,
        vector: &[f32],
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<(KnowledgeRecord, f32)>> {
        if vector.is_empty() {
            return Err(MnemoError::Store("empty query vector".to_string()));
        }

        let records = self.records.read().await;
        let candidates = records
            .iter()
            .filter(|r| layer.map_or(true, |l| r.layer == l))
            .filter_map(|r| r.embedding.as_deref().map(|e| (r, e)));

        Ok(rank_by_distance(vector, candidates, limit))
    }
}

/// Orders `(record, embedding)` candidates by ascending cosine distance to
/// `query` and keeps the first `limit`.
pub(crate) fn rank_by_distance<'a, I>(
    query: &[f32],
    candidates: I,
    limit: usize,
) -> Vec<(KnowledgeRecord, f32)>
where
    I: IntoIterator<Item = (&'a KnowledgeRecord, &'a [f32])>,
{
    let mut scored: Vec<(KnowledgeRecord, f32)> = candidates
        .into_iter()
        .filter(|(_, emb)| emb.len() == query.len())
        .map(|(record, emb)| (record.clone(), cosine_distance(query, emb)))
        .collect();

    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Cosine distance (`1 - cosine similarity`), in `[0, 2]`.
///
/// A zero vector is treated as orthogonal to everything (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        1.0
    } else {
        1.0 - dot / (na * nb)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes_ago: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes_ago)
    }

    #[tokio::test]
    async fn test_search_text_case_insensitive_newest_first() {
        let store = InMemoryKnowledgeStore::new();
        store
            .insert(
                KnowledgeRecord::new("old", "prefs", "Prefers the DARK theme")
                    .with_updated_at(at(30)),
            )
            .await;
        store
            .insert(
                KnowledgeRecord::new("new", "prefs", "theme switched to light")
                    .with_updated_at(at(1)),
            )
            .await;
        store
            .insert(KnowledgeRecord::new("other", "prefs", "likes rust").with_updated_at(at(0)))
            .await;

        let hits = store.search_text("Theme", None, 8).await.unwrap();
        let keys: Vec<&str> = hits.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_search_text_limit_and_layer() {
        let store = InMemoryKnowledgeStore::new();
        for i in 0..12 {
            let layer = if i % 2 == 0 { "even" } else { "odd" };
            store
                .insert(KnowledgeRecord::new(format!("k{i}"), layer, "note").with_updated_at(at(i)))
                .await;
        }

        assert_eq!(store.search_text("note", None, 8).await.unwrap().len(), 8);
        let even = store.search_text("note", Some("even"), 8).await.unwrap();
        assert_eq!(even.len(), 6);
        assert!(even.iter().all(|r| r.layer == "even"));
    }

    #[tokio::test]
    async fn test_insert_replaces_same_key() {
        let store = InMemoryKnowledgeStore::new();
        store.insert(KnowledgeRecord::new("k", "l", "first")).await;
        store.insert(KnowledgeRecord::new("k", "l", "second")).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.search_text("second", None, 8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance() {
        let store = InMemoryKnowledgeStore::new();
        store
            .insert(KnowledgeRecord::new("far", "l", "far").with_embedding(vec![0.0, 1.0]))
            .await;
        store
            .insert(KnowledgeRecord::new("close", "l", "close").with_embedding(vec![0.9, 0.1]))
            .await;
        store.insert(KnowledgeRecord::new("plain", "l", "no embedding")).await;
        store
            .insert(KnowledgeRecord::new("wrong", "l", "3d").with_embedding(vec![1.0, 0.0, 0.0]))
            .await;

        let hits = store.nearest(&[1.0, 0.0], None, 8).await.unwrap();
        let keys: Vec<&str> = hits.iter().map(|(r, _)| r.key.as_str()).collect();
        assert_eq!(keys, vec!["close", "far"]);
        assert!(hits[0].1 < hits[1].1);
    }

    #[tokio::test]
    async fn test_nearest_empty_vector() {
        let store = InMemoryKnowledgeStore::new();
        assert!(store.nearest(&[], None, 8).await.is_err());
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
