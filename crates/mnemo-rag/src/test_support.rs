//! Fakes shared by the unit tests of this crate.

use crate::embedding::EmbeddingProvider;
use crate::store::{InMemoryKnowledgeStore, KnowledgeRecord, KnowledgeStore};
use async_trait::async_trait;
use mnemo_core::{MnemoError, MnemoResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory store that counts queries and can be switched into failure.
pub(crate) struct ScriptedStore {
    inner: InMemoryKnowledgeStore,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryKnowledgeStore::new(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub(crate) async fn insert(&self, record: KnowledgeRecord) {
        self.inner.insert(record).await;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> MnemoResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(MnemoError::Store("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KnowledgeStore for ScriptedStore {
    async fn search_text(
        &self,
        needle: &str,
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<KnowledgeRecord>> {
        self.enter()?;
        self.inner.search_text(needle, layer, limit).await
    }

    async fn nearest(
        &self,
        vector: &[f32],
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<(KnowledgeRecord, f32)>> {
        self.enter()?;
        self.inner.nearest(vector, layer, limit).await
    }
}

/// Embedder whose upstream always answers 500.
pub(crate) struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> MnemoResult<Vec<f32>> {
        Err(MnemoError::Upstream(
            "embedding service returned 500 Internal Server Error".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Store whose queries never complete.
pub(crate) struct StalledStore;

#[async_trait]
impl KnowledgeStore for StalledStore {
    async fn search_text(
        &self,
        _needle: &str,
        _layer: Option<&str>,
        _limit: usize,
    ) -> MnemoResult<Vec<KnowledgeRecord>> {
        std::future::pending().await
    }

    async fn nearest(
        &self,
        _vector: &[f32],
        _layer: Option<&str>,
        _limit: usize,
    ) -> MnemoResult<Vec<(KnowledgeRecord, f32)>> {
        std::future::pending().await
    }
}
