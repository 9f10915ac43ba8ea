use mnemo_core::{Hints, RetrievalResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Separates fingerprint components so `("ab", "c")` and `("a", "bc")` differ.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Trims the query and collapses inner whitespace runs to one space.
///
/// The gateway runs the strategy on this form too, so every query sharing
/// a cache entry is one the strategy answers identically.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic cache key for one request against one strategy.
///
/// The query goes through [`normalize_query`]; case is kept because
/// embedding models distinguish it. Hints are serialized in key order.
pub fn fingerprint(strategy_id: &str, query: &str, hints: &Hints) -> String {
    let normalized = normalize_query(query);
    let hints_json = serde_json::to_string(hints).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(strategy_id.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalized.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(hints_json.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: Instant,
    result: RetrievalResult,
}

/// Short-lived result cache.
///
/// Entries are never evicted by age. An entry older than `ttl` is no
/// longer fresh but stays available as a degraded fallback, optionally
/// bounded by `max_stale`.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    max_stale: Option<Duration>,
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    /// Empty cache; entries younger than `ttl` are fresh.
    pub fn new(ttl: Duration, max_stale: Option<Duration>) -> Self {
        Self {
            ttl,
            max_stale,
            entries: HashMap::new(),
        }
    }

    /// The cached result if it is younger than the TTL.
    pub fn fresh(&self, key: &str, now: Instant) -> Option<RetrievalResult> {
        self.entries
            .get(key)
            .filter(|e| now.saturating_duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.result.clone())
    }

    /// The cached result regardless of freshness, unless it is older than
    /// `max_stale`.
    pub fn fallback(&self, key: &str, now: Instant) -> Option<RetrievalResult> {
        self.entries
            .get(key)
            .filter(|e| {
                self.max_stale
                    .map_or(true, |max| now.saturating_duration_since(e.inserted_at) <= max)
            })
            .map(|e| e.result.clone())
    }

    /// Store a result. Results with `ok = false` are ignored.
    pub fn insert(&mut self, key: String, result: RetrievalResult, now: Instant) -> bool {
        if !result.ok {
            return false;
        }
        self.entries.insert(
            key,
            CacheEntry {
                inserted_at: now,
                result,
            },
        );
        true
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
