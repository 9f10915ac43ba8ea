use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::cache::{fingerprint, normalize_query, ResultCache};
use crate::config::{RagConfig, StrategyKind};
use crate::store::KnowledgeStore;
use crate::strategy::Strategy;
use mnemo_core::{Hints, MnemoResult, RetrievalResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Counters describing how a gateway has served its requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Calls to `retrieve`.
    pub requests: u64,
    /// Calls answered from a fresh cache entry.
    pub cache_hits: u64,
    /// Calls that reached the strategy.
    pub strategy_calls: u64,
    /// Strategy calls that failed or timed out.
    pub strategy_failures: u64,
    /// Degraded answers served from a stale cache entry.
    pub stale_fallbacks: u64,
    /// Degraded answers with nothing to serve.
    pub empty_fallbacks: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    strategy_calls: AtomicU64,
    strategy_failures: AtomicU64,
    stale_fallbacks: AtomicU64,
    empty_fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Single entry point for retrieval.
///
/// Owns one strategy, the breaker guarding it and the cache in front of
/// it. `retrieve` never fails: when the strategy cannot answer, callers
/// get a stale cached result or an empty one, marked `degraded`.
///
/// The breaker and cache are locked only for synchronous
/// read-modify-write steps, never across an `.await`, so one gateway can
/// be shared behind an `Arc` by any number of concurrent callers.
pub struct RetrievalGateway {
    strategy: Strategy,
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<ResultCache>,
    invoke_timeout: Duration,
    counters: Counters,
}

impl RetrievalGateway {
    /// Assemble a gateway from its parts.
    pub fn new(
        strategy: Strategy,
        breaker: CircuitBreaker,
        cache: ResultCache,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            breaker: Mutex::new(breaker),
            cache: Mutex::new(cache),
            invoke_timeout,
            counters: Counters::default(),
        }
    }

    /// Wire a gateway from configuration over the given store.
    pub fn from_config(config: &RagConfig, store: Arc<dyn KnowledgeStore>) -> MnemoResult<Self> {
        let strategy = Strategy::from_config(config, store)?;
        debug!(
            strategy = strategy.kind().as_str(),
            cache_ttl_ms = config.cache_ttl_ms,
            breaker_threshold = config.breaker_threshold,
            "Retrieval gateway configured"
        );
        Ok(Self::new(
            strategy,
            CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown()),
            ResultCache::new(config.cache_ttl(), config.max_stale()),
            config.invoke_timeout(),
        ))
    }

    /// Retrieve context for `query`.
    ///
    /// Surrounding and repeated whitespace in `query` is collapsed before
    /// both the cache lookup and the strategy call.
    pub async fn retrieve(&self, query: &str, hints: &Hints) -> RetrievalResult {
        bump(&self.counters.requests);
        let kind = self.strategy.kind();
        let query = normalize_query(query);
        let key = fingerprint(kind.as_str(), &query, hints);

        let now = Instant::now();
        let fresh = self.cache.lock().fresh(&key, now);
        if let Some(hit) = fresh {
            bump(&self.counters.cache_hits);
            debug!(strategy = kind.as_str(), "Cache hit");
            return hit;
        }

        let allowed = self.breaker.lock().can_try(now);
        if !allowed {
            debug!(strategy = kind.as_str(), "Circuit open, skipping strategy");
            return self.fallback(&key, now);
        }

        bump(&self.counters.strategy_calls);
        let search = self.strategy.search(&query, hints);
        let outcome = tokio::time::timeout(self.invoke_timeout, search).await;
        let now = Instant::now();

        match outcome {
            Ok(result) if result.ok => {
                self.breaker.lock().record_success();
                self.cache.lock().insert(key, result.clone(), now);
                debug!(
                    strategy = kind.as_str(),
                    snippets = result.snippets.len(),
                    "Strategy answered"
                );
                result
            }
            Ok(_) => self.record_failure(&key, now),
            Err(_) => {
                warn!(
                    strategy = kind.as_str(),
                    timeout_ms = self.invoke_timeout.as_millis() as u64,
                    "Strategy invocation timed out"
                );
                self.record_failure(&key, now)
            }
        }
    }

    fn record_failure(&self, key: &str, now: Instant) -> RetrievalResult {
        bump(&self.counters.strategy_failures);
        self.breaker.lock().record_failure(now);
        self.fallback(key, now)
    }

    fn fallback(&self, key: &str, now: Instant) -> RetrievalResult {
        let stale = self.cache.lock().fallback(key, now);
        match stale {
            Some(result) => {
                bump(&self.counters.stale_fallbacks);
                debug!("Serving stale cached result");
                result.into_degraded()
            }
            None => {
                bump(&self.counters.empty_fallbacks);
                RetrievalResult::unavailable()
            }
        }
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached results, fresh or stale.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Current breaker state and failure count.
    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.lock().snapshot()
    }

    /// The strategy this gateway was built with.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> GatewayStats {
        let c = &self.counters;
        GatewayStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            strategy_calls: c.strategy_calls.load(Ordering::Relaxed),
            strategy_failures: c.strategy_failures.load(Ordering::Relaxed),
            stale_fallbacks: c.stale_fallbacks.load(Ordering::Relaxed),
            empty_fallbacks: c.empty_fallbacks.load(Ordering::Relaxed),
        }
    }
}
