use mnemo_core::{MnemoError, MnemoResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which retrieval technique a gateway runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Case-insensitive substring match, newest first.
    Literal,
    /// Embedding nearest-neighbour search.
    Vector,
}

impl StrategyKind {
    /// Stable identifier, also used in cache fingerprints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "literal" | "text" | "sql" => Ok(Self::Literal),
            "vector" | "embedding" | "pgvector" => Ok(Self::Vector),
            other => Err(format!("unknown retrieval provider '{other}'")),
        }
    }
}

/// Which embedding backend the vector strategy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// Deterministic local hashing embedder, no network.
    Local,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" | "hashing" => Ok(Self::Local),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

/// Embedding client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which embedding backend the vector strategy uses.
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,
    /// Model identifier sent with every request.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Bearer credential. Checked when an embedding is requested, not before.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API, without `/embeddings`.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Expected vector length. Responses of another length are rejected.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// HTTP timeout for one embedding request, in milliseconds.
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            model: default_embedding_model(),
            api_key: None,
            base_url: default_embedding_base_url(),
            dimension: None,
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Knowledge store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. `None` means an in-memory store.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Settings for one retrieval gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Active retrieval strategy.
    #[serde(default = "default_provider")]
    pub provider: StrategyKind,
    /// How long a cached result counts as fresh, in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Oldest cache entry still served as a degraded fallback. Unbounded when unset.
    #[serde(default)]
    pub max_stale_ms: Option<u64>,
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// How long an open breaker blocks calls, in milliseconds.
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
    /// Bound on a single knowledge store query, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Bound on a whole strategy invocation, in milliseconds.
    #[serde(default = "default_invoke_timeout_ms")]
    pub invoke_timeout_ms: u64,
    /// Embedding client settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Knowledge store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_provider() -> StrategyKind {
    StrategyKind::Literal
}
fn default_cache_ttl_ms() -> u64 {
    15_000
}
fn default_breaker_threshold() -> u32 {
    3
}
fn default_breaker_cooldown_ms() -> u64 {
    5_000
}
fn default_store_timeout_ms() -> u64 {
    3_000
}
fn default_invoke_timeout_ms() -> u64 {
    10_000
}
fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAi
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_timeout_ms() -> u64 {
    5_000
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            cache_ttl_ms: default_cache_ttl_ms(),
            max_stale_ms: None,
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            invoke_timeout_ms: default_invoke_timeout_ms(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl RagConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> MnemoResult<Self> {
        Self::default().apply_env()
    }

    /// Overlays the process environment on top of `self`.
    pub fn apply_env(self) -> MnemoResult<Self> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlays values returned by `lookup` on top of `self`.
    ///
    /// Empty values are ignored. Values that fail to parse are a
    /// [`MnemoError::Config`].
    pub fn apply_env_with<F>(mut self, lookup: F) -> MnemoResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RAG_PROVIDER") {
            self.provider = parse_var("RAG_PROVIDER", &v)?;
        }
        if let Some(v) = get("RAG_CACHE_TTL_MS") {
            self.cache_ttl_ms = parse_var("RAG_CACHE_TTL_MS", &v)?;
        }
        if let Some(v) = get("RAG_MAX_STALE_MS") {
            self.max_stale_ms = Some(parse_var("RAG_MAX_STALE_MS", &v)?);
        }
        if let Some(v) = get("RAG_BREAKER_THRESHOLD") {
            self.breaker_threshold = parse_var("RAG_BREAKER_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RAG_BREAKER_COOLDOWN_MS") {
            self.breaker_cooldown_ms = parse_var("RAG_BREAKER_COOLDOWN_MS", &v)?;
        }
        if let Some(v) = get("RAG_STORE_TIMEOUT_MS") {
            self.store_timeout_ms = parse_var("RAG_STORE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("RAG_INVOKE_TIMEOUT_MS") {
            self.invoke_timeout_ms = parse_var("RAG_INVOKE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("RAG_DATABASE_PATH") {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("EMBEDDING_PROVIDER") {
            self.embedding.provider = parse_var("EMBEDDING_PROVIDER", &v)?;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(parse_var("EMBEDDING_DIMENSION", &v)?);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.embedding.base_url = v;
        }

        if self.breaker_threshold == 0 {
            return Err(MnemoError::Config(
                "breaker_threshold must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.embedding.api_key.is_some() {
            copy.embedding.api_key = Some("***".to_string());
        }
        copy
    }

    /// `cache_ttl_ms` as a `Duration`.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// `max_stale_ms` as a `Duration`, if set.
    pub fn max_stale(&self) -> Option<Duration> {
        self.max_stale_ms.map(Duration::from_millis)
    }

    /// `breaker_cooldown_ms` as a `Duration`.
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    /// `store_timeout_ms` as a `Duration`.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// `invoke_timeout_ms` as a `Duration`.
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> MnemoResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| MnemoError::Config(format!("{name}={raw:?} is invalid: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.provider, StrategyKind::Literal);
        assert_eq!(config.cache_ttl(), Duration::from_millis(15_000));
        assert_eq!(config.breaker_threshold, 3);
        assert_eq!(config.breaker_cooldown(), Duration::from_millis(5_000));
        assert!(config.max_stale().is_none());
        assert_eq!(config.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_env_overlay() {
        let config = RagConfig::default()
            .apply_env_with(lookup(&[
                ("RAG_PROVIDER", "pgvector"),
                ("RAG_CACHE_TTL_MS", "2000"),
                ("RAG_MAX_STALE_MS", "60000"),
                ("RAG_BREAKER_THRESHOLD", "5"),
                ("OPENAI_API_KEY", "sk-test"),
                ("EMBEDDING_PROVIDER", "local"),
                ("EMBEDDING_DIMENSION", "64"),
                ("RAG_DATABASE_PATH", "/tmp/knowledge.db"),
            ]))
            .unwrap();

        assert_eq!(config.provider, StrategyKind::Vector);
        assert_eq!(config.cache_ttl_ms, 2000);
        assert_eq!(config.max_stale(), Some(Duration::from_secs(60)));
        assert_eq!(config.breaker_threshold, 5);
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embedding.provider, EmbeddingBackend::Local);
        assert_eq!(config.embedding.dimension, Some(64));
        assert_eq!(
            config.store.path.as_deref(),
            Some(std::path::Path::new("/tmp/knowledge.db"))
        );
    }

    #[test]
    fn test_env_empty_values_ignored() {
        let config = RagConfig::default()
            .apply_env_with(lookup(&[("RAG_PROVIDER", "  "), ("OPENAI_API_KEY", "")]))
            .unwrap();
        assert_eq!(config.provider, StrategyKind::Literal);
        assert!(config.embedding.api_key.is_none());
    }

    #[test]
    fn test_env_invalid_number() {
        let err = RagConfig::default()
            .apply_env_with(lookup(&[("RAG_CACHE_TTL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, MnemoError::Config(_)));
        assert!(err.to_string().contains("RAG_CACHE_TTL_MS"));
    }

    #[test]
    fn test_env_unknown_provider() {
        let err = RagConfig::default()
            .apply_env_with(lookup(&[("RAG_PROVIDER", "graph")]))
            .unwrap_err();
        assert!(err.to_string().contains("graph"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(RagConfig::default()
            .apply_env_with(lookup(&[("RAG_BREAKER_THRESHOLD", "0")]))
            .is_err());
    }

    #[test]
    fn test_toml_partial() {
        let config: RagConfig = toml::from_str(
            r#"
            provider = "vector"
            cache_ttl_ms = 500

            [embedding]
            model = "text-embedding-3-large"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, StrategyKind::Vector);
        assert_eq!(config.cache_ttl_ms, 500);
        assert_eq!(config.breaker_threshold, 3);
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.embedding.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_redacted_masks_key() {
        let mut config = RagConfig::default();
        config.embedding.api_key = Some("sk-secret".to_string());
        assert_eq!(config.redacted().embedding.api_key.as_deref(), Some("***"));
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-secret"));
    }
}
