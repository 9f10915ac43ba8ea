use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strategy-specific request hints (domain context, user level, ...).
///
/// Ordered so that its JSON form is deterministic and can take part in a
/// cache fingerprint.
pub type Hints = BTreeMap<String, serde_json::Value>;

/// Text handed to the chat flow when retrieval produced nothing usable.
pub const NO_CONTEXT: &str = "no additional context found";

/// Where a [`Snippet`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetSource {
    /// Literal match against the internal knowledge store.
    InternalStore,
    /// Nearest-neighbour hit from the vector index.
    VectorIndex,
    /// Content fetched from the open web.
    Web,
    /// Content supplied by a partner API.
    PartnerApi,
}

impl SnippetSource {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InternalStore => "internal_store",
            Self::VectorIndex => "vector_index",
            Self::Web => "web",
            Self::PartnerApi => "partner_api",
        }
    }
}

impl fmt::Display for SnippetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieved unit of knowledge.
///
/// Fields are only readable once the snippet is built; confidence is always
/// kept within `[0, 1]`, deserialized snippets included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSnippet")]
pub struct Snippet {
    source: SnippetSource,
    content: String,
    confidence: f32,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Wire form of a [`Snippet`], routed through [`Snippet::new`] on the way in.
#[derive(Deserialize)]
struct RawSnippet {
    source: SnippetSource,
    content: String,
    confidence: f32,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl From<RawSnippet> for Snippet {
    fn from(raw: RawSnippet) -> Self {
        let mut snippet = Snippet::new(raw.source, raw.content, raw.confidence);
        snippet.metadata = raw.metadata;
        snippet
    }
}

impl Snippet {
    /// Creates a snippet, clamping `confidence` into `[0, 1]`.
    ///
    /// A NaN confidence is treated as zero.
    pub fn new(source: SnippetSource, content: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            source,
            content: content.into(),
            confidence,
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches one metadata entry. Chainable.
    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Origin of the snippet.
    pub fn source(&self) -> SnippetSource {
        self.source
    }

    /// Text body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Confidence in `[0, 1]`.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Opaque metadata (record key, layer, update time, distance...).
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Looks up a single metadata value.
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// Descriptive reference attached to a result. Never affects ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Free-text label of the source.
    pub source: String,
    /// Link to the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Human readable title, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Citation {
    /// Creates a citation with only a source label.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: None,
            title: None,
        }
    }
}

/// Outcome of a retrieval.
///
/// `ok` says whether the strategy ran without error. `degraded` marks a
/// result that did not come from a fresh successful call (stale cache
/// entry or empty fallback); callers must not treat its snippets as fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The strategy executed without error.
    pub ok: bool,
    /// The result is a stale or empty fallback.
    pub degraded: bool,
    /// Snippets, highest confidence first.
    pub snippets: Vec<Snippet>,
    /// Optional citations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl RetrievalResult {
    /// A fresh successful result.
    pub fn success(snippets: Vec<Snippet>) -> Self {
        Self {
            ok: true,
            degraded: false,
            snippets,
            citations: None,
        }
    }

    /// A strategy failure: nothing retrieved.
    pub fn failed() -> Self {
        Self {
            ok: false,
            degraded: false,
            snippets: Vec::new(),
            citations: None,
        }
    }

    /// The empty fallback served when nothing else is available.
    pub fn unavailable() -> Self {
        Self {
            ok: false,
            degraded: true,
            snippets: Vec::new(),
            citations: None,
        }
    }

    /// Marks this result as degraded, keeping everything else.
    pub fn into_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Attaches citations. Chainable.
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }

    /// Returns `true` if there are no snippets.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Renders the snippets as a prompt context block of at most
    /// `max_chars` characters.
    ///
    /// An empty result renders as [`NO_CONTEXT`], so the chat flow can keep
    /// generating without retrieved context.
    pub fn render_context(&self, max_chars: usize) -> String {
        if self.snippets.is_empty() {
            return NO_CONTEXT.to_string();
        }

        let mut out = String::new();
        if self.degraded {
            out.push_str("(cached context, may be out of date)\n");
        }
        for (i, snippet) in self.snippets.iter().enumerate() {
            let line = format!(
                "[{}] ({}, {:.2}) {}\n",
                i + 1,
                snippet.source(),
                snippet.confidence(),
                snippet.content()
            );
            out.push_str(&line);
        }

        if out.chars().count() > max_chars {
            out = out.chars().take(max_chars).collect();
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Snippet::new(SnippetSource::Web, "a", 1.7).confidence(), 1.0);
        assert_eq!(Snippet::new(SnippetSource::Web, "a", -0.2).confidence(), 0.0);
        assert_eq!(Snippet::new(SnippetSource::Web, "a", f32::NAN).confidence(), 0.0);
        assert_eq!(Snippet::new(SnippetSource::Web, "a", 0.6).confidence(), 0.6);
    }

    #[test]
    fn test_deserialized_confidence_is_clamped() {
        let high: Snippet = serde_json::from_value(serde_json::json!({
            "source": "web",
            "content": "a",
            "confidence": 1.5,
            "metadata": { "key": "k" }
        }))
        .unwrap();
        assert_eq!(high.confidence(), 1.0);
        assert_eq!(high.meta("key"), Some(&serde_json::json!("k")));

        let low: Snippet = serde_json::from_str(
            r#"{"source":"vector_index","content":"b","confidence":-0.3}"#,
        )
        .unwrap();
        assert_eq!(low.confidence(), 0.0);
        assert!(low.metadata().is_empty());
    }

    #[test]
    fn test_fallback_constructors() {
        let failed = RetrievalResult::failed();
        assert!(!failed.ok && !failed.degraded && failed.is_empty());

        let unavailable = RetrievalResult::unavailable();
        assert!(!unavailable.ok && unavailable.degraded && unavailable.is_empty());
    }

    #[test]
    fn test_into_degraded_keeps_snippets() {
        let fresh = RetrievalResult::success(vec![Snippet::new(
            SnippetSource::InternalStore,
            "dark theme",
            0.6,
        )]);
        let stale = fresh.clone().into_degraded();
        assert!(stale.ok);
        assert!(stale.degraded);
        assert_eq!(stale.snippets, fresh.snippets);
    }

    #[test]
    fn test_render_context_empty() {
        assert_eq!(RetrievalResult::unavailable().render_context(200), NO_CONTEXT);
    }

    #[test]
    fn test_render_context_lists_snippets() {
        let result = RetrievalResult::success(vec![
            Snippet::new(SnippetSource::VectorIndex, "first", 0.9),
            Snippet::new(SnippetSource::InternalStore, "second", 0.6),
        ]);
        let text = result.render_context(1000);
        assert!(text.starts_with("[1] (vector_index, 0.90) first"));
        assert!(text.contains("[2] (internal_store, 0.60) second"));
    }

    #[test]
    fn test_render_context_truncates_on_char_boundary() {
        let result = RetrievalResult::success(vec![Snippet::new(
            SnippetSource::Web,
            "ünïcödé ünïcödé ünïcödé",
            0.5,
        )]);
        let text = result.render_context(10);
        assert_eq!(text.chars().count(), 10);
    }

    #[test]
    fn test_render_context_flags_degraded() {
        let result = RetrievalResult::success(vec![Snippet::new(SnippetSource::Web, "x", 0.5)])
            .into_degraded();
        assert!(result.render_context(500).starts_with("(cached context"));
    }
}
