//! Retrieval domain types and the `RetrievalBackend` trait.
//!
//! A retrieval backend turns a query string into a ranked list of
//! [`EvidenceItem`]s. Two families exist: vector similarity over a document
//! collection, and web meta-search. Both are consumed through the same trait
//! so the orchestrator can fan out to either without knowing which it is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Where a query is answered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The open web, via meta-search.
    Web,
    /// A named document collection, via vector similarity.
    Collection(String),
}

impl Target {
    pub fn collection(id: impl Into<String>) -> Self {
        Self::Collection(id.into())
    }

    pub fn is_web(&self) -> bool {
        matches!(self, Target::Web)
    }

    /// The source kind evidence from this target carries.
    pub fn source_kind(&self) -> SourceKind {
        match self {
            Target::Web => SourceKind::Web,
            Target::Collection(_) => SourceKind::Document,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Web => write!(f, "web"),
            Target::Collection(id) => write!(f, "collection:{id}"),
        }
    }
}

/// Kind of source an evidence item came from. Used as a rendering hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Document,
    Web,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Document => write!(f, "document"),
            SourceKind::Web => write!(f, "web"),
        }
    }
}

/// Position of an item within its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Page(u32),
    Url(String),
    None,
}

/// One retrieved unit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Backend identifier: a chunk/point id for documents, the URL for web results.
    pub id: String,

    pub kind: SourceKind,

    pub title: String,

    pub locator: Locator,

    /// Raw content snippet.
    pub content: String,

    /// Relevance in [0, 1].
    pub score: f32,

    /// Index of the sub-query that retrieved this item, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<usize>,

    /// File path of the source document, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl EvidenceItem {
    /// A document chunk from a collection.
    pub fn document(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Document,
            title: title.into(),
            locator: Locator::None,
            content: content.into(),
            score: clamp_score(score),
            origin: None,
            source_path: None,
        }
    }

    /// A web search result. The URL doubles as identifier and locator.
    pub fn web(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        score: f32,
    ) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            kind: SourceKind::Web,
            title: title.into(),
            locator: Locator::Url(url),
            content: content.into(),
            score: clamp_score(score),
            origin: None,
            source_path: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.locator = Locator::Page(page);
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_origin(mut self, origin: usize) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Identity used for deduplication across sub-queries.
    ///
    /// Documents are keyed by identifier plus locator; web results by
    /// normalized URL, so `https://a.io/x/` and `https://a.io/x#top` collapse.
    pub fn key(&self) -> EvidenceKey {
        match (&self.kind, &self.locator) {
            (SourceKind::Web, Locator::Url(url)) => EvidenceKey(format!("url:{}", normalize_url(url))),
            (SourceKind::Web, _) => EvidenceKey(format!("url:{}", normalize_url(&self.id))),
            (SourceKind::Document, Locator::Page(page)) => {
                EvidenceKey(format!("doc:{}#p{page}", self.id))
            }
            (SourceKind::Document, _) => EvidenceKey(format!("doc:{}", self.id)),
        }
    }
}

/// Deduplication key for an [`EvidenceItem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvidenceKey(String);

impl EvidenceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn clamp_score(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let url = url.trim_end_matches('/');
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            let host = host.to_ascii_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            if path.is_empty() {
                format!("{}://{host}", scheme.to_ascii_lowercase())
            } else {
                format!("{}://{host}/{path}", scheme.to_ascii_lowercase())
            }
        }
        None => url.to_string(),
    }
}

/// The retrieval backend contract.
///
/// Implementations MUST return items sorted by descending score and MUST be
/// safe to call concurrently for distinct queries.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Backend name for logs and error messages.
    fn name(&self) -> &str;

    /// Search `target` for `query`, returning at most `top_k` items.
    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> std::result::Result<Vec<EvidenceItem>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_clamped_into_unit_range() {
        assert_eq!(EvidenceItem::web("https://a.io", "A", "x", 4.2).score, 1.0);
        assert_eq!(EvidenceItem::document("d", "D", "x", -0.3).score, 0.0);
        assert_eq!(EvidenceItem::document("d", "D", "x", f32::NAN).score, 0.0);
    }

    #[test]
    fn web_keys_ignore_fragment_trailing_slash_and_www() {
        let a = EvidenceItem::web("https://www.Example.com/docs/", "A", "x", 0.5);
        let b = EvidenceItem::web("https://example.com/docs#intro", "B", "y", 0.9);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn document_keys_include_page() {
        let p1 = EvidenceItem::document("doc-1", "Manual", "x", 0.5).with_page(1);
        let p2 = EvidenceItem::document("doc-1", "Manual", "x", 0.5).with_page(2);
        assert_ne!(p1.key(), p2.key());
        assert_eq!(p1.key().as_str(), "doc:doc-1#p1");
    }

    #[test]
    fn target_serializes_compactly() {
        assert_eq!(serde_json::to_value(Target::Web).unwrap(), "web");
        assert_eq!(
            serde_json::to_value(Target::collection("manuals")).unwrap(),
            serde_json::json!({"collection": "manuals"})
        );
        assert_eq!(Target::collection("manuals").to_string(), "collection:manuals");
    }
}
