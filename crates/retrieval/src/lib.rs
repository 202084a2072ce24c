//! # ragloom Retrieval
//!
//! Concrete [`RetrievalBackend`](ragloom_core::RetrievalBackend) implementations
//! and the machinery the orchestrator uses to call them.
//!
//! - [`SearxngBackend`]: web meta-search through SearXNG's JSON API
//! - [`QdrantBackend`]: vector similarity over a Qdrant collection
//! - [`DeepScrapeBackend`]: replaces web snippets with full page text
//! - [`InMemoryBackend`]: keyword search over a fixed corpus
//! - [`RetrievalRouter`]: picks a backend per target
//! - [`FanOut`]: bounded concurrent sub-query dispatch with per-call timeouts

pub mod fanout;
pub mod in_memory;
pub mod qdrant;
pub mod router;
pub mod scrape;
pub mod searxng;

pub use fanout::{FanOut, FanOutReport, SubQueryOutcome, SubQueryReport};
pub use in_memory::InMemoryBackend;
pub use qdrant::QdrantBackend;
pub use router::{RetrievalRouter, build_from_config};
pub use scrape::{DeepScrapeBackend, PageScraper, ScrapedPage};
pub use searxng::SearxngBackend;
