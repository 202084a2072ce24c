//! # ragloom core
//!
//! Domain types, traits, and error definitions for the ragloom query
//! orchestration engine. This crate has **no framework dependencies**: it
//! defines the domain model that every other crate implements against.
//!
//! The two collaborator seams live here:
//! - [`Provider`]: a generation backend (complete, stream, embed)
//! - [`RetrievalBackend`]: a search backend returning ranked [`EvidenceItem`]s

pub mod error;
pub mod message;
pub mod provider;
pub mod query;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, RetrievalError, RunError};
pub use message::{ConversationContext, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use query::{Query, QueryId, QueryOptions, SubQuery};
pub use retrieval::{EvidenceItem, EvidenceKey, Locator, RetrievalBackend, SourceKind, Target};
