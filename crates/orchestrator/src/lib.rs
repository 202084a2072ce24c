//! # ragloom-orchestrator
//!
//! Turns a [`Query`](ragloom_core::query::Query) into a cited, streamed answer.
//!
//! [`QueryOrchestrator`] selects a [`Strategy`], optionally decomposes the
//! query, fans the sub-queries out to a retrieval backend, assembles a
//! bounded context and streams one synthesis call into a [`ResultStream`].

pub mod citations;
pub mod context;
pub mod decompose;
pub mod orchestrator;
pub mod prompts;
pub mod result;
pub mod strategy;
pub mod stream;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use citations::{CitationCheck, check_citations};
pub use context::{AssembledContext, ContextAssembler, ContextBudget, ContextItem};
pub use orchestrator::{OrchestratorSettings, QueryOrchestrator, STREAM_CAPACITY};
pub use result::{Degradation, DegradationKind, RunMetadata, SynthesisResult};
pub use strategy::{RunState, RunTrace, Strategy};
pub use stream::{BufferedStream, ChannelStream, ResultStream, SinkClosed};
pub use stream_event::StreamEvent;
