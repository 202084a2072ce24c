//! Run-level streaming events.
//!
//! `StreamEvent` is what a [`ChannelStream`](crate::stream::ChannelStream)
//! forwards to its receiver, and what the gateway turns into SSE events:
//! - `started`: the run opened and picked a strategy
//! - `stage`: the run entered a new state
//! - `sub_queries`: decomposition produced these sub-queries
//! - `chunk`: partial answer text
//! - `done`: the final result
//! - `error`: the run failed

use crate::result::SynthesisResult;
use crate::strategy::{RunState, Strategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started { query_id: String, strategy: Strategy },

    Stage { state: RunState },

    SubQueries { sub_queries: Vec<String> },

    /// Partial answer text.
    Chunk { content: String },

    Done { result: Box<SynthesisResult> },

    Error { code: String, message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Stage { .. } => "stage",
            Self::SubQueries { .. } => "sub_queries",
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
