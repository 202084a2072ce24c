//! Result sinks.
//!
//! A run writes to a [`ResultStream`] in a fixed order:
//! `open` → (`stage` | `sub_queries` | `emit`)* → `close`, or `fail` instead of
//! `close` on a fatal error. Any call may report [`SinkClosed`]; the run then
//! stops without touching the sink again.

use async_trait::async_trait;
use ragloom_core::error::RunError;
use ragloom_core::query::Query;
use tokio::sync::mpsc;

use crate::result::SynthesisResult;
use crate::strategy::{RunState, Strategy};
use crate::stream_event::StreamEvent;

/// The consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Result consumer disconnected")]
pub struct SinkClosed;

#[async_trait]
pub trait ResultStream: Send {
    async fn open(&mut self, query: &Query, strategy: Strategy) -> Result<(), SinkClosed>;

    /// The run entered `state`.
    async fn stage(&mut self, _state: RunState) -> Result<(), SinkClosed> {
        Ok(())
    }

    /// Decomposition produced these sub-queries.
    async fn sub_queries(&mut self, _sub_queries: &[String]) -> Result<(), SinkClosed> {
        Ok(())
    }

    /// Append a fragment of answer text.
    async fn emit(&mut self, chunk: &str) -> Result<(), SinkClosed>;

    async fn close(&mut self, result: &SynthesisResult) -> Result<(), SinkClosed>;

    async fn fail(&mut self, error: &RunError);

    /// Whether the consumer has gone away. Checked between stages.
    fn is_closed(&self) -> bool;
}

// ── Buffered ──────────────────────────────────────────────────────────────

/// Collects everything in memory. Used for JSON responses and tests.
#[derive(Debug, Default)]
pub struct BufferedStream {
    opened: bool,
    text: String,
    chunks: usize,
    stages: Vec<RunState>,
    sub_queries: Vec<String>,
    result: Option<SynthesisResult>,
    error: Option<RunError>,
}

impl BufferedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Concatenation of every emitted chunk.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn stages(&self) -> &[RunState] {
        &self.stages
    }

    pub fn sub_queries(&self) -> &[String] {
        &self.sub_queries
    }

    pub fn result(&self) -> Option<&SynthesisResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }
}

#[async_trait]
impl ResultStream for BufferedStream {
    async fn open(&mut self, _query: &Query, _strategy: Strategy) -> Result<(), SinkClosed> {
        self.opened = true;
        Ok(())
    }

    async fn stage(&mut self, state: RunState) -> Result<(), SinkClosed> {
        self.stages.push(state);
        Ok(())
    }

    async fn sub_queries(&mut self, sub_queries: &[String]) -> Result<(), SinkClosed> {
        self.sub_queries = sub_queries.to_vec();
        Ok(())
    }

    async fn emit(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.text.push_str(chunk);
        self.chunks += 1;
        Ok(())
    }

    async fn close(&mut self, result: &SynthesisResult) -> Result<(), SinkClosed> {
        self.result = Some(result.clone());
        Ok(())
    }

    async fn fail(&mut self, error: &RunError) {
        self.error = Some(error.clone());
    }

    fn is_closed(&self) -> bool {
        false
    }
}

// ── Channel ───────────────────────────────────────────────────────────────

/// Forwards [`StreamEvent`]s over a bounded channel. Closed once the receiver
/// is dropped.
pub struct ChannelStream {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelStream {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn send(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl ResultStream for ChannelStream {
    async fn open(&mut self, query: &Query, strategy: Strategy) -> Result<(), SinkClosed> {
        self.send(StreamEvent::Started {
            query_id: query.id().to_string(),
            strategy,
        })
        .await
    }

    async fn stage(&mut self, state: RunState) -> Result<(), SinkClosed> {
        self.send(StreamEvent::Stage { state }).await
    }

    async fn sub_queries(&mut self, sub_queries: &[String]) -> Result<(), SinkClosed> {
        self.send(StreamEvent::SubQueries {
            sub_queries: sub_queries.to_vec(),
        })
        .await
    }

    async fn emit(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.send(StreamEvent::Chunk {
            content: chunk.to_string(),
        })
        .await
    }

    async fn close(&mut self, result: &SynthesisResult) -> Result<(), SinkClosed> {
        self.send(StreamEvent::Done {
            result: Box::new(result.clone()),
        })
        .await
    }

    async fn fail(&mut self, error: &RunError) {
        let _ = self
            .send(StreamEvent::Error {
                code: error.code().to_string(),
                message: error.user_message(),
            })
            .await;
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_core::query::QueryOptions;
    use ragloom_core::retrieval::Target;

    #[tokio::test]
    async fn channel_stream_forwards_events_in_order() {
        let (mut sink, mut rx) = ChannelStream::channel(8);
        let query = Query::new("q", Target::Web, QueryOptions::default()).unwrap();

        sink.open(&query, Strategy::SimpleWeb).await.unwrap();
        sink.stage(RunState::Retrieving).await.unwrap();
        sink.emit("Hel").await.unwrap();
        sink.emit("lo").await.unwrap();
        sink.fail(&RunError::SynthesisFailure("x".into())).await;
        drop(sink);

        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.event_type());
        }
        assert_eq!(types, vec!["started", "stage", "chunk", "chunk", "error"]);
    }

    #[tokio::test]
    async fn dropped_receiver_closes_the_sink() {
        let (mut sink, rx) = ChannelStream::channel(8);
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.emit("late").await, Err(SinkClosed));
    }

    #[tokio::test]
    async fn buffered_stream_accumulates() {
        let mut sink = BufferedStream::new();
        let query = Query::new("q", Target::Web, QueryOptions::default()).unwrap();
        sink.open(&query, Strategy::SimpleWeb).await.unwrap();
        sink.emit("a").await.unwrap();
        sink.emit("b").await.unwrap();

        assert!(sink.is_open());
        assert_eq!(sink.text(), "ab");
        assert_eq!(sink.chunk_count(), 2);
        assert!(sink.result().is_none());
    }
}
