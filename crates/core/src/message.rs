//! Message and conversation-context value types.
//!
//! Messages are what flows to a generation backend. A [`ConversationContext`]
//! is the caller-supplied history of a chat; the orchestrator only ever reads
//! it when building the synthesis prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (provider info, source ids, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }
}

/// Prior chat turns supplied by an external history store.
///
/// Treated as opaque input: the orchestrator never mutates it and only uses
/// the most recent non-system turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext {
    turns: Vec<Message>,
}

impl ConversationContext {
    pub fn new(turns: Vec<Message>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    /// The last `n` user/assistant turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&Message> {
        let mut recent: Vec<&Message> = self
            .turns
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(n)
            .collect();
        recent.reverse();
        recent
    }
}

impl From<Vec<Message>> for ConversationContext {
    fn from(turns: Vec<Message>) -> Self {
        Self::new(turns)
    }
}
