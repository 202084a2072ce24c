//! Error types for the ragloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ragloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Orchestration run errors ---
    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised by a single retrieval backend call.
///
/// Inside an orchestration run these are always recoverable: they are
/// recorded against the sub-query that produced them and the run continues.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Target not supported by '{backend}': {target}")]
    UnsupportedTarget { backend: String, target: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("Retrieval timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),
}

/// Fatal outcomes of an orchestration run.
///
/// Each variant maps to a stable machine-readable [`code`](RunError::code) so
/// a delivery layer can tell "insufficient context" apart from a
/// "generation error".
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Insufficient context: all {attempted} retrieval call(s) failed")]
    AllRetrievalFailed { attempted: usize },

    #[error("Answer generation failed: {0}")]
    SynthesisFailure(String),

    #[error("Context budget exceeded: rendered {rendered} chars, budget {budget}")]
    BudgetExceeded { rendered: usize, budget: usize },

    #[error("Run cancelled: result consumer disconnected")]
    Cancelled,
}

impl RunError {
    /// Stable code for delivery layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::AllRetrievalFailed { .. } => "insufficient_context",
            Self::SynthesisFailure(_) => "generation_error",
            Self::BudgetExceeded { .. } => "internal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Message safe to show to an end user. Internal invariant violations are
    /// not described in detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::BudgetExceeded { .. } => "Internal error while preparing context".into(),
            other => other.to_string(),
        }
    }
}
