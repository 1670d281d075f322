//! Error types for scigraph-rs.
//!
//! Per-item validation problems are not errors: they are collected as
//! [`crate::validate::Rejection`]s. Everything here is fatal to at least one
//! document (or to the whole process, for configuration errors).

use uuid::Uuid;

/// Alias for Results returning [`ScigraphError`].
pub type Result<T> = std::result::Result<T, ScigraphError>;

/// Top-level error type for scigraph-rs.
#[derive(Debug, thiserror::Error)]
pub enum ScigraphError {
    /// A Store operation failed. `transient` errors (dropped connections,
    /// serialization failures, pool timeouts) are worth retrying.
    #[error("Store error: {message}")]
    Store { message: String, transient: bool },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// The Extractor could not produce a batch within its retry budget.
    #[error("Extraction failed after {attempts} attempt(s): {message}")]
    ExtractionFailure { attempts: usize, message: String },

    /// The uniqueness invariant on (name, type) was found violated, or the
    /// Store rejected an insert that no existing row explains.
    #[error("Identity conflict for {key}: {detail}")]
    IdentityConflict { key: String, detail: String },

    /// The commit transaction failed after its retry budget. Nothing was written.
    #[error("Commit failed after {attempts} attempt(s): {message}")]
    CommitFailure { attempts: usize, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Document source error: {0}")]
    Source(String),

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl ScigraphError {
    /// Shorthand for a permanent store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store { transient, .. } => *transient,
            Self::Llm(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// LLM-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Model refused to respond")]
    Refusal,

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("Authentication failed")]
    Authentication,

    #[error("Response is not valid JSON: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error: {message}")]
    Api { code: Option<String>, message: String },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::EmptyResponse | Self::Transport(_) | Self::MalformedResponse(_)
        )
    }
}
