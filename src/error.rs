//! Error types for the investment advisor orchestrator

use thiserror::Error;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {

    // =============================
    // Caller-facing input errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid investment amount: {0}")]
    InvalidAmount(String),

    #[error("Financial profile incomplete: {0}")]
    ProfileIncomplete(String),

    #[error("Document extraction failed: {0}")]
    ExtractionFailed(String),

    // =============================
    // Pipeline errors
    // =============================

    #[error("Partial data: {0}")]
    PartialData(String),

    #[error("Collaborator timed out: {0}")]
    CollaboratorTimeout(String),

    #[error("No viable allocation: {0}")]
    NoViableAllocation(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("News search error: {0}")]
    NewsSearch(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AdvisorError {
    /// Errors the user can fix by changing what they typed or uploaded.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            AdvisorError::InvalidInput(_)
                | AdvisorError::InvalidAmount(_)
                | AdvisorError::ProfileIncomplete(_)
                | AdvisorError::ExtractionFailed(_)
                | AdvisorError::NoViableAllocation(_)
        )
    }
}
