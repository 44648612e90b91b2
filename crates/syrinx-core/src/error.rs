//! Error types shared across the Syrinx crates.

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from the shared foundation: persistence, LLM access, webhooks.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
