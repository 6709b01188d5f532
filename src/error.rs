//! Error taxonomy shared by the extraction pipeline.
//!
//! Components return [`HarnessError`] where the caller needs to tell failure
//! kinds apart (the HTTP layer maps them to status codes, the channel runner
//! decides whether a channel is simply omitted). Plumbing code further out
//! uses `anyhow` like the rest of the crate.

use thiserror::Error;

/// Model output that could not be coerced into JSON by any recovery strategy.
///
/// The raw text is kept so the caller can surface it next to the error marker.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("no valid JSON found")]
pub struct ExtractionError {
    pub raw_text: String,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The external chat/vision/OCR call failed or returned an unusable payload.
    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A referenced task, document, cached parse or schema does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn provider(message: impl Into<String>) -> Self {
        HarnessError::Provider(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        HarnessError::NotFound(what.into())
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
