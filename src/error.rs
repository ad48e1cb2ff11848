use crate::guard::RejectionKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenieError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Rejected(#[from] RejectionKind),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database query failed: {0}")]
    Database(String),

    #[error("Database query timed out after {0} seconds")]
    QueryTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tiberius::error::Error> for GenieError {
    fn from(err: tiberius::error::Error) -> Self {
        GenieError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for GenieError {
    fn from(err: reqwest::Error) -> Self {
        GenieError::Llm(err.to_string())
    }
}

impl GenieError {
    /// HTTP status the chat API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            GenieError::InvalidRequest(_) | GenieError::Rejected(_) => 400,
            GenieError::Llm(_) => 502,
            GenieError::QueryTimeout(_) => 504,
            GenieError::Config(_)
            | GenieError::Database(_)
            | GenieError::Io(_)
            | GenieError::Json(_) => 500,
        }
    }

    /// Stable name for the `kind` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GenieError::Config(_) => "config",
            GenieError::InvalidRequest(_) => "invalid_request",
            GenieError::Rejected(reason) => reason.code(),
            GenieError::Llm(_) => "llm",
            GenieError::Database(_) => "database",
            GenieError::QueryTimeout(_) => "query_timeout",
            GenieError::Io(_) => "io",
            GenieError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, GenieError>;
