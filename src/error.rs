//! Custom error types for the backfill engine

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Missing credential: {0}")]
    Credential(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Product {product} is not available for {year}")]
    ProductUnavailable { product: String, year: i32 },

    #[error("Source {0} is not ready for backfill (registry lint errors)")]
    SourceNotReady(String),

    #[error("No adapter registered for source: {0}")]
    NoAdapter(String),

    #[error("Checkpoint {0} is already held by another runner")]
    CheckpointBusy(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Contradiction not found: {0}")]
    ContradictionNotFound(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Registry lint failed with {0} error(s)")]
    Lint(usize),

    #[error("Not initialized: run 'backfill init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that mean the storage layer is unusable; a run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::NotInitialized)
    }

    /// Errors worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder(),
            Error::Fetch(_) => true,
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Fetch("HTTP 503: x".into()).is_retryable());
        assert!(!Error::Credential("UNHCR_API_KEY".into()).is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_fatal());
        assert!(!Error::Fetch("x".into()).is_fatal());
    }
}
