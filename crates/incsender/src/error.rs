//! Error taxonomy for the incident sender.

use std::path::PathBuf;

use notify::TransportError;
use reqwest::StatusCode;
use thiserror::Error;

/// Result type for incident sender operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can end a collection cycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Token exchange or refresh was rejected
    #[error("Token request failed: {0}")]
    Auth(#[source] TransportError),

    /// Token endpoint answered with something that is not a usable token
    #[error("Invalid token response: {0}")]
    InvalidToken(String),

    /// Incident API call failed after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response did not have the expected shape
    #[error("Invalid data: {0}")]
    Data(String),

    /// Enrichment of a single incident failed; the cycle is aborted
    #[error("Failed to enrich incident {key}: {source}")]
    Enrichment {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Startup configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Savepoint file could not be written
    #[error("Savepoint I/O failed for {}: {source}", path.display())]
    Savepoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the upstream API rejected the bearer token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(StatusCode::UNAUTHORIZED),
            Self::Enrichment { source, .. } => source.is_unauthorized(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Data(e.to_string())
    }
}

/// Render an error with its full source chain on one line.
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}
