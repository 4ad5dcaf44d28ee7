//! Error types shared across the engine
//!
//! Only configuration errors and interrupts ever escape a run. Per-request
//! failures are recorded on the request outcome instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected while validating a run configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown arrival pattern: {0} (expected steady, poisson, bursty or heavy)")]
    UnknownPattern(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("Failed to read extra request fields from {path:?}: {source}")]
    ExtraJsonRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse extra request fields from {path:?}: {source}")]
    ExtraJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Extra request fields in {0:?} must be a JSON object")]
    ExtraJsonNotObject(PathBuf),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

/// Top-level error for a whole load test or fairness run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Run interrupted")]
    Interrupted,

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write request rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to serialize run artifact: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Interrupted => 130,
            EngineError::Config(_) => 2,
            _ => 1,
        }
    }
}
