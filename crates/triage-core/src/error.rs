use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("collector '{collector}' timed out after {}ms", .after.as_millis())]
    CollectorTimeout {
        collector: String,
        after: Duration,
    },

    #[error("collector '{collector}' unavailable: {reason}")]
    CollectorUnavailable { collector: String, reason: String },

    #[error("graph store unavailable: {0}")]
    GraphStoreUnavailable(String),

    #[error("reference graph not found: {0}")]
    GraphNotFound(String),

    #[error("invalid reference graph '{name}': {reason}")]
    InvalidGraph { name: String, reason: String },

    #[error("analysis oracle timed out after {}ms", .0.as_millis())]
    OracleTimeout(Duration),

    #[error("analysis oracle failed: {0}")]
    OracleFailed(String),

    #[error("invalid incident transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The only fatal class: the orchestrator's own state is inconsistent.
    #[error("orchestrator internal error: {0}")]
    Internal(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    /// Whether this error must abort the incident instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::Internal(_) | TriageError::InvalidTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
