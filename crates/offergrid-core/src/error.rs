//! Error types for offergrid core types.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while parsing or validating core domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("invalid state transition: {event} from {source_state}")]
    InvalidTransition { event: String, source_state: String },

    #[error("unresolved channel target: {0}")]
    UnresolvedChannel(String),

    #[error("invalid task class: {0}")]
    InvalidClass(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
