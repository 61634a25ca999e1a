//! Control-layer error types.

use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("the queue for MESSAGE commands is full")]
    QueueFull,

    #[error("{name} timed out for task {task_id}")]
    Timeout { name: String, task_id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("command {0} has no targets")]
    NoTargets(String),

    #[error("no response received for command {0}")]
    NoResponse(String),

    #[error("command queue is shut down")]
    Shutdown,

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    Decode(String),
}
