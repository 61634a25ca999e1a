//! Roster error types.

use thiserror::Error;

pub type RosterResult<T> = Result<T, RosterError>;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task already released: {0}")]
    TaskAlreadyReleased(String),

    #[error("task {task_id} is locked by environment {env_id}")]
    TaskLocked { task_id: String, env_id: String },

    #[error("task not locked: {0}")]
    TaskNotLocked(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("task class not found: {0}")]
    ClassNotFound(String),

    #[error(transparent)]
    Core(#[from] offergrid_core::CoreError),
}
