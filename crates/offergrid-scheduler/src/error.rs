//! Scheduler error types.

use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task manager queue full")]
    QueueFull,

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Roster(#[from] offergrid_roster::RosterError),

    #[error(transparent)]
    Control(#[from] offergrid_control::ControlError),

    #[error(transparent)]
    Placement(#[from] offergrid_placement::PlacementError),

    #[error(transparent)]
    Core(#[from] offergrid_core::CoreError),

    #[error("cluster manager error: {0}")]
    Cluster(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("scheduler is shutting down")]
    Shutdown,

    /// A critical task failed a control command.
    #[error("critical task failure: {0}")]
    Critical(String),

    #[error("{kind} hook failed: {message}")]
    Hook { kind: String, message: String },
}

/// Roles a deployment could not satisfy, split by criticality and by
/// whether another attempt could still succeed.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error(
    "environment {env_id} deployment incomplete: critical undeployed {critical_undeployed:?}, \
     critical undeployable {critical_undeployable:?}, non-critical undeployed {noncritical_undeployed:?}, \
     non-critical undeployable {noncritical_undeployable:?}"
)]
pub struct DeploymentError {
    pub env_id: String,
    pub critical_undeployed: Vec<String>,
    pub noncritical_undeployed: Vec<String>,
    pub critical_undeployable: Vec<String>,
    pub noncritical_undeployable: Vec<String>,
}

impl DeploymentError {
    pub fn has_critical(&self) -> bool {
        !self.critical_undeployed.is_empty() || !self.critical_undeployable.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_critical()
            && self.noncritical_undeployed.is_empty()
            && self.noncritical_undeployable.is_empty()
    }
}
