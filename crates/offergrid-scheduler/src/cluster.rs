//! Boundary with the cluster manager.
//!
//! The scheduler never speaks a cluster manager's wire protocol. It issues
//! calls through [`ClusterManager`] and consumes [`ClusterEvent`]s from a
//! channel fed by whatever drives the connection.

use std::fmt;

use async_trait::async_trait;
use offergrid_placement::{Offer, TaskLaunch};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerResult;

#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Launch `launches` using the resources of `offer_id`.
    async fn accept(&self, offer_id: &str, launches: Vec<TaskLaunch>) -> SchedulerResult<()>;

    async fn decline(&self, offer_ids: &[String]) -> SchedulerResult<()>;

    /// Ask for offers again after declining.
    async fn revive(&self) -> SchedulerResult<()>;

    async fn kill(&self, task_id: &str, agent_id: &str) -> SchedulerResult<()>;

    /// Relay an opaque payload to an executor.
    async fn message(&self, agent_id: &str, executor_id: &str, data: Vec<u8>) -> SchedulerResult<()>;
}

/// Cluster-reported lifecycle state of a launched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
    Dropped,
    Unknown,
}

impl TaskState {
    /// The task will not run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished
                | TaskState::Failed
                | TaskState::Killed
                | TaskState::Lost
                | TaskState::Error
                | TaskState::Dropped
        )
    }

    /// Ended abnormally.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskState::Lost | TaskState::Killed | TaskState::Failed | TaskState::Error
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Killing => "TASK_KILLING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
            TaskState::Error => "TASK_ERROR",
            TaskState::Dropped => "TASK_DROPPED",
            TaskState::Unknown => "TASK_UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusUpdate {
    pub task_id: String,
    pub agent_id: String,
    pub state: TaskState,
    pub message: String,
    /// Sent in answer to a reconciliation request rather than by a change.
    pub reconciliation: bool,
}

impl TaskStatusUpdate {
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            state,
            message: String::new(),
            reconciliation: false,
        }
    }

    pub fn reconciled(mut self) -> Self {
        self.reconciliation = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Offers(Vec<Offer>),
    Update(TaskStatusUpdate),
    Failure {
        agent_id: String,
        executor_id: Option<String>,
    },
    Message {
        agent_id: String,
        executor_id: String,
        data: Vec<u8>,
    },
}
