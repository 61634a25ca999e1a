//! Executor messaging over the cluster manager.

use std::sync::Arc;

use async_trait::async_trait;
use offergrid_control::{Command, CommandResponse, CommandTarget, ControlError, ControlResult, Transport};
use offergrid_core::State;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cluster::ClusterManager;

/// Sends commands as JSON payloads through [`ClusterManager::message`].
pub struct CommandTransport {
    cluster: Arc<dyn ClusterManager>,
}

impl CommandTransport {
    pub fn new(cluster: Arc<dyn ClusterManager>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Transport for CommandTransport {
    async fn send(&self, command: &Command, target: &CommandTarget) -> ControlResult<()> {
        let payload = command.encode(target)?;
        trace!(command = %command.name, task_id = %target.task_id, bytes = payload.len(), "sending command");
        self.cluster
            .message(&target.agent_id, &target.executor_id, payload)
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))
    }
}

pub const TASK_STATE_CHANGED: &str = "TaskStateChanged";

/// Unsolicited notification that a task moved to a new control state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateChanged {
    #[serde(rename = "_messageType")]
    pub message_type: String,
    pub task_id: String,
    pub state: State,
}

impl TaskStateChanged {
    pub fn new(task_id: impl Into<String>, state: State) -> Self {
        Self {
            message_type: TASK_STATE_CHANGED.to_string(),
            task_id: task_id.into(),
            state,
        }
    }

    pub fn encode(&self) -> ControlResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A message relayed from an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorMessage {
    Response(CommandResponse),
    StateChanged(TaskStateChanged),
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "_messageType", default)]
    message_type: String,
}

impl ExecutorMessage {
    pub fn decode(data: &[u8]) -> ControlResult<Self> {
        let header: Header = serde_json::from_slice(data)?;
        match header.message_type.as_str() {
            "MesosCommandResponse" => Ok(Self::Response(CommandResponse::decode(data)?)),
            TASK_STATE_CHANGED => Ok(Self::StateChanged(serde_json::from_slice(data)?)),
            other => Err(ControlError::Decode(format!("unknown executor message type {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_dispatches_on_message_type() {
        let resp = CommandResponse::ok("transition", "c1", "t1").with_state(State::Configured);
        let msg = ExecutorMessage::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(msg, ExecutorMessage::Response(resp));

        let changed = TaskStateChanged::new("t1", State::Running);
        let msg = ExecutorMessage::decode(&changed.encode().unwrap()).unwrap();
        assert_eq!(msg, ExecutorMessage::StateChanged(changed));

        let err = ExecutorMessage::decode(br#"{"_messageType":"DeviceEvent"}"#).unwrap_err();
        assert!(matches!(err, ControlError::Decode(_)));
    }
}
