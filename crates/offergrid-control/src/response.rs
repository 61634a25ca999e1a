//! Replies to control commands.

use std::collections::BTreeMap;

use offergrid_core::State;
use serde::{Deserialize, Serialize};

use crate::command::CommandTarget;
use crate::error::{ControlError, ControlResult};

/// A reply from one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(rename = "_messageType", default = "response_message_type")]
    pub message_type: String,
    pub name: String,
    #[serde(rename = "id")]
    pub command_id: String,
    pub task_id: String,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
    /// State the task reports after handling the command, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

fn response_message_type() -> String {
    "MesosCommandResponse".to_string()
}

impl CommandResponse {
    pub fn ok(name: impl Into<String>, command_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            message_type: response_message_type(),
            name: name.into(),
            command_id: command_id.into(),
            task_id: task_id.into(),
            error: String::new(),
            state: None,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        command_id: impl Into<String>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut resp = Self::ok(name, command_id, task_id);
        resp.error = error.into();
        resp
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.trim().is_empty()
    }

    pub fn err(&self) -> Option<&str> {
        (!self.is_ok()).then_some(self.error.as_str())
    }

    pub fn encode(&self) -> ControlResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> ControlResult<Self> {
        let resp: CommandResponse = serde_json::from_slice(bytes)?;
        if resp.message_type != "MesosCommandResponse" {
            return Err(ControlError::Decode(format!(
                "unexpected message type {}",
                resp.message_type
            )));
        }
        Ok(resp)
    }
}

/// Replies of a fanned-out command, one per target.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiResponse {
    pub name: String,
    pub command_id: String,
    pub responses: BTreeMap<CommandTarget, CommandResponse>,
}

impl MultiResponse {
    /// Failed targets with their individual errors.
    pub fn errors(&self) -> BTreeMap<CommandTarget, String> {
        self.responses
            .iter()
            .filter_map(|(t, r)| r.err().map(|e| (t.clone(), e.to_string())))
            .collect()
    }

    /// All failures joined as `[task id] error`, or `None` when every target
    /// succeeded.
    pub fn err(&self) -> Option<String> {
        let errors = self.errors();
        if errors.is_empty() {
            return None;
        }
        Some(
            errors
                .iter()
                .map(|(t, e)| format!("[{}] {}", t.task_id, e))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// The single aggregated result of a committed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Single(CommandTarget, CommandResponse),
    Multi(MultiResponse),
}

impl Response {
    pub fn command_id(&self) -> &str {
        match self {
            Response::Single(_, r) => &r.command_id,
            Response::Multi(m) => &m.command_id,
        }
    }

    pub fn errors(&self) -> BTreeMap<CommandTarget, String> {
        match self {
            Response::Single(t, r) => r
                .err()
                .map(|e| BTreeMap::from([(t.clone(), e.to_string())]))
                .unwrap_or_default(),
            Response::Multi(m) => m.errors(),
        }
    }

    pub fn err(&self) -> Option<String> {
        match self {
            Response::Single(_, r) => r.err().map(str::to_string),
            Response::Multi(m) => m.err(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err().is_none()
    }

    /// Per-target replies, regardless of shape.
    pub fn responses(&self) -> Vec<(&CommandTarget, &CommandResponse)> {
        match self {
            Response::Single(t, r) => vec![(t, r)],
            Response::Multi(m) => m.responses.iter().collect(),
        }
    }
}
