//! Outgoing control commands and their wire envelope.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use offergrid_core::channel::PropertyMap;
use offergrid_core::{Event, State};
use serde::{Deserialize, Serialize};

use crate::error::ControlResult;

/// Default response deadline for a command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

pub const TRANSITION: &str = "MesosCommand_Transition";
pub const TRIGGER_HOOK: &str = "MesosCommand_TriggerHook";

/// Addresses one deployed task through the executor that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    pub agent_id: String,
    pub executor_id: String,
    pub task_id: String,
}

impl CommandTarget {
    pub fn new(
        agent_id: impl Into<String>,
        executor_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            executor_id: executor_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.agent_id, self.executor_id, self.task_id)
    }
}

/// Correlation key of one point-to-point call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId {
    pub command_id: String,
    pub target: CommandTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Transition {
        source: State,
        event: Event,
        destination: State,
    },
    TriggerHook,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub id: String,
    pub env_id: String,
    pub timeout: Duration,
    /// Arguments common to every target.
    pub arguments: PropertyMap,
    pub targets: Vec<CommandTarget>,
    /// Per-target arguments, layered over `arguments`.
    pub target_args: HashMap<CommandTarget, PropertyMap>,
    pub kind: CommandKind,
}

impl Command {
    fn new(name: &str, targets: Vec<CommandTarget>, kind: CommandKind) -> Self {
        Self {
            name: name.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            env_id: String::new(),
            timeout: DEFAULT_TIMEOUT,
            arguments: PropertyMap::new(),
            targets,
            target_args: HashMap::new(),
            kind,
        }
    }

    pub fn transition(
        targets: Vec<CommandTarget>,
        source: State,
        event: Event,
        destination: State,
        target_args: HashMap<CommandTarget, PropertyMap>,
    ) -> Self {
        let mut cmd = Self::new(
            TRANSITION,
            targets,
            CommandKind::Transition {
                source,
                event,
                destination,
            },
        );
        cmd.target_args = target_args;
        cmd
    }

    pub fn trigger_hook(targets: Vec<CommandTarget>) -> Self {
        Self::new(TRIGGER_HOOK, targets, CommandKind::TriggerHook)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env_id(mut self, env_id: impl Into<String>) -> Self {
        self.env_id = env_id.into();
        self
    }

    pub fn is_multi_target(&self) -> bool {
        self.targets.len() > 1
    }

    /// The same command narrowed to one target, keeping id and timeout.
    pub fn single_target(&self, target: &CommandTarget) -> Command {
        let mut arguments = self.arguments.clone();
        if let Some(extra) = self.target_args.get(target) {
            arguments.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Command {
            name: self.name.clone(),
            id: self.id.clone(),
            env_id: self.env_id.clone(),
            timeout: self.timeout,
            arguments,
            targets: vec![target.clone()],
            target_args: HashMap::new(),
            kind: self.kind.clone(),
        }
    }

    /// JSON message for `target`, as understood by the executor.
    pub fn encode(&self, target: &CommandTarget) -> ControlResult<Vec<u8>> {
        let narrowed = self.single_target(target);
        let (event, source, destination) = match &self.kind {
            CommandKind::Transition {
                source,
                event,
                destination,
            } => (Some(*event), Some(*source), Some(*destination)),
            CommandKind::TriggerHook => (None, None, None),
        };
        let envelope = CommandEnvelope {
            message_type: "MesosCommand".to_string(),
            name: narrowed.name,
            id: narrowed.id,
            env_id: narrowed.env_id,
            timeout_ms: narrowed.timeout.as_millis() as u64,
            arguments: narrowed.arguments,
            target_list: narrowed.targets,
            event,
            source,
            destination,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Wire form of a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(rename = "_messageType")]
    pub message_type: String,
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub env_id: String,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub arguments: PropertyMap,
    pub target_list: Vec<CommandTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
    #[serde(default, rename = "src", skip_serializing_if = "Option::is_none")]
    pub source: Option<State>,
    #[serde(default, rename = "dst", skip_serializing_if = "Option::is_none")]
    pub destination: Option<State>,
}

impl CommandEnvelope {
    pub fn decode(bytes: &[u8]) -> ControlResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(n: u32) -> CommandTarget {
        CommandTarget::new(format!("agent-{n}"), "exec", format!("task-{n}"))
    }

    #[test]
    fn single_target_layers_arguments() {
        let mut args = HashMap::new();
        let mut t1 = PropertyMap::new();
        t1.insert("chans.a.numSockets".into(), "1".into());
        args.insert(target(1), t1);
        let mut cmd = Command::transition(
            vec![target(1), target(2)],
            State::Standby,
            Event::Configure,
            State::Configured,
            args,
        );
        cmd.arguments.insert("run".into(), "7".into());
        assert!(cmd.is_multi_target());

        let one = cmd.single_target(&target(1));
        assert_eq!(one.id, cmd.id);
        assert!(!one.is_multi_target());
        assert_eq!(one.arguments.len(), 2);
        assert_eq!(cmd.single_target(&target(2)).arguments.len(), 1);
    }

    #[test]
    fn envelope_fields() {
        let cmd = Command::transition(
            vec![target(1)],
            State::Configured,
            Event::Start,
            State::Running,
            HashMap::new(),
        )
        .with_env_id("env-1")
        .with_timeout(Duration::from_secs(5));
        let bytes = cmd.encode(&target(1)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["_messageType"], "MesosCommand");
        assert_eq!(value["name"], TRANSITION);
        assert_eq!(value["envId"], "env-1");
        assert_eq!(value["timeout"], 5000);
        assert_eq!(value["event"], "START");
        assert_eq!(value["src"], "CONFIGURED");
        assert_eq!(value["targetList"][0]["taskId"], "task-1");

        let back = CommandEnvelope::decode(&bytes).unwrap();
        assert_eq!(back.id, cmd.id);
        assert_eq!(back.destination, Some(State::Running));
    }

    #[test]
    fn trigger_hook_has_no_transition_fields() {
        let cmd = Command::trigger_hook(vec![target(1)]);
        let value: serde_json::Value = serde_json::from_slice(&cmd.encode(&target(1)).unwrap()).unwrap();
        assert_eq!(value["name"], TRIGGER_HOOK);
        assert!(value.get("event").is_none());
    }
}
