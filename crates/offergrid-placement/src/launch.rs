//! Launch payloads.

use std::collections::BTreeMap;

use offergrid_core::{BindMap, ControlMode, Ranges};
use serde::{Deserialize, Serialize};

use crate::wants::Limits;

pub const CONTROL_PORT_ENV: &str = "OCC_CONTROL_PORT";
pub const CONTROL_PORT_ARG: &str = "--control-port";

pub const LABEL_ENVIRONMENT_ID: &str = "environment_id";
pub const LABEL_DETECTOR: &str = "detector";

/// Resources requested for one task: its wants, plus every port it was
/// given, squashed into one range set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchResources {
    pub cpus: f64,
    pub mem: f64,
    pub ports: Ranges,
}

/// What the executor runs. Serialized into [`TaskLaunch::data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCommand {
    pub value: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub shell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub control_mode: ControlMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_port: Option<u64>,
    #[serde(default)]
    pub bind_map: BindMap,
}

/// One task to launch through an ACCEPT call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLaunch {
    pub task_id: String,
    pub name: String,
    pub agent_id: String,
    pub executor_id: String,
    pub resources: LaunchResources,
    pub limits: Limits,
    pub labels: BTreeMap<String, String>,
    /// JSON-encoded [`LaunchCommand`].
    pub data: Vec<u8>,
}

impl TaskLaunch {
    pub fn command(&self) -> serde_json::Result<LaunchCommand> {
        serde_json::from_slice(&self.data)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
