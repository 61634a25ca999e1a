//! Task classes: the immutable templates tasks are instantiated from.
//!
//! Classes are written as YAML documents:
//!
//! ```yaml
//! name: readout
//! control:
//!   mode: fairmq
//! command:
//!   value: readout.exe
//!   arguments: ["--id", "1"]
//! wants:
//!   cpu: 0.5
//!   memory: 512
//!   ports: "47100-47105"
//! limits:
//!   cpu: 2
//! bind:
//!   - name: data
//!     type: push
//! constraints:
//!   - attribute: machine_id
//!     value: flp01
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::channel::{Inbound, Outbound};
use crate::constraint::{Constraint, Constraints};
use crate::error::{CoreError, CoreResult};
use crate::ports::Ranges;

/// Identity of a class: where it came from, its name, and a content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId {
    pub repo: String,
    pub name: String,
    pub hash: String,
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tasks/{}@{}", self.repo, self.name, self.hash)
    }
}

/// Control protocol a task speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    #[default]
    Basic,
    Direct,
    Fairmq,
    Hook,
}

impl ControlMode {
    /// Whether the task runs a control endpoint the scheduler talks to.
    pub fn has_control_port(&self) -> bool {
        matches!(self, ControlMode::Direct | ControlMode::Fairmq)
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlMode::Basic => "basic",
            ControlMode::Direct => "direct",
            ControlMode::Fairmq => "fairmq",
            ControlMode::Hook => "hook",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// `KEY=value` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default)]
    pub shell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CommandInfo {
    /// Whether an env var named `key` is already set.
    pub fn has_env(&self, key: &str) -> bool {
        self.env
            .iter()
            .any(|e| e.split_once('=').map(|(k, _)| k) == Some(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceWants {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Ranges::is_empty")]
    pub ports: Ranges,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ControlSection {
    #[serde(default)]
    mode: ControlMode,
}

/// On-disk shape of a class document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Template {
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    defaults: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    control: ControlSection,
    #[serde(default)]
    command: CommandInfo,
    #[serde(default)]
    wants: ResourceWants,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limits: Option<ResourceLimits>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bind: Vec<Inbound>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    connect: Vec<Outbound>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskClass {
    pub id: ClassId,
    pub defaults: BTreeMap<String, String>,
    pub vars: BTreeMap<String, String>,
    pub control_mode: ControlMode,
    pub command: CommandInfo,
    pub wants: ResourceWants,
    pub limits: Option<ResourceLimits>,
    pub bind: Vec<Inbound>,
    pub connect: Vec<Outbound>,
    pub properties: BTreeMap<String, String>,
    pub constraints: Constraints,
}

impl TaskClass {
    /// A minimal class, mostly for building fixtures in code.
    pub fn new(repo: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ClassId {
                repo: repo.into(),
                name: name.into(),
                hash: String::new(),
            },
            defaults: BTreeMap::new(),
            vars: BTreeMap::new(),
            control_mode: ControlMode::Basic,
            command: CommandInfo::default(),
            wants: ResourceWants::default(),
            limits: None,
            bind: Vec::new(),
            connect: Vec::new(),
            properties: BTreeMap::new(),
            constraints: Constraints::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Parse a class document. The hash is the hex SHA-256 of `text`.
    ///
    /// Outbound channel targets are environment-specific, so any target
    /// present in a class document is dropped.
    pub fn from_yaml(repo: &str, text: &str) -> CoreResult<Self> {
        let mut tpl: Template = serde_yaml::from_str(text)?;
        if tpl.name.trim().is_empty() {
            return Err(CoreError::InvalidClass("missing name".to_string()));
        }

        for ch in &mut tpl.connect {
            if !ch.spec.target.is_empty() {
                warn!(class = %tpl.name, channel = %ch.spec.name, "class outbound channel has a target, ignoring");
                ch.spec.target.clear();
            }
        }

        let hash = hex::encode(Sha256::digest(text.as_bytes()));
        Ok(Self {
            id: ClassId {
                repo: repo.to_string(),
                name: tpl.name,
                hash,
            },
            defaults: tpl.defaults,
            vars: tpl.vars,
            control_mode: tpl.control.mode,
            command: tpl.command,
            wants: tpl.wants,
            limits: tpl.limits,
            bind: tpl.bind,
            connect: tpl.connect,
            properties: tpl.properties,
            constraints: Constraints(tpl.constraints),
        })
    }

    /// Render the class back into its document form.
    pub fn to_yaml(&self) -> CoreResult<String> {
        let tpl = Template {
            name: self.id.name.clone(),
            defaults: self.defaults.clone(),
            vars: self.vars.clone(),
            control: ControlSection {
                mode: self.control_mode,
            },
            command: self.command.clone(),
            wants: self.wants.clone(),
            limits: self.limits.clone(),
            bind: self.bind.clone(),
            connect: self.connect.clone(),
            properties: self.properties.clone(),
            constraints: self.constraints.0.clone(),
        };
        Ok(serde_yaml::to_string(&tpl)?)
    }

    /// Equivalence ignoring identity: same command, wants, limits,
    /// constraints and channels.
    pub fn equivalent(&self, other: &TaskClass) -> bool {
        self.id.name == other.id.name
            && self.control_mode == other.control_mode
            && self.command == other.command
            && self.wants == other.wants
            && self.limits == other.limits
            && self.constraints == other.constraints
            && self.bind == other.bind
            && self.connect == other.connect
            && self.properties == other.properties
    }
}

/// Parse every `.yaml`/`.yml` file under `dir`.
///
/// A file that fails to parse is logged and skipped; only I/O errors on the
/// directory walk itself fail the call.
pub fn load_dir(repo: &str, dir: &Path) -> CoreResult<Vec<TaskClass>> {
    let mut classes = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !entry.file_type().is_file() || !is_yaml {
            continue;
        }
        let text = std::fs::read_to_string(path)?;
        match TaskClass::from_yaml(repo, &text) {
            Ok(class) => {
                debug!(class = %class.id, path = %path.display(), "loaded task class");
                classes.push(class);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid task class"),
        }
    }
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelType;

    const READOUT: &str = r#"
name: readout
control:
  mode: fairmq
command:
  value: readout.exe
  arguments: ["--id", "1"]
  env: ["LOGLEVEL=info"]
wants:
  cpu: 0.5
  memory: 512
  ports: "47100-47105,47200"
limits:
  cpu: 2
bind:
  - name: data
    type: push
  - name: monitor
    type: pub
    addressing: ipc
    global: readout-monitor
connect:
  - name: ctrl
    type: pull
    target: "somewhere.else"
properties:
  severity: info
constraints:
  - attribute: machine_id
    value: flp01
"#;

    #[test]
    fn parse_document() {
        let class = TaskClass::from_yaml("local", READOUT).unwrap();
        assert_eq!(class.name(), "readout");
        assert_eq!(class.control_mode, ControlMode::Fairmq);
        assert_eq!(class.command.value, "readout.exe");
        assert!(class.command.has_env("LOGLEVEL"));
        assert_eq!(class.wants.cpu, Some(0.5));
        assert_eq!(class.wants.ports.size(), 7);
        assert_eq!(class.limits.as_ref().unwrap().cpu, Some(2.0));
        assert_eq!(class.bind.len(), 2);
        assert_eq!(class.bind[0].spec.kind, ChannelType::Push);
        assert_eq!(class.bind[0].spec.snd_buf_size, 1000);
        assert_eq!(class.bind[1].global, "readout-monitor");
        assert!(class.connect[0].spec.target.is_empty());
        assert_eq!(class.constraints.machine_id(), Some("flp01"));
        assert_eq!(class.id.hash.len(), 64);
        assert!(class.id.to_string().starts_with("local/tasks/readout@"));
    }

    #[test]
    fn yaml_round_trip_is_equivalent() {
        let class = TaskClass::from_yaml("local", READOUT).unwrap();
        let rendered = class.to_yaml().unwrap();
        let back = TaskClass::from_yaml("local", &rendered).unwrap();
        assert!(class.equivalent(&back), "{rendered}");
    }

    #[test]
    fn missing_name_rejected() {
        assert!(TaskClass::from_yaml("local", "command:\n  value: x\n").is_err());
    }

    #[test]
    fn load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readout.yaml"), READOUT).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "name: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let classes = load_dir("local", dir.path()).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name(), "readout");
    }
}
