//! A concrete, running (or idle) instance of a task class.

use std::collections::BTreeMap;
use std::sync::Arc;

use offergrid_control::CommandTarget;
use offergrid_core::channel::{BindMap, Inbound, Outbound, PropertyMap};
use offergrid_core::class::CommandInfo;
use offergrid_core::{ControlMode, State, Status, TaskClass};

use crate::error::{RosterError, RosterResult};
use crate::role::RoleId;

/// A property set to this value falls back to the class default of the
/// same key.
pub const DEFAULT_SENTINEL: &str = "default";

#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    /// `<class>#<task id>`.
    pub name: String,
    pub class: Arc<TaskClass>,
    pub hostname: String,
    pub agent_id: String,
    pub offer_id: String,
    pub executor_id: String,
    /// Owning role; `None` for idle tasks.
    pub parent: Option<RoleId>,
    /// Environment of the owning role, empty while idle.
    pub env_id: String,
    pub state: State,
    pub status: Status,
    /// Inbound channel name → endpoint allocated at deployment.
    pub local_bind_map: BindMap,
    /// Overlay on top of the class properties.
    pub properties: BTreeMap<String, String>,
    pub safe_to_stop: bool,
    pub control_mode: ControlMode,
    pub control_port: Option<u64>,
    /// Command as launched, after env defaults and control arguments.
    pub command: CommandInfo,
}

impl Task {
    /// A fresh task of `class`, not yet placed anywhere.
    pub fn new(class: Arc<TaskClass>) -> Self {
        let task_id = uuid::Uuid::new_v4().to_string();
        Self {
            name: format!("{}#{}", class.name(), task_id),
            task_id,
            hostname: String::new(),
            agent_id: String::new(),
            offer_id: String::new(),
            executor_id: String::new(),
            parent: None,
            env_id: String::new(),
            state: State::Standby,
            status: Status::Inactive,
            local_bind_map: BindMap::new(),
            properties: BTreeMap::new(),
            safe_to_stop: false,
            control_mode: class.control_mode,
            control_port: None,
            command: class.command.clone(),
            class,
        }
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// The only definition of ownership: placed on a machine, launched,
    /// and attached to a role.
    pub fn is_locked(&self) -> bool {
        !self.hostname.is_empty()
            && !self.agent_id.is_empty()
            && !self.offer_id.is_empty()
            && !self.task_id.is_empty()
            && !self.executor_id.is_empty()
            && self.parent.is_some()
    }

    /// Idle, alive and unconfigured: can be handed to a new role.
    pub fn is_claimable(&self) -> bool {
        !self.is_locked() && self.status == Status::Active && self.state == State::Standby
    }

    pub fn command_target(&self) -> CommandTarget {
        CommandTarget::new(&self.agent_id, &self.executor_id, &self.task_id)
    }

    pub fn lock(&mut self, role: RoleId, env_id: &str) {
        self.parent = Some(role);
        self.env_id = env_id.to_string();
    }

    pub fn release(&mut self) {
        self.parent = None;
        self.env_id.clear();
    }

    /// Class properties with the task overlay applied.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut out = self.class.properties.clone();
        out.extend(self.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    /// Variables derived from the task itself, available to templating.
    pub fn special_vars(&self, parent_path: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("task_name".to_string(), self.name.clone()),
            ("task_id".to_string(), self.task_id.clone()),
            ("task_class_name".to_string(), self.class_name().to_string()),
            ("task_hostname".to_string(), self.hostname.clone()),
            ("environment_id".to_string(), self.env_id.clone()),
            ("task_parent_role".to_string(), parent_path.to_string()),
        ])
    }

    /// A basic task under a role with a trigger runs as a hook.
    pub fn resolve_control_mode(class_mode: ControlMode, role_has_trigger: bool) -> ControlMode {
        if class_mode == ControlMode::Basic && role_has_trigger {
            ControlMode::Hook
        } else {
            class_mode
        }
    }

    /// Properties pushed on configuration: class defaults, properties and
    /// special variables, plus channel wiring for FairMQ tasks.
    pub fn build_property_map(
        &self,
        bind: &[Inbound],
        connect: &[Outbound],
        global: &BindMap,
        parent_path: &str,
    ) -> RosterResult<PropertyMap> {
        if !self.is_locked() {
            return Err(RosterError::TaskNotLocked(self.task_id.clone()));
        }

        let mut pm = PropertyMap::new();
        pm.extend(self.class.defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        pm.extend(self.properties());
        pm.extend(self.special_vars(parent_path));
        for (key, value) in pm.iter_mut() {
            if value.as_str() == DEFAULT_SENTINEL {
                if let Some(fallback) = self.class.defaults.get(key) {
                    *value = fallback.clone();
                }
            }
        }

        if self.control_mode == ControlMode::Fairmq {
            for ch in bind {
                pm.extend(ch.to_fmq_map(&self.local_bind_map)?);
            }
            for ch in connect {
                pm.extend(ch.to_fmq_map(global)?);
            }
        }
        Ok(pm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offergrid_core::channel::{ChannelType, Endpoint, Transport};

    fn placed() -> Task {
        let mut class = TaskClass::new("local", "readout");
        class.properties.insert("severity".into(), "info".into());
        let mut t = Task::new(Arc::new(class));
        t.hostname = "flp01".into();
        t.agent_id = "agent-1".into();
        t.offer_id = "offer-1".into();
        t.executor_id = "exec-1".into();
        t.lock(RoleId(1), "env-1");
        t
    }

    #[test]
    fn new_task_defaults() {
        let t = Task::new(Arc::new(TaskClass::new("local", "qc")));
        assert_eq!(t.state, State::Standby);
        assert_eq!(t.status, Status::Inactive);
        assert!(t.name.starts_with("qc#"));
        assert!(!t.is_locked());
    }

    #[test]
    fn locked_iff_all_fields_and_parent() {
        let t = placed();
        assert!(t.is_locked());

        let flips: [fn(&mut Task); 6] = [
            |t| t.hostname.clear(),
            |t| t.agent_id.clear(),
            |t| t.offer_id.clear(),
            |t| t.task_id.clear(),
            |t| t.executor_id.clear(),
            |t| t.parent = None,
        ];
        for flip in flips {
            let mut t = placed();
            flip(&mut t);
            assert!(!t.is_locked());
        }
    }

    #[test]
    fn claimable_requires_idle_active_standby() {
        let mut t = placed();
        t.status = Status::Active;
        assert!(!t.is_claimable());
        t.release();
        assert!(t.is_claimable());
        t.state = State::Configured;
        assert!(!t.is_claimable());
    }

    #[test]
    fn hook_mode_resolution() {
        assert_eq!(Task::resolve_control_mode(ControlMode::Basic, true), ControlMode::Hook);
        assert_eq!(Task::resolve_control_mode(ControlMode::Basic, false), ControlMode::Basic);
        assert_eq!(Task::resolve_control_mode(ControlMode::Fairmq, true), ControlMode::Fairmq);
    }

    #[test]
    fn property_map_requires_lock() {
        let mut t = placed();
        t.release();
        assert!(matches!(
            t.build_property_map(&[], &[], &BindMap::new(), ""),
            Err(RosterError::TaskNotLocked(_))
        ));
    }

    #[test]
    fn property_map_for_fairmq_task() {
        let mut t = placed();
        t.control_mode = ControlMode::Fairmq;
        t.properties.insert("severity".into(), "debug".into());
        t.local_bind_map
            .insert("data".into(), Endpoint::bound_tcp(9001, Transport::Default));
        let mut global = BindMap::new();
        global.insert(
            "root.qc.in".into(),
            Endpoint::bound_tcp(9100, Transport::Default).to_target("qc01"),
        );
        let bind = vec![Inbound::new("data", ChannelType::Push)];
        let connect = vec![Outbound::new("qc", ChannelType::Push, "root.qc.in")];

        let pm = t.build_property_map(&bind, &connect, &global, "root.readout").unwrap();
        assert_eq!(pm["severity"], "debug");
        assert_eq!(pm["task_parent_role"], "root.readout");
        assert_eq!(pm["environment_id"], "env-1");
        assert_eq!(pm["chans.data.0.address"], "tcp://*:9001");
        assert_eq!(pm["chans.qc.0.address"], "tcp://qc01:9100");
    }

    #[test]
    fn default_sentinel_falls_back_to_class_default() {
        let mut class = TaskClass::new("local", "readout");
        class.defaults.insert("log_level".into(), "warning".into());
        class.properties.insert("log_level".into(), DEFAULT_SENTINEL.into());
        class.properties.insert("mode".into(), DEFAULT_SENTINEL.into());
        let mut t = Task::new(Arc::new(class));
        t.hostname = "flp01".into();
        t.agent_id = "agent-1".into();
        t.offer_id = "offer-1".into();
        t.executor_id = "exec-1".into();
        t.lock(RoleId(1), "env-1");

        let pm = t.build_property_map(&[], &[], &BindMap::new(), "root").unwrap();
        assert_eq!(pm["log_level"], "warning");
        // no class default to fall back to
        assert_eq!(pm["mode"], DEFAULT_SENTINEL);
    }
}
