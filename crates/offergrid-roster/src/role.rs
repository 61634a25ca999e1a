//! Role arena.
//!
//! Roles form a tree per environment; leaf roles own at most one task.
//! Tasks refer to their role by [`RoleId`] and roles refer to their task by
//! task id, so neither side holds the other.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

use offergrid_core::channel::{Inbound, Outbound};
use offergrid_core::{Constraints, State, Status};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::Descriptor;
use crate::error::{RosterError, RosterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role-{}", self.0)
    }
}

/// Behavioural traits attached to a role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTraits {
    /// Hook trigger name; a basic task under a triggered role is a hook.
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub await_trigger: String,
    #[serde(default)]
    pub timeout: String,
    #[serde(default = "default_critical")]
    pub critical: bool,
}

fn default_critical() -> bool {
    true
}

/// What a caller provides to create a role.
#[derive(Debug, Clone, Default)]
pub struct RoleSpec {
    pub name: String,
    pub traits: TaskTraits,
    pub constraints: Constraints,
    pub vars: BTreeMap<String, String>,
    pub bind: Vec<Inbound>,
    pub connect: Vec<Outbound>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            traits: TaskTraits {
                critical: true,
                ..TaskTraits::default()
            },
            ..Self::default()
        }
    }

    pub fn non_critical(mut self) -> Self {
        self.traits.critical = false;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.traits.trigger = trigger.into();
        self
    }

    pub fn with_connect(mut self, ch: Outbound) -> Self {
        self.connect.push(ch);
        self
    }

    pub fn with_bind(mut self, ch: Inbound) -> Self {
        self.bind.push(ch);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    /// Dot-separated path from the environment root.
    pub path: String,
    pub env_id: String,
    pub parent: Option<RoleId>,
    pub children: Vec<RoleId>,
    pub traits: TaskTraits,
    pub constraints: Constraints,
    pub vars: BTreeMap<String, String>,
    pub bind: Vec<Inbound>,
    pub connect: Vec<Outbound>,
    /// Id of the task this role owns, if any.
    pub task: Option<String>,
    task_state: State,
    task_status: Status,
    /// Roll-up over own task and children.
    pub state: State,
    pub status: Status,
}

impl Role {
    pub fn is_critical(&self) -> bool {
        self.traits.critical
    }

    pub fn has_trigger(&self) -> bool {
        !self.traits.trigger.is_empty()
    }
}

#[derive(Default)]
struct ArenaInner {
    next_id: u64,
    roles: HashMap<RoleId, Role>,
}

/// All roles of all environments.
#[derive(Default)]
pub struct RoleArena {
    inner: RwLock<ArenaInner>,
}

impl RoleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root role of an environment.
    pub fn add_root(&self, env_id: &str, spec: RoleSpec) -> RoleId {
        let mut inner = self.inner.write().expect("roles lock");
        let id = next_id(&mut inner);
        let role = new_role(id, spec.name.clone(), env_id.to_string(), None, spec);
        inner.roles.insert(id, role);
        id
    }

    pub fn add_child(&self, parent: RoleId, spec: RoleSpec) -> RosterResult<RoleId> {
        let mut inner = self.inner.write().expect("roles lock");
        let (path, env_id) = {
            let p = inner
                .roles
                .get(&parent)
                .ok_or_else(|| RosterError::RoleNotFound(parent.to_string()))?;
            (format!("{}.{}", p.path, spec.name), p.env_id.clone())
        };
        let id = next_id(&mut inner);
        let role = new_role(id, path, env_id, Some(parent), spec);
        inner.roles.insert(id, role);
        if let Some(p) = inner.roles.get_mut(&parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    pub fn get(&self, id: RoleId) -> Option<Role> {
        self.inner.read().expect("roles lock").roles.get(&id).cloned()
    }

    pub fn path(&self, id: RoleId) -> Option<String> {
        self.inner
            .read()
            .expect("roles lock")
            .roles
            .get(&id)
            .map(|r| r.path.clone())
    }

    pub fn env_id(&self, id: RoleId) -> Option<String> {
        self.inner
            .read()
            .expect("roles lock")
            .roles
            .get(&id)
            .map(|r| r.env_id.clone())
    }

    pub fn is_critical(&self, id: RoleId) -> bool {
        self.inner
            .read()
            .expect("roles lock")
            .roles
            .get(&id)
            .is_some_and(Role::is_critical)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("roles lock").roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every role of `env_id` that has no children.
    pub fn leaves(&self, env_id: &str) -> Vec<Role> {
        let inner = self.inner.read().expect("roles lock");
        let mut out: Vec<Role> = inner
            .roles
            .values()
            .filter(|r| r.env_id == env_id && r.children.is_empty())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// Descriptor asking for one task of `class_name` under `role`.
    pub fn descriptor(&self, role: RoleId, class_name: &str) -> RosterResult<Descriptor> {
        let inner = self.inner.read().expect("roles lock");
        let r = inner
            .roles
            .get(&role)
            .ok_or_else(|| RosterError::RoleNotFound(role.to_string()))?;
        Ok(Descriptor {
            role,
            role_path: r.path.clone(),
            env_id: r.env_id.clone(),
            class_name: class_name.to_string(),
            role_constraints: r.constraints.clone(),
            critical: r.is_critical(),
            vars: r.vars.clone(),
            role_bind: r.bind.clone(),
            has_trigger: r.has_trigger(),
        })
    }

    /// Attach a task to its role and fold its state/status upward.
    pub fn set_task(&self, role: RoleId, task_id: &str, state: State, status: Status) -> RosterResult<()> {
        let mut inner = self.inner.write().expect("roles lock");
        let r = inner
            .roles
            .get_mut(&role)
            .ok_or_else(|| RosterError::RoleNotFound(role.to_string()))?;
        r.task = Some(task_id.to_string());
        r.task_state = state;
        r.task_status = status;
        debug!(%role, task_id, "task attached to role");
        propagate(&mut inner, role);
        Ok(())
    }

    pub fn unset_task(&self, role: RoleId) {
        let mut inner = self.inner.write().expect("roles lock");
        if let Some(r) = inner.roles.get_mut(&role) {
            r.task = None;
            r.task_state = State::Invariant;
            r.task_status = Status::Invariant;
            propagate(&mut inner, role);
        }
    }

    pub fn update_state(&self, role: RoleId, state: State) {
        let mut inner = self.inner.write().expect("roles lock");
        if let Some(r) = inner.roles.get_mut(&role) {
            r.task_state = state;
            propagate(&mut inner, role);
        }
    }

    pub fn update_status(&self, role: RoleId, status: Status) {
        let mut inner = self.inner.write().expect("roles lock");
        if let Some(r) = inner.roles.get_mut(&role) {
            r.task_status = status;
            propagate(&mut inner, role);
        }
    }

    /// Drop every role of an environment.
    pub fn remove_env(&self, env_id: &str) -> usize {
        let mut inner = self.inner.write().expect("roles lock");
        let before = inner.roles.len();
        inner.roles.retain(|_, r| r.env_id != env_id);
        before - inner.roles.len()
    }
}

// ── Internal helpers ───────────────────────────────────────────────

fn next_id(inner: &mut ArenaInner) -> RoleId {
    inner.next_id += 1;
    RoleId(inner.next_id)
}

fn new_role(id: RoleId, path: String, env_id: String, parent: Option<RoleId>, spec: RoleSpec) -> Role {
    Role {
        id,
        name: spec.name,
        path,
        env_id,
        parent,
        children: Vec::new(),
        traits: spec.traits,
        constraints: spec.constraints,
        vars: spec.vars,
        bind: spec.bind,
        connect: spec.connect,
        task: None,
        task_state: State::Invariant,
        task_status: Status::Invariant,
        state: State::Standby,
        status: Status::Inactive,
    }
}

/// Recompute the roll-up of `from` and every ancestor.
fn propagate(inner: &mut ArenaInner, from: RoleId) {
    let mut cursor = Some(from);
    while let Some(id) = cursor {
        let (state, status, parent) = {
            let Some(role) = inner.roles.get(&id) else {
                return;
            };
            let children: Vec<&Role> = role
                .children
                .iter()
                .filter_map(|c| inner.roles.get(c))
                .collect();
            let state = State::fold(
                std::iter::once(role.task_state).chain(children.iter().map(|c| c.state)),
            );
            let status = Status::fold(
                std::iter::once(role.task_status).chain(children.iter().map(|c| c.status)),
            );
            (state, status, role.parent)
        };
        if let Some(role) = inner.roles.get_mut(&id) {
            role.state = state;
            role.status = status;
        }
        cursor = parent;
    }
}
