//! Requests to materialise one task for one role.

use std::collections::BTreeMap;

use offergrid_core::channel::{Inbound, merge_inbound};
use offergrid_core::{Constraints, TaskClass};
use serde::{Deserialize, Serialize};

use crate::role::RoleId;

/// A pending request to deploy one task instance. Produced from the role
/// tree, consumed (never mutated) by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub role: RoleId,
    pub role_path: String,
    pub env_id: String,
    pub class_name: String,
    pub role_constraints: Constraints,
    pub critical: bool,
    pub vars: BTreeMap<String, String>,
    /// Inbound channels declared on the role itself.
    #[serde(default)]
    pub role_bind: Vec<Inbound>,
    /// The role carries a hook trigger.
    #[serde(default)]
    pub has_trigger: bool,
}

impl Descriptor {
    /// Role constraints layered over the class constraints.
    pub fn resolved_constraints(&self, class: Option<&TaskClass>) -> Constraints {
        match class {
            Some(c) => self.role_constraints.merge_parent(&c.constraints),
            None => self.role_constraints.clone(),
        }
    }

    /// Role inbound channels layered over the class ones.
    pub fn inbound(&self, class: &TaskClass) -> Vec<Inbound> {
        merge_inbound(&self.role_bind, &class.bind)
    }

    pub fn detector(&self) -> &str {
        self.vars.get("detector").map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offergrid_core::Constraint;

    #[test]
    fn role_constraints_override_class() {
        let mut class = TaskClass::new("local", "readout");
        class.constraints = Constraints(vec![
            Constraint::equals("machine_id", "flp01"),
            Constraint::equals("kind", "flp"),
        ]);
        let d = Descriptor {
            role: RoleId(1),
            role_path: "root.readout".into(),
            env_id: "env".into(),
            class_name: "readout".into(),
            role_constraints: Constraints(vec![Constraint::equals("machine_id", "flp02")]),
            critical: true,
            vars: BTreeMap::new(),
            role_bind: Vec::new(),
            has_trigger: false,
        };
        let resolved = d.resolved_constraints(Some(&class));
        assert_eq!(resolved.machine_id(), Some("flp02"));
        assert_eq!(resolved.get("kind"), Some("flp"));
        assert_eq!(d.resolved_constraints(None).len(), 1);
        assert_eq!(d.detector(), "");
    }
}
