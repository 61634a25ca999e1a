//! Placement constraints and the agent attributes they are checked against.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Attribute name that pins a task to a single machine.
pub const MACHINE_ID_ATTRIBUTE: &str = "machine_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing)]
    pub operator: Operator,
}

impl Constraint {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
            operator: Operator::Equals,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, self.value)
    }
}

/// An ordered list of constraints. At most one entry per attribute is
/// expected, but nothing enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraints(pub Vec<Constraint>);

impl Constraints {
    pub fn new(items: Vec<Constraint>) -> Self {
        Self(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.0.iter()
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.attribute == attribute)
            .map(|c| c.value.as_str())
    }

    /// Overlay `self` on top of `parent`: entries in `self` win on the same
    /// attribute, parent entries for other attributes are kept.
    pub fn merge_parent(&self, parent: &Constraints) -> Constraints {
        let mut merged = self.0.clone();
        for pc in &parent.0 {
            if !merged.iter().any(|c| c.attribute == pc.attribute) {
                merged.push(pc.clone());
            }
        }
        Constraints(merged)
    }

    /// The machine a descriptor is pinned to, if any.
    pub fn machine_id(&self) -> Option<&str> {
        self.get(MACHINE_ID_ATTRIBUTE)
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join("; "))
    }
}

impl From<Vec<Constraint>> for Constraints {
    fn from(v: Vec<Constraint>) -> Self {
        Self(v)
    }
}

// ── Attributes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Text attributes advertised by an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(pub Vec<Attribute>);

impl Attributes {
    pub fn new(items: Vec<Attribute>) -> Self {
        Self(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.get(MACHINE_ID_ATTRIBUTE)
    }

    /// Check every constraint against these attributes.
    ///
    /// An empty constraint set is always satisfied. An attribute value
    /// holding a comma-separated list matches if any element is equal.
    pub fn satisfy(&self, constraints: &Constraints) -> bool {
        if constraints.is_empty() {
            return true;
        }
        if self.is_empty() {
            debug!("no attributes but non-empty constraints");
            return false;
        }

        constraints.iter().all(|c| match c.operator {
            Operator::Equals => match self.get(&c.attribute) {
                Some(value) => value == c.value || value.split(',').any(|v| v.trim() == c.value),
                None => {
                    warn!(attribute = %c.attribute, "constraint not satisfiable, attribute missing");
                    false
                }
            },
        })
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|a| format!("{}:{}", a.name, a.value))
            .collect();
        write!(f, "[{}]", parts.join("; "))
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(n, v)| Attribute::new(n, v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        Attributes(pairs.iter().map(|(n, v)| Attribute::new(*n, *v)).collect())
    }

    #[test]
    fn empty_constraints_always_satisfied() {
        assert!(Attributes::default().satisfy(&Constraints::default()));
        assert!(attrs(&[("a", "b")]).satisfy(&Constraints::default()));
    }

    #[test]
    fn missing_attributes_fail() {
        let c = Constraints(vec![Constraint::equals("machine_id", "hostA")]);
        assert!(!Attributes::default().satisfy(&c));
        assert!(!attrs(&[("rack", "1")]).satisfy(&c));
    }

    #[test]
    fn all_constraints_must_hold() {
        let c = Constraints(vec![
            Constraint::equals("rack", "1"),
            Constraint::equals("kind", "flp"),
        ]);
        assert!(attrs(&[("rack", "1"), ("kind", "flp")]).satisfy(&c));
        assert!(!attrs(&[("rack", "1"), ("kind", "epn")]).satisfy(&c));
        assert!(!attrs(&[("rack", "2"), ("kind", "flp")]).satisfy(&c));
    }

    #[test]
    fn comma_list_attribute_matches_any() {
        let c = Constraints(vec![Constraint::equals("detector", "TPC")]);
        assert!(attrs(&[("detector", "ITS,TPC")]).satisfy(&c));
        assert!(!attrs(&[("detector", "ITS,MFT")]).satisfy(&c));
    }

    #[test]
    fn merge_parent_child_wins() {
        let child = Constraints(vec![Constraint::equals("rack", "2")]);
        let parent = Constraints(vec![
            Constraint::equals("rack", "1"),
            Constraint::equals("kind", "flp"),
        ]);
        let merged = child.merge_parent(&parent);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("rack"), Some("2"));
        assert_eq!(merged.get("kind"), Some("flp"));
    }

    #[test]
    fn machine_id_lookup() {
        let c = Constraints(vec![Constraint::equals(MACHINE_ID_ATTRIBUTE, "hostA")]);
        assert_eq!(c.machine_id(), Some("hostA"));
        assert_eq!(Constraints::default().machine_id(), None);
    }
}
