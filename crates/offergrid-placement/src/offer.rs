//! Resource offers.

use offergrid_core::{Attributes, Ranges};
use serde::{Deserialize, Serialize};

use crate::wants::Wants;

/// Scalar and port resources of one offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpus: f64,
    /// Megabytes.
    pub mem: f64,
    #[serde(default)]
    pub ports: Ranges,
}

impl ResourceVector {
    pub fn new(cpus: f64, mem: f64, ports: Ranges) -> Self {
        Self { cpus, mem, ports }
    }

    /// Whether these resources can host `wants`: enough cpu and memory,
    /// every static port available, and one more free port per
    /// dynamically bound channel.
    pub fn satisfies(&self, wants: &Wants) -> bool {
        if wants.cpu > self.cpus || wants.memory > self.mem {
            return false;
        }
        if !wants.static_ports.is_subset_of(&self.ports) {
            return false;
        }
        let dynamic = wants.dynamic_port_count();
        self.ports.size() - wants.static_ports.size() >= dynamic
    }

    /// Smallest free port at or above `floor`, removed from the vector.
    pub fn take_port(&mut self, floor: u64) -> Option<u64> {
        let port = self.ports.remove_below(floor).min()?;
        self.ports = self.ports.remove_port(port);
        Some(port)
    }

    pub fn subtract_scalars(&mut self, cpus: f64, mem: f64) {
        self.cpus = (self.cpus - cpus).max(0.0);
        self.mem = (self.mem - mem).max(0.0);
    }

    pub fn subtract_ports(&mut self, ports: &Ranges) {
        self.ports = self.ports.subtract(ports);
    }

    pub fn add(&mut self, other: &ResourceVector) {
        self.cpus += other.cpus;
        self.mem += other.mem;
        self.ports = self.ports.union(&other.ports);
    }
}

/// A time-boxed grant of one agent's resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub agent_id: String,
    pub hostname: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub resources: ResourceVector,
    /// Executors already running on the agent for this scheduler.
    #[serde(default)]
    pub executor_ids: Vec<String>,
}

impl Offer {
    pub fn machine_id(&self) -> Option<&str> {
        self.attributes.machine_id()
    }
}
