//! What a descriptor asks of an offer.

use offergrid_core::{Inbound, Ranges, TaskClass};
use offergrid_roster::Descriptor;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wants {
    pub cpu: f64,
    pub memory: f64,
    pub static_ports: Ranges,
    /// Role channels merged over class channels.
    pub inbound: Vec<Inbound>,
}

impl Wants {
    pub fn for_descriptor(descriptor: &Descriptor, class: &TaskClass) -> Self {
        let cpu = class.wants.cpu.unwrap_or_else(|| {
            warn!(class = %class.name(), "task class has no cpu requirement");
            0.0
        });
        let memory = class.wants.memory.unwrap_or_else(|| {
            warn!(class = %class.name(), "task class has no memory requirement");
            0.0
        });
        Self {
            cpu,
            memory,
            static_ports: class.wants.ports.clone(),
            inbound: descriptor.inbound(class),
        }
    }

    pub fn dynamic_port_count(&self) -> u64 {
        self.inbound.iter().filter(|c| c.needs_dynamic_port()).count() as u64
    }
}

/// Hard caps. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
}

impl Limits {
    pub fn for_class(class: &TaskClass) -> Self {
        let Some(l) = &class.limits else {
            return Self::default();
        };
        Self {
            cpu: l.cpu.filter(|v| *v > 0.0),
            memory: l.memory.filter(|v| *v > 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offergrid_core::channel::{Addressing, ChannelType};
    use offergrid_core::class::ResourceLimits;
    use offergrid_roster::RoleId;

    #[test]
    fn role_channels_override_class_channels() {
        let mut class = TaskClass::new("local", "readout");
        class.wants.cpu = Some(0.5);
        let mut class_ch = Inbound::new("data", ChannelType::Push);
        class_ch.addressing = Addressing::Ipc;
        class.bind = vec![class_ch, Inbound::new("mon", ChannelType::Pub)];
        class.limits = Some(ResourceLimits {
            cpu: Some(0.0),
            memory: Some(2048.0),
        });

        let d = Descriptor {
            role: RoleId(1),
            role_path: "r".into(),
            env_id: "e".into(),
            class_name: "readout".into(),
            role_constraints: Default::default(),
            critical: true,
            vars: Default::default(),
            role_bind: vec![Inbound::new("data", ChannelType::Push)],
            has_trigger: false,
        };
        let w = Wants::for_descriptor(&d, &class);
        assert_eq!(w.cpu, 0.5);
        assert_eq!(w.memory, 0.0);
        assert_eq!(w.inbound.len(), 2);
        // role "data" is tcp, so both channels take a port
        assert_eq!(w.dynamic_port_count(), 2);

        let l = Limits::for_class(&class);
        assert_eq!(l.cpu, None);
        assert_eq!(l.memory, Some(2048.0));
    }
}
