//! offergrid.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of the command queue feeding the single commit worker.
    pub command_queue_capacity: usize,
    /// Capacity of the task manager's internal message queue.
    pub taskman_queue_capacity: usize,
    pub default_command_timeout_secs: u64,
    /// Configuration pushes a lot more data than a plain transition.
    pub configure_timeout_secs: u64,
    pub deploy_max_attempts: u32,
    /// How long one deployment attempt waits for an offers round.
    pub offer_wait_timeout_secs: u64,
    pub kill_ack_timeout_secs: u64,
    pub class_ttl_secs: u64,
    /// Reuse idle, unlocked tasks before asking for new deployments.
    pub reuse_unlocked_tasks: bool,
    pub revive_tokens: u32,
    pub revive_refill_secs: u64,
    /// Dynamically bound channel ports are taken at or above this port.
    pub dynamic_port_floor: u64,
    /// Control ports are taken at or above this port.
    pub control_port_floor: u64,
    pub ipc_dir: String,
    pub class_repo: String,
    pub class_dirs: Vec<PathBuf>,
    pub agents: Vec<AgentConfig>,
}

/// A machine in the in-process cluster used by standalone mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub hostname: String,
    pub cpus: f64,
    pub mem: f64,
    /// Port expression, e.g. `"9000-9100,30000-30100"`.
    pub ports: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 16384,
            taskman_queue_capacity: 1024,
            default_command_timeout_secs: 90,
            configure_timeout_secs: 120,
            deploy_max_attempts: 3,
            offer_wait_timeout_secs: 30,
            kill_ack_timeout_secs: 60,
            class_ttl_secs: 300,
            reuse_unlocked_tasks: true,
            revive_tokens: 3,
            revive_refill_secs: 1,
            dynamic_port_floor: 9000,
            control_port_floor: 30000,
            ipc_dir: "/tmp".to_string(),
            class_repo: "local".to_string(),
            class_dirs: Vec::new(),
            agents: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command_queue_capacity == 0 || self.taskman_queue_capacity == 0 {
            anyhow::bail!("queue capacities must be non-zero");
        }
        if self.deploy_max_attempts == 0 {
            anyhow::bail!("deploy_max_attempts must be at least 1");
        }
        if self.control_port_floor <= self.dynamic_port_floor {
            anyhow::bail!(
                "control_port_floor ({}) must be above dynamic_port_floor ({})",
                self.control_port_floor,
                self.dynamic_port_floor
            );
        }
        for agent in &self.agents {
            crate::ports::Ranges::parse(&agent.ports)
                .map_err(|e| anyhow::anyhow!("agent {}: {e}", agent.hostname))?;
        }
        Ok(())
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.default_command_timeout_secs)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_secs(self.configure_timeout_secs)
    }

    pub fn offer_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_wait_timeout_secs)
    }

    pub fn kill_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_ack_timeout_secs)
    }

    pub fn class_ttl(&self) -> Duration {
        Duration::from_secs(self.class_ttl_secs)
    }

    pub fn revive_refill(&self) -> Duration {
        Duration::from_secs(self.revive_refill_secs)
    }
}
