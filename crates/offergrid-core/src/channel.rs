//! Data channels between tasks and the endpoints they bind to.
//!
//! A task class declares inbound channels (it binds) and outbound channels
//! (it connects). At deployment time every inbound channel that needs one
//! gets an [`Endpoint`]; the union of those endpoints across an environment
//! forms the global [`BindMap`] that outbound channels resolve against.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Key/value properties pushed to a task on configuration.
pub type PropertyMap = BTreeMap<String, String>;

/// Separator between a role path and a channel name in bind-map keys.
pub const TARGET_SEPARATOR: &str = ".";

/// Prefix of global channel aliases in bind-map keys.
pub const GLOBAL_PREFIX: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Push,
    Pull,
    Pub,
    Sub,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelType::Push => "push",
            ChannelType::Pull => "pull",
            ChannelType::Pub => "pub",
            ChannelType::Sub => "sub",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Default,
    Zeromq,
    Nanomsg,
    Shmem,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Default => "default",
            Transport::Zeromq => "zeromq",
            Transport::Nanomsg => "nanomsg",
            Transport::Shmem => "shmem",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    #[default]
    Tcp,
    Ipc,
}

// ── Endpoints ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u64,
        transport: Transport,
    },
    Ipc {
        path: String,
        transport: Transport,
    },
}

impl Endpoint {
    /// A TCP endpoint bound on all interfaces.
    pub fn bound_tcp(port: u64, transport: Transport) -> Self {
        Endpoint::Tcp {
            host: "*".to_string(),
            port,
            transport,
        }
    }

    /// A fresh IPC endpoint under `dir` with a generated socket name.
    pub fn bound_ipc(dir: &str, transport: Transport) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Endpoint::Ipc {
            path: format!("{}/o2ipc-{}", dir.trim_end_matches('/'), id),
            transport,
        }
    }

    pub fn address(&self) -> String {
        match self {
            Endpoint::Tcp { host, port, .. } if host.is_empty() || host == "*" => {
                format!("tcp://*:{port}")
            }
            Endpoint::Tcp { host, port, .. } => format!("tcp://{host}:{port}"),
            Endpoint::Ipc { path, .. } => format!("ipc://{path}"),
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Endpoint::Tcp { transport, .. } | Endpoint::Ipc { transport, .. } => *transport,
        }
    }

    pub fn port(&self) -> Option<u64> {
        match self {
            Endpoint::Tcp { port, .. } => Some(*port),
            Endpoint::Ipc { .. } => None,
        }
    }

    /// The endpoint as a peer on another machine must address it.
    pub fn to_target(&self, task_hostname: &str) -> Endpoint {
        match self {
            Endpoint::Tcp { port, transport, .. } => Endpoint::Tcp {
                host: task_hostname.to_string(),
                port: *port,
                transport: *transport,
            },
            ipc => ipc.clone(),
        }
    }

    /// The endpoint as the owning task binds it.
    pub fn to_bound(&self) -> Endpoint {
        match self {
            Endpoint::Tcp { port, transport, .. } => Endpoint::bound_tcp(*port, *transport),
            ipc => ipc.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Channel path → endpoint.
pub type BindMap = HashMap<String, Endpoint>;

/// Key under which an inbound channel of the role at `role_path` is
/// published in the global bind map.
pub fn bind_map_key(role_path: &str, channel: &str) -> String {
    format!("{role_path}{TARGET_SEPARATOR}{channel}")
}

/// Key of a global alias in the bind map.
pub fn global_key(alias: &str) -> String {
    format!("{GLOBAL_PREFIX}{alias}")
}

// ── Channel specs ──────────────────────────────────────────────────

fn default_buf_size() -> u32 {
    1000
}

fn default_rate_logging() -> String {
    "0".to_string()
}

/// Fields shared by both channel directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default = "default_buf_size")]
    pub snd_buf_size: u32,
    #[serde(default = "default_buf_size")]
    pub rcv_buf_size: u32,
    #[serde(default = "default_rate_logging")]
    pub rate_logging: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, kind: ChannelType) -> Self {
        Self {
            name: name.into(),
            kind,
            snd_buf_size: default_buf_size(),
            rcv_buf_size: default_buf_size(),
            rate_logging: default_rate_logging(),
            transport: Transport::default(),
            target: String::new(),
        }
    }

    fn has_explicit_address(&self) -> bool {
        self.target.starts_with("tcp://") || self.target.starts_with("ipc://")
    }

    fn build_fmq_map(&self, address: &str, transport: Transport, method: &str) -> PropertyMap {
        let mut pm = PropertyMap::new();
        pm.insert(format!("chans.{}.numSockets", self.name), "1".to_string());
        let prefix = format!("chans.{}.0", self.name);
        let mut put = |k: &str, v: String| {
            pm.insert(format!("{prefix}.{k}"), v);
        };
        put("address", address.to_string());
        put("method", method.to_string());
        if method == "bind" {
            put("autoBind", "0".to_string());
        }
        put("rateLogging", self.rate_logging.clone());
        put("rcvBufSize", self.rcv_buf_size.to_string());
        put("rcvKernelSize", "0".to_string());
        put("sndBufSize", self.snd_buf_size.to_string());
        put("sndKernelSize", "0".to_string());
        put("transport", transport.to_string());
        put("type", self.kind.to_string());
        pm
    }
}

/// A channel the task binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(flatten)]
    pub spec: ChannelSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub global: String,
    #[serde(default)]
    pub addressing: Addressing,
}

impl Inbound {
    pub fn new(name: impl Into<String>, kind: ChannelType) -> Self {
        Self {
            spec: ChannelSpec::new(name, kind),
            global: String::new(),
            addressing: Addressing::Tcp,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Whether deployment must allocate an endpoint for this channel.
    pub fn needs_endpoint(&self) -> bool {
        self.spec.target.is_empty()
    }

    /// Whether this channel consumes one dynamic TCP port.
    pub fn needs_dynamic_port(&self) -> bool {
        self.needs_endpoint() && self.addressing == Addressing::Tcp
    }

    /// FairMQ channel properties, resolved against the task's local bind map.
    pub fn to_fmq_map(&self, local: &BindMap) -> CoreResult<PropertyMap> {
        let (address, transport) = if self.spec.has_explicit_address() {
            (self.spec.target.clone(), self.spec.transport)
        } else if !self.spec.target.is_empty() {
            return Err(CoreError::UnresolvedChannel(format!(
                "inbound channel {} has invalid target {}",
                self.spec.name, self.spec.target
            )));
        } else {
            let endpoint = local.get(&self.spec.name).ok_or_else(|| {
                CoreError::UnresolvedChannel(format!(
                    "no endpoint bound for inbound channel {}",
                    self.spec.name
                ))
            })?;
            (endpoint.to_bound().address(), endpoint.transport())
        };
        Ok(self.spec.build_fmq_map(&address, transport, "bind"))
    }
}

/// A channel the task connects to a peer's inbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(flatten)]
    pub spec: ChannelSpec,
}

impl Outbound {
    pub fn new(name: impl Into<String>, kind: ChannelType, target: impl Into<String>) -> Self {
        let mut spec = ChannelSpec::new(name, kind);
        spec.target = target.into();
        Self { spec }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// FairMQ channel properties, resolved against the environment-wide
    /// bind map. The target is either an explicit address, a bind-map key,
    /// or a global alias.
    pub fn to_fmq_map(&self, global: &BindMap) -> CoreResult<PropertyMap> {
        let (address, transport) = if self.spec.has_explicit_address() {
            (self.spec.target.clone(), self.spec.transport)
        } else {
            let endpoint = global
                .get(&self.spec.target)
                .or_else(|| global.get(&global_key(&self.spec.target)))
                .ok_or_else(|| {
                    CoreError::UnresolvedChannel(format!(
                        "could not match target {} for outbound channel {}",
                        self.spec.target, self.spec.name
                    ))
                })?;
            (endpoint.address(), endpoint.transport())
        };

        if transport != self.spec.transport && self.spec.transport != Transport::Default {
            warn!(
                outbound = %self.spec.name,
                %address,
                inbound_transport = %transport,
                outbound_transport = %self.spec.transport,
                "channel transport mismatch"
            );
        }
        Ok(self.spec.build_fmq_map(&address, transport, "connect"))
    }
}

/// Merge two inbound lists by name; entries in `high` win.
pub fn merge_inbound(high: &[Inbound], low: &[Inbound]) -> Vec<Inbound> {
    let mut out = high.to_vec();
    for ch in low {
        if !out.iter().any(|c| c.name() == ch.name()) {
            out.push(ch.clone());
        }
    }
    out
}

/// Merge two outbound lists by name; entries in `high` win.
pub fn merge_outbound(high: &[Outbound], low: &[Outbound]) -> Vec<Outbound> {
    let mut out = high.to_vec();
    for ch in low {
        if !out.iter().any(|c| c.name() == ch.name()) {
            out.push(ch.clone());
        }
    }
    out
}
