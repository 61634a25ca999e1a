//! One offers round.
//!
//! Descriptors pinned to a machine are bound to that machine's offer up
//! front; a pin with no matching offer makes the whole round a no-op.
//! Every offer is then processed by its own tokio task. The pending lists
//! are shared between those tasks behind a single mutex, so a descriptor
//! is matched at most once. Each offer's remaining resources are owned by
//! the task processing it.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

use offergrid_core::channel::{Addressing, global_key};
use offergrid_core::{BindMap, Constraints, ControlMode, Endpoint, Range, Ranges, SchedulerConfig, TaskClass};
use offergrid_roster::{AgentCache, AgentCacheInfo, ClassCache, Descriptor, Task};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::error::{PlacementError, PlacementResult};
use crate::launch::{
    CONTROL_PORT_ARG, CONTROL_PORT_ENV, LABEL_DETECTOR, LABEL_ENVIRONMENT_ID, LaunchCommand,
    LaunchResources, TaskLaunch,
};
use crate::offer::{Offer, ResourceVector};
use crate::wants::{Limits, Wants};

/// Env vars set on every launched command unless the class sets them.
const ENV_HOSTNAME: &str = "OFFERGRID_HOST";
const ENV_ROLE_PATH: &str = "OFFERGRID_ROLE";

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub dynamic_port_floor: u64,
    pub control_port_floor: u64,
    pub ipc_dir: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            dynamic_port_floor: 9000,
            control_port_floor: 30000,
            ipc_dir: "/tmp".to_string(),
        }
    }
}

impl From<&SchedulerConfig> for MatcherConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            dynamic_port_floor: cfg.dynamic_port_floor,
            control_port_floor: cfg.control_port_floor,
            ipc_dir: cfg.ipc_dir.clone(),
        }
    }
}

/// Tasks to launch through a single ACCEPT of one offer.
#[derive(Debug, Clone)]
pub struct OfferLaunch {
    pub offer_id: String,
    pub hostname: String,
    pub launches: Vec<TaskLaunch>,
}

/// Result of one round. Every offer id of the batch appears exactly once,
/// either in `accepts` or in `declines`.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// New tasks, not yet locked nor in the roster.
    pub deployed: Vec<(Task, Descriptor)>,
    /// Not matched this round, may match later.
    pub undeployed: Vec<Descriptor>,
    /// Can never match.
    pub undeployable: Vec<Descriptor>,
    pub accepts: Vec<OfferLaunch>,
    pub declines: Vec<String>,
    /// Offer id → what is left of it.
    pub remaining: HashMap<String, ResourceVector>,
    pub machines_used: HashSet<String>,
}

impl MatchOutcome {
    pub fn launched(&self) -> usize {
        self.accepts.iter().map(|a| a.launches.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.undeployed.is_empty() && self.undeployable.is_empty()
    }

    /// Outcome of a round with nothing to deploy: every offer is declined.
    pub fn decline_all(offers: &[Offer]) -> Self {
        let mut outcome = Self::default();
        for offer in offers {
            outcome.declines.push(offer.id.clone());
            outcome.remaining.insert(offer.id.clone(), offer.resources.clone());
        }
        outcome
    }
}

/// Matches descriptors against offers.
pub struct Matcher {
    classes: Arc<ClassCache>,
    agents: Arc<AgentCache>,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(classes: Arc<ClassCache>, agents: Arc<AgentCache>, config: MatcherConfig) -> Self {
        Self {
            classes,
            agents,
            config,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Run one matching round for `env_id`.
    pub async fn match_offers(
        &self,
        env_id: &str,
        descriptors: Vec<Descriptor>,
        offers: Vec<Offer>,
    ) -> MatchOutcome {
        if descriptors.is_empty() {
            return MatchOutcome::decline_all(&offers);
        }

        let mut classes: HashMap<String, Arc<TaskClass>> = HashMap::new();
        for d in &descriptors {
            if classes.contains_key(&d.class_name) {
                continue;
            }
            match self.classes.get_class(&d.class_name).await {
                Some(class) => {
                    classes.insert(d.class_name.clone(), class);
                }
                None => warn!(%env_id, class = %d.class_name, "missing task class"),
            }
        }

        let candidates: Vec<Candidate> = descriptors
            .into_iter()
            .map(|descriptor| {
                let constraints =
                    descriptor.resolved_constraints(classes.get(&descriptor.class_name).map(Arc::as_ref));
                Candidate {
                    descriptor,
                    constraints,
                }
            })
            .collect();

        let mut pending = prematch(env_id, candidates, &offers);
        if !pending.undeployable.is_empty() {
            let mut outcome = MatchOutcome::decline_all(&offers);
            outcome.undeployable = mem::take(&mut pending.undeployable);
            outcome.undeployed = pending.into_undeployed();
            return outcome;
        }

        let round = Arc::new(Round {
            env_id: env_id.to_string(),
            pending: Mutex::new(pending),
            classes,
            config: self.config.clone(),
        });

        let mut unresolved: HashSet<String> = offers.iter().map(|o| o.id.clone()).collect();
        let mut outcome = MatchOutcome::default();
        let mut workers = JoinSet::new();
        for offer in offers {
            let round = round.clone();
            workers.spawn(async move { round.process_offer(offer).await });
        }

        while let Some(joined) = workers.join_next().await {
            let done = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(%env_id, error = %e, "offer worker failed");
                    continue;
                }
            };
            unresolved.remove(&done.offer_id);
            outcome.remaining.insert(done.offer_id.clone(), done.remaining);
            if done.launches.is_empty() {
                outcome.declines.push(done.offer_id);
                continue;
            }

            self.agents
                .update(AgentCacheInfo {
                    agent_id: done.agent.agent_id.clone(),
                    hostname: done.agent.hostname.clone(),
                    attributes: done.agent.attributes.clone(),
                })
                .await;
            outcome.machines_used.insert(done.agent.hostname.clone());
            outcome.deployed.extend(done.deployed);
            outcome.accepts.push(OfferLaunch {
                offer_id: done.offer_id,
                hostname: done.agent.hostname,
                launches: done.launches,
            });
        }
        // a panicked worker must not leave its offer hanging
        outcome.declines.extend(unresolved);
        outcome.declines.sort();
        outcome.accepts.sort_by(|a, b| a.offer_id.cmp(&b.offer_id));

        let mut pending = round.pending.lock().await;
        outcome.undeployable = mem::take(&mut pending.undeployable);
        outcome.undeployed = mem::take(&mut *pending).into_undeployed();

        debug!(
            %env_id,
            launched = outcome.launched(),
            undeployed = outcome.undeployed.len(),
            declined = outcome.declines.len(),
            "offers round matched"
        );
        outcome
    }
}

// ── Internal helpers ───────────────────────────────────────────────

struct Candidate {
    descriptor: Descriptor,
    constraints: Constraints,
}

#[derive(Default)]
struct Pending {
    general: Vec<Candidate>,
    /// Offer id → descriptors pinned to that offer's machine.
    prematched: HashMap<String, Vec<Candidate>>,
    undeployable: Vec<Descriptor>,
}

impl Pending {
    fn into_undeployed(self) -> Vec<Descriptor> {
        self.general
            .into_iter()
            .chain(self.prematched.into_values().flatten())
            .map(|c| c.descriptor)
            .collect()
    }
}

/// Split off host-pinned descriptors. Pins to a machine absent from the
/// batch are undeployable.
fn prematch(env_id: &str, candidates: Vec<Candidate>, offers: &[Offer]) -> Pending {
    let by_machine: HashMap<&str, &str> = offers
        .iter()
        .filter_map(|o| o.machine_id().map(|m| (m, o.id.as_str())))
        .collect();

    let mut pending = Pending::default();
    for c in candidates.into_iter().rev() {
        let Some(pin) = c.constraints.machine_id().map(str::to_string) else {
            pending.general.push(c);
            continue;
        };
        match by_machine.get(pin.as_str()) {
            Some(offer_id) => pending
                .prematched
                .entry(offer_id.to_string())
                .or_default()
                .push(c),
            None => {
                error!(
                    %env_id,
                    class = %c.descriptor.class_name,
                    host = %pin,
                    "no resource offer for required host, deployment will be aborted"
                );
                pending.undeployable.push(c.descriptor);
            }
        }
    }
    pending.general.reverse();
    pending
}

enum Miss {
    Constraints,
    UnknownClass,
    Resources,
    Allocation(PlacementError),
}

impl Miss {
    fn reason(&self) -> String {
        match self {
            Miss::Constraints => "constraints not satisfied".to_string(),
            Miss::UnknownClass => "unknown task class".to_string(),
            Miss::Resources => "insufficient resources".to_string(),
            Miss::Allocation(e) => e.to_string(),
        }
    }
}

struct AgentSeen {
    agent_id: String,
    hostname: String,
    attributes: offergrid_core::Attributes,
}

struct OfferDone {
    offer_id: String,
    agent: AgentSeen,
    launches: Vec<TaskLaunch>,
    deployed: Vec<(Task, Descriptor)>,
    remaining: ResourceVector,
}

struct Round {
    env_id: String,
    pending: Mutex<Pending>,
    classes: HashMap<String, Arc<TaskClass>>,
    config: MatcherConfig,
}

impl Round {
    async fn process_offer(&self, offer: Offer) -> OfferDone {
        let mut remaining = offer.resources.clone();
        let executor_id = executor_for(&offer);
        let mut launches = Vec::new();
        let mut deployed = Vec::new();

        {
            let mut pending = self.pending.lock().await;

            if let Some(mut pinned) = pending.prematched.remove(&offer.id) {
                while let Some(c) = pinned.pop() {
                    match self.try_place(&offer, &mut remaining, &c, &executor_id) {
                        Ok((task, launch)) => {
                            launches.push(launch);
                            deployed.push((task, c.descriptor));
                        }
                        Err(miss) => {
                            warn!(
                                env_id = %self.env_id,
                                class = %c.descriptor.class_name,
                                offer_host = %offer.hostname,
                                reason = %miss.reason(),
                                "pre-matched offer cannot host descriptor, descriptor undeployable"
                            );
                            pending.undeployable.push(c.descriptor);
                        }
                    }
                }
            }

            if pending.undeployable.is_empty() {
                let mut i = pending.general.len();
                while i > 0 {
                    i -= 1;
                    match self.try_place(&offer, &mut remaining, &pending.general[i], &executor_id) {
                        Ok((task, launch)) => {
                            let c = pending.general.remove(i);
                            launches.push(launch);
                            deployed.push((task, c.descriptor));
                        }
                        Err(Miss::Allocation(e)) => {
                            warn!(env_id = %self.env_id, offer_id = %offer.id, error = %e, "endpoint allocation failed");
                        }
                        Err(_) => {}
                    }
                }
            }
        }

        if !launches.is_empty() {
            debug!(
                env_id = %self.env_id,
                offer_id = %offer.id,
                host = %offer.hostname,
                tasks = launches.len(),
                "offer matched"
            );
        }

        OfferDone {
            offer_id: offer.id,
            agent: AgentSeen {
                agent_id: offer.agent_id,
                hostname: offer.hostname,
                attributes: offer.attributes,
            },
            launches,
            deployed,
            remaining,
        }
    }

    /// Place `c` on `offer` if it fits. Resources are only subtracted from
    /// `remaining` when the whole placement succeeds.
    fn try_place(
        &self,
        offer: &Offer,
        remaining: &mut ResourceVector,
        c: &Candidate,
        executor_id: &str,
    ) -> Result<(Task, TaskLaunch), Miss> {
        if !offer.attributes.satisfy(&c.constraints) {
            return Err(Miss::Constraints);
        }
        let class = self
            .classes
            .get(&c.descriptor.class_name)
            .ok_or(Miss::UnknownClass)?;
        let wants = Wants::for_descriptor(&c.descriptor, class);
        if !remaining.satisfies(&wants) {
            return Err(Miss::Resources);
        }

        let mut scratch = remaining.clone();
        let placed = self
            .build_task(offer, &c.descriptor, class, &wants, &mut scratch, executor_id)
            .map_err(Miss::Allocation)?;
        *remaining = scratch;
        Ok(placed)
    }

    fn build_task(
        &self,
        offer: &Offer,
        descriptor: &Descriptor,
        class: &Arc<TaskClass>,
        wants: &Wants,
        scratch: &mut ResourceVector,
        executor_id: &str,
    ) -> PlacementResult<(Task, TaskLaunch)> {
        scratch.subtract_scalars(wants.cpu, wants.memory);
        scratch.subtract_ports(&wants.static_ports);
        let mut used_ports = wants.static_ports.clone();

        let mut bind_map = BindMap::new();
        for ch in wants.inbound.iter().filter(|c| c.needs_endpoint()) {
            let endpoint = match ch.addressing {
                Addressing::Ipc => Endpoint::bound_ipc(&self.config.ipc_dir, ch.spec.transport),
                Addressing::Tcp => {
                    let port = take_port(offer, scratch, self.config.dynamic_port_floor)?;
                    used_ports = used_ports.union(&Ranges::new([Range::single(port)]));
                    Endpoint::bound_tcp(port, ch.spec.transport)
                }
            };
            if !ch.global.is_empty() {
                bind_map.insert(global_key(&ch.global), endpoint.clone());
            }
            bind_map.insert(ch.name().to_string(), endpoint);
        }

        let control_mode = Task::resolve_control_mode(class.control_mode, descriptor.has_trigger);
        let control_port = if control_mode.has_control_port() {
            let port = take_port(offer, scratch, self.config.control_port_floor)?;
            used_ports = used_ports.union(&Ranges::new([Range::single(port)]));
            Some(port)
        } else {
            None
        };

        let mut command = class.command.clone();
        if let Some(port) = control_port {
            command.env.push(format!("{CONTROL_PORT_ENV}={port}"));
            if control_mode == ControlMode::Fairmq {
                command.arguments.push(CONTROL_PORT_ARG.to_string());
                command.arguments.push(port.to_string());
            }
        }
        for (key, value) in [
            (ENV_HOSTNAME, offer.hostname.as_str()),
            (ENV_ROLE_PATH, descriptor.role_path.as_str()),
        ] {
            if !command.has_env(key) {
                command.env.push(format!("{key}={value}"));
            }
        }

        let mut task = Task::new(class.clone());
        task.hostname = offer.hostname.clone();
        task.agent_id = offer.agent_id.clone();
        task.offer_id = offer.id.clone();
        task.executor_id = executor_id.to_string();
        task.local_bind_map = bind_map.clone();
        task.control_mode = control_mode;
        task.control_port = control_port;
        task.command = command.clone();

        let data = serde_json::to_vec(&LaunchCommand {
            value: command.value,
            arguments: command.arguments,
            env: command.env,
            shell: command.shell,
            user: command.user,
            control_mode,
            control_port,
            bind_map,
        })?;

        let launch = TaskLaunch {
            task_id: task.task_id.clone(),
            name: task.name.clone(),
            agent_id: offer.agent_id.clone(),
            executor_id: executor_id.to_string(),
            resources: LaunchResources {
                cpus: wants.cpu,
                mem: wants.memory,
                ports: used_ports,
            },
            limits: Limits::for_class(class),
            labels: [
                (LABEL_ENVIRONMENT_ID.to_string(), self.env_id.clone()),
                (LABEL_DETECTOR.to_string(), descriptor.detector().to_string()),
            ]
            .into_iter()
            .collect(),
            data,
        };

        debug!(
            env_id = %self.env_id,
            task_id = %task.task_id,
            role = %descriptor.role_path,
            host = %offer.hostname,
            control_port = ?control_port,
            "task placed"
        );
        Ok((task, launch))
    }
}

fn take_port(offer: &Offer, scratch: &mut ResourceVector, floor: u64) -> PlacementResult<u64> {
    scratch.take_port(floor).ok_or_else(|| PlacementError::NoPort {
        offer_id: offer.id.clone(),
        floor,
    })
}

/// Reuse the agent's executor if there is one, otherwise a new id.
fn executor_for(offer: &Offer) -> String {
    match offer.executor_ids.as_slice() {
        [] => {
            let id = uuid::Uuid::new_v4().to_string();
            debug!(offer_host = %offer.hostname, executor_id = %id, "offer without executor, a new one will start");
            id
        }
        [only] => only.clone(),
        [first, ..] => {
            warn!(
                offer_host = %offer.hostname,
                executor_id = %first,
                executors = offer.executor_ids.len(),
                "offer with more than one executor, using the first"
            );
            first.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offergrid_core::{Attribute, Attributes, Constraint};
    use offergrid_roster::RoleId;

    fn offer(id: &str, host: &str, cpus: f64, mem: f64, ports: &str) -> Offer {
        Offer {
            id: id.to_string(),
            agent_id: format!("agent-{host}"),
            hostname: host.to_string(),
            attributes: Attributes(vec![Attribute::new("machine_id", host)]),
            resources: ResourceVector::new(cpus, mem, Ranges::parse(ports).unwrap()),
            executor_ids: Vec::new(),
        }
    }

    fn descriptor(role: u64, class: &str) -> Descriptor {
        Descriptor {
            role: RoleId(role),
            role_path: format!("root.r{role}"),
            env_id: "env-1".to_string(),
            class_name: class.to_string(),
            role_constraints: Constraints::default(),
            critical: true,
            vars: Default::default(),
            role_bind: Vec::new(),
            has_trigger: false,
        }
    }

    #[test]
    fn prematch_splits_pins() {
        let offers = vec![offer("o1", "hostA", 1.0, 1.0, "9000")];
        let mut pinned_a = descriptor(1, "x");
        pinned_a.role_constraints = Constraints(vec![Constraint::equals("machine_id", "hostA")]);
        let mut pinned_c = descriptor(2, "x");
        pinned_c.role_constraints = Constraints(vec![Constraint::equals("machine_id", "hostC")]);
        let free = descriptor(3, "x");

        let candidates = [pinned_a, pinned_c, free]
            .into_iter()
            .map(|d| Candidate {
                constraints: d.role_constraints.clone(),
                descriptor: d,
            })
            .collect();
        let pending = prematch("env-1", candidates, &offers);
        assert_eq!(pending.general.len(), 1);
        assert_eq!(pending.prematched["o1"].len(), 1);
        assert_eq!(pending.undeployable.len(), 1);
        assert_eq!(pending.undeployable[0].role, RoleId(2));
    }

    #[test]
    fn executor_reuse() {
        let mut o = offer("o1", "h", 1.0, 1.0, "9000");
        assert!(!executor_for(&o).is_empty());
        o.executor_ids = vec!["e1".into(), "e2".into()];
        assert_eq!(executor_for(&o), "e1");
    }
}
