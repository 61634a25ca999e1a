//! In-process cluster manager.
//!
//! Stands in for a real cluster manager in standalone mode and in tests.
//! Agents come from the `[[agents]]` config tables. Each agent has at most
//! one outstanding offer; accepting or declining it frees the agent to be
//! offered again. Launched tasks report `TASK_RUNNING` right away and
//! executors answer every command with success.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offergrid_control::CommandResponse;
use offergrid_control::command::CommandEnvelope;
use offergrid_core::config::AgentConfig;
use offergrid_core::constraint::MACHINE_ID_ATTRIBUTE;
use offergrid_core::{Attribute, Attributes, CoreResult, Ranges};
use offergrid_placement::{Offer, ResourceVector, TaskLaunch};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterEvent, ClusterManager, TaskState, TaskStatusUpdate};
use crate::error::{SchedulerError, SchedulerResult};

/// A call the local cluster received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Accept { offer_id: String, task_ids: Vec<String> },
    Decline(Vec<String>),
    Revive,
    Kill(String),
    Message { task_id: String, name: String },
}

struct LocalAgent {
    agent_id: String,
    hostname: String,
    attributes: Attributes,
    total: ResourceVector,
    executor_id: Option<String>,
    /// Task id → resources it holds.
    reserved: HashMap<String, ResourceVector>,
}

impl LocalAgent {
    fn available(&self) -> ResourceVector {
        let mut free = self.total.clone();
        for r in self.reserved.values() {
            free.subtract_scalars(r.cpus, r.mem);
            free.subtract_ports(&r.ports);
        }
        free
    }
}

#[derive(Default)]
struct Faults {
    /// Kills of these tasks fail.
    failing_kills: HashSet<String>,
    /// Commands to these tasks are answered with an error.
    failing_commands: HashSet<String>,
    /// Commands to these tasks are never answered.
    silent: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    agents: Vec<LocalAgent>,
    /// Offer id → agent index.
    outstanding: HashMap<String, usize>,
    /// Task id → agent index.
    tasks: HashMap<String, usize>,
    calls: Vec<ClusterCall>,
    faults: Faults,
}

pub struct LocalCluster {
    inner: Mutex<Inner>,
    events: mpsc::Sender<ClusterEvent>,
}

impl LocalCluster {
    pub fn new(agents: &[AgentConfig], events: mpsc::Sender<ClusterEvent>) -> CoreResult<Self> {
        let mut inner = Inner::default();
        for (i, a) in agents.iter().enumerate() {
            let mut attributes: Vec<Attribute> = a
                .attributes
                .iter()
                .map(|(k, v)| Attribute::new(k.clone(), v.clone()))
                .collect();
            if !a.attributes.contains_key(MACHINE_ID_ATTRIBUTE) {
                attributes.push(Attribute::new(MACHINE_ID_ATTRIBUTE, a.hostname.clone()));
            }
            inner.agents.push(LocalAgent {
                agent_id: format!("agent-{i}"),
                hostname: a.hostname.clone(),
                attributes: Attributes::new(attributes),
                total: ResourceVector::new(a.cpus, a.mem, Ranges::parse(&a.ports)?),
                executor_id: None,
                reserved: HashMap::new(),
            });
        }
        info!(agents = inner.agents.len(), "local cluster created");
        Ok(Self {
            inner: Mutex::new(inner),
            events,
        })
    }

    /// One offer per agent that has no outstanding offer and something
    /// left to give.
    pub async fn offers(&self) -> Vec<Offer> {
        let mut inner = self.inner.lock().await;
        let busy: HashSet<usize> = inner.outstanding.values().copied().collect();
        let mut offers = Vec::new();
        for (idx, agent) in inner.agents.iter().enumerate() {
            if busy.contains(&idx) {
                continue;
            }
            let free = agent.available();
            if free.cpus <= 0.0 && free.mem <= 0.0 {
                continue;
            }
            offers.push((
                idx,
                Offer {
                    id: format!("offer-{}", uuid::Uuid::new_v4()),
                    agent_id: agent.agent_id.clone(),
                    hostname: agent.hostname.clone(),
                    attributes: agent.attributes.clone(),
                    resources: free,
                    executor_ids: agent.executor_id.iter().cloned().collect(),
                },
            ));
        }
        for (idx, offer) in &offers {
            inner.outstanding.insert(offer.id.clone(), *idx);
        }
        offers.into_iter().map(|(_, o)| o).collect()
    }

    /// Push a fresh round of offers every `interval` until `shutdown` fires.
    pub async fn run_offers(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let offers = self.offers().await;
                    if offers.is_empty() {
                        continue;
                    }
                    if self.events.send(ClusterEvent::Offers(offers)).await.is_err() {
                        debug!("offer receiver gone");
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Inject an event as if the cluster manager sent it.
    pub async fn push_event(&self, event: ClusterEvent) -> SchedulerResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| SchedulerError::Shutdown)
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn running_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn fail_kill(&self, task_id: &str) {
        self.inner.lock().await.faults.failing_kills.insert(task_id.to_string());
    }

    pub async fn fail_commands(&self, task_id: &str) {
        self.inner
            .lock()
            .await
            .faults
            .failing_commands
            .insert(task_id.to_string());
    }

    pub async fn silence(&self, task_id: &str) {
        self.inner.lock().await.faults.silent.insert(task_id.to_string());
    }

    async fn emit(&self, event: ClusterEvent) {
        if self.events.send(event).await.is_err() {
            warn!("cluster event receiver gone");
        }
    }
}

#[async_trait]
impl ClusterManager for LocalCluster {
    async fn accept(&self, offer_id: &str, launches: Vec<TaskLaunch>) -> SchedulerResult<()> {
        let mut updates = Vec::with_capacity(launches.len());
        {
            let mut inner = self.inner.lock().await;
            let idx = inner
                .outstanding
                .remove(offer_id)
                .ok_or_else(|| SchedulerError::Cluster(format!("unknown offer {offer_id}")))?;
            let task_ids = launches.iter().map(|l| l.task_id.clone()).collect();
            inner.calls.push(ClusterCall::Accept {
                offer_id: offer_id.to_string(),
                task_ids,
            });
            for launch in launches {
                let agent = &mut inner.agents[idx];
                agent.executor_id = Some(launch.executor_id.clone());
                agent.reserved.insert(
                    launch.task_id.clone(),
                    ResourceVector::new(launch.resources.cpus, launch.resources.mem, launch.resources.ports.clone()),
                );
                updates.push(TaskStatusUpdate::new(
                    launch.task_id.clone(),
                    agent.agent_id.clone(),
                    TaskState::Running,
                ));
                inner.tasks.insert(launch.task_id, idx);
            }
        }
        for update in updates {
            self.emit(ClusterEvent::Update(update)).await;
        }
        Ok(())
    }

    async fn decline(&self, offer_ids: &[String]) -> SchedulerResult<()> {
        let mut inner = self.inner.lock().await;
        for id in offer_ids {
            inner.outstanding.remove(id);
        }
        inner.calls.push(ClusterCall::Decline(offer_ids.to_vec()));
        Ok(())
    }

    async fn revive(&self) -> SchedulerResult<()> {
        self.inner.lock().await.calls.push(ClusterCall::Revive);
        Ok(())
    }

    async fn kill(&self, task_id: &str, agent_id: &str) -> SchedulerResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.calls.push(ClusterCall::Kill(task_id.to_string()));
            if inner.faults.failing_kills.contains(task_id) {
                return Err(SchedulerError::Cluster(format!("kill of {task_id} refused")));
            }
            if let Some(idx) = inner.tasks.remove(task_id) {
                inner.agents[idx].reserved.remove(task_id);
            }
        }
        self.emit(ClusterEvent::Update(TaskStatusUpdate::new(
            task_id,
            agent_id,
            TaskState::Killed,
        )))
        .await;
        Ok(())
    }

    async fn message(&self, agent_id: &str, executor_id: &str, data: Vec<u8>) -> SchedulerResult<()> {
        let envelope = CommandEnvelope::decode(&data)?;
        let mut replies = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            for target in &envelope.target_list {
                inner.calls.push(ClusterCall::Message {
                    task_id: target.task_id.clone(),
                    name: envelope.name.clone(),
                });
                if inner.faults.silent.contains(&target.task_id) {
                    continue;
                }
                let resp = if inner.faults.failing_commands.contains(&target.task_id) {
                    CommandResponse::failed(&envelope.name, &envelope.id, &target.task_id, "device refused")
                } else {
                    let ok = CommandResponse::ok(&envelope.name, &envelope.id, &target.task_id);
                    match envelope.destination {
                        Some(state) => ok.with_state(state),
                        None => ok,
                    }
                };
                replies.push(resp.encode()?);
            }
        }
        for data in replies {
            self.emit(ClusterEvent::Message {
                agent_id: agent_id.to_string(),
                executor_id: executor_id.to_string(),
                data,
            })
            .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn agent(host: &str) -> AgentConfig {
        AgentConfig {
            hostname: host.to_string(),
            cpus: 4.0,
            mem: 4096.0,
            ports: "9000-9010".to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn one_outstanding_offer_per_agent() {
        let (tx, _rx) = mpsc::channel(16);
        let cluster = LocalCluster::new(&[agent("flp01"), agent("flp02")], tx).unwrap();
        let offers = cluster.offers().await;
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].machine_id(), Some("flp01"));
        assert!(cluster.offers().await.is_empty());

        cluster.decline(&[offers[0].id.clone()]).await.unwrap();
        let again = cluster.offers().await;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].hostname, "flp01");
    }

    #[tokio::test]
    async fn unknown_offer_cannot_be_accepted() {
        let (tx, _rx) = mpsc::channel(16);
        let cluster = LocalCluster::new(&[agent("flp01")], tx).unwrap();
        let err = cluster.accept("offer-nope", Vec::new()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Cluster(_)));
    }

    #[tokio::test]
    async fn bad_port_expression_is_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let mut bad = agent("flp01");
        bad.ports = "9010-9000".to_string();
        assert!(LocalCluster::new(&[bad], tx).is_err());
    }
}
