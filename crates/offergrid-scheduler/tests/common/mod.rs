//! Shared fixture: a scheduler running against a local cluster.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use offergrid_core::config::AgentConfig;
use offergrid_core::{ControlMode, SchedulerConfig, Status, TaskClass};
use offergrid_roster::{Descriptor, RoleId, RoleSpec};
use offergrid_scheduler::{InMemoryMetrics, LocalCluster, Scheduler, SchedulerContext};
use tokio::sync::{mpsc, watch};

pub const ENV: &str = "env-1";

pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub cluster: Arc<LocalCluster>,
    pub metrics: Arc<InMemoryMetrics>,
    pub root: RoleId,
    shutdown: watch::Sender<bool>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn agent(hostname: &str) -> AgentConfig {
    AgentConfig {
        hostname: hostname.to_string(),
        cpus: 4.0,
        mem: 4096.0,
        ports: "9000-9100,30000-30100".to_string(),
        attributes: BTreeMap::new(),
    }
}

pub fn class(name: &str, cpu: f64, mode: ControlMode) -> TaskClass {
    let mut class = TaskClass::new("local", name);
    class.wants.cpu = Some(cpu);
    class.wants.memory = Some(256.0);
    class.control_mode = mode;
    class.command.value = format!("/usr/bin/{name}");
    class
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        offer_wait_timeout_secs: 5,
        kill_ack_timeout_secs: 5,
        revive_refill_secs: 0,
        ..SchedulerConfig::default()
    }
}

pub async fn harness(agents: &[AgentConfig], classes: Vec<TaskClass>, config: SchedulerConfig) -> Harness {
    let (tx, rx) = mpsc::channel(256);
    let cluster = Arc::new(LocalCluster::new(agents, tx).unwrap());
    let metrics = Arc::new(InMemoryMetrics::new());
    let ctx = SchedulerContext::new(config, cluster.clone()).with_metrics(metrics.clone());
    for c in classes {
        ctx.classes.update_class(c).await;
    }
    let root = ctx.roles.add_root(ENV, RoleSpec::new("root"));

    let scheduler = Scheduler::new(ctx);
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler.clone().run(rx, shutdown_rx.clone()));
    tokio::spawn(cluster.clone().run_offers(Duration::from_millis(10), shutdown_rx));

    Harness {
        scheduler,
        cluster,
        metrics,
        root,
        shutdown,
    }
}

impl Harness {
    /// Add a child role under the root and describe one task of `class`.
    pub fn role(&self, spec: RoleSpec, class: &str) -> Descriptor {
        let roles = &self.scheduler.context().roles;
        let id = roles.add_child(self.root, spec).unwrap();
        roles.descriptor(id, class).unwrap()
    }

    pub async fn wait_active(&self, task_ids: &[String]) {
        let roster = self.scheduler.context().roster.clone();
        let ids = task_ids.to_vec();
        eventually(move || {
            let roster = roster.clone();
            let ids = ids.clone();
            async move {
                for id in &ids {
                    if roster.get(id).await.map(|t| t.status) != Some(Status::Active) {
                        return false;
                    }
                }
                true
            }
        })
        .await;
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
