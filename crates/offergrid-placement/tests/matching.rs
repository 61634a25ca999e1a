//! Matching rounds against in-memory class and agent caches.

use std::collections::HashSet;
use std::sync::Arc;

use offergrid_core::channel::{Addressing, ChannelType};
use offergrid_core::{Attribute, Attributes, Constraint, Constraints, ControlMode, Inbound, Ranges, TaskClass};
use offergrid_placement::{Matcher, MatcherConfig, Offer, ResourceVector};
use offergrid_roster::{AgentCache, ClassCache, Descriptor, RoleId};

fn offer(id: &str, host: &str, cpus: f64, mem: f64, ports: &str) -> Offer {
    Offer {
        id: id.to_string(),
        agent_id: format!("agent-{host}"),
        hostname: host.to_string(),
        attributes: Attributes(vec![Attribute::new("machine_id", host)]),
        resources: ResourceVector::new(cpus, mem, Ranges::parse(ports).unwrap()),
        executor_ids: vec![format!("exec-{host}")],
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
        vars: [("detector".to_string(), "TPC".to_string())].into_iter().collect(),
        role_bind: Vec::new(),
        has_trigger: false,
    }
}

fn class(name: &str, cpu: f64, mem: f64) -> TaskClass {
    let mut c = TaskClass::new("local", name);
    c.wants.cpu = Some(cpu);
    c.wants.memory = Some(mem);
    c.command.value = format!("/usr/bin/{name}");
    c
}

async fn matcher(classes: Vec<TaskClass>) -> (Matcher, Arc<AgentCache>) {
    let cache = Arc::new(ClassCache::new());
    for c in classes {
        cache.update_class(c).await;
    }
    let agents = Arc::new(AgentCache::new());
    (
        Matcher::new(cache, agents.clone(), MatcherConfig::default()),
        agents,
    )
}

#[tokio::test]
async fn single_offer_leaves_the_remainder() {
    let (m, agents) = matcher(vec![class("worker", 1.0, 512.0)]).await;
    let out = m
        .match_offers(
            "env-1",
            vec![descriptor(1, "worker")],
            vec![offer("o1", "hostA", 2.0, 1024.0, "47100-47110")],
        )
        .await;

    assert_eq!(out.deployed.len(), 1);
    assert!(out.is_complete());
    assert_eq!(out.accepts.len(), 1);
    assert!(out.declines.is_empty());
    let left = &out.remaining["o1"];
    assert_eq!(left.cpus, 1.0);
    assert_eq!(left.mem, 512.0);
    assert_eq!(left.ports.to_string(), "47100-47110");

    let (task, d) = &out.deployed[0];
    assert_eq!(d.role, RoleId(1));
    assert_eq!(task.hostname, "hostA");
    assert_eq!(task.executor_id, "exec-hostA");
    assert!(task.parent.is_none());
    assert_eq!(agents.get("agent-hostA").await.unwrap().hostname, "hostA");

    let launch = &out.accepts[0].launches[0];
    assert_eq!(launch.label("environment_id"), Some("env-1"));
    assert_eq!(launch.label("detector"), Some("TPC"));
    assert_eq!(launch.limits.cpu, None);
    let cmd = launch.command().unwrap();
    assert_eq!(cmd.value, "/usr/bin/worker");
    assert!(cmd.env.iter().any(|e| e == "OFFERGRID_HOST=hostA"));
}

#[tokio::test]
async fn pin_to_missing_host_is_undeployable() {
    let (m, _) = matcher(vec![class("worker", 1.0, 512.0)]).await;
    let mut d = descriptor(1, "worker");
    d.role_constraints = Constraints(vec![Constraint::equals("machine_id", "hostA")]);
    let out = m
        .match_offers("env-1", vec![d, descriptor(2, "worker")], vec![offer("o1", "hostB", 4.0, 4096.0, "9000-9010")])
        .await;

    assert_eq!(out.undeployable.len(), 1);
    assert_eq!(out.undeployable[0].role, RoleId(1));
    assert_eq!(out.undeployed.len(), 1);
    assert!(out.deployed.is_empty());
    assert_eq!(out.declines, vec!["o1".to_string()]);
    assert_eq!(out.remaining["o1"].cpus, 4.0);
}

#[tokio::test]
async fn pinned_descriptor_lands_on_its_host() {
    let (m, _) = matcher(vec![class("worker", 1.0, 100.0)]).await;
    let mut d = descriptor(1, "worker");
    d.role_constraints = Constraints(vec![Constraint::equals("machine_id", "hostB")]);
    let out = m
        .match_offers(
            "env-1",
            vec![d],
            vec![
                offer("o1", "hostA", 4.0, 4096.0, "9000-9010"),
                offer("o2", "hostB", 4.0, 4096.0, "9000-9010"),
            ],
        )
        .await;
    assert_eq!(out.deployed.len(), 1);
    assert_eq!(out.deployed[0].0.hostname, "hostB");
    assert_eq!(out.declines, vec!["o1".to_string()]);
}

#[tokio::test]
async fn pinned_descriptor_without_resources_is_undeployable() {
    let (m, _) = matcher(vec![class("big", 8.0, 100.0)]).await;
    let mut d = descriptor(1, "big");
    d.role_constraints = Constraints(vec![Constraint::equals("machine_id", "hostA")]);
    let out = m
        .match_offers("env-1", vec![d], vec![offer("o1", "hostA", 4.0, 4096.0, "9000")])
        .await;
    assert_eq!(out.undeployable.len(), 1);
    assert!(out.deployed.is_empty());
}

#[tokio::test]
async fn offers_are_never_overcommitted() {
    let (m, _) = matcher(vec![class("worker", 1.0, 100.0)]).await;
    let descriptors: Vec<Descriptor> = (1..=5).map(|i| descriptor(i, "worker")).collect();
    let offers = vec![
        offer("o1", "h1", 2.0, 1000.0, "9000-9010"),
        offer("o2", "h2", 1.0, 1000.0, "9000-9010"),
        offer("o3", "h3", 0.5, 1000.0, "9000-9010"),
    ];
    let out = m.match_offers("env-1", descriptors, offers).await;

    assert_eq!(out.deployed.len(), 3);
    assert_eq!(out.undeployed.len(), 2);
    assert_eq!(out.declines, vec!["o3".to_string()]);
    let roles: HashSet<RoleId> = out.deployed.iter().map(|(_, d)| d.role).collect();
    assert_eq!(roles.len(), 3);
    for left in out.remaining.values() {
        assert!(left.cpus >= 0.0);
    }
    assert_eq!(out.launched(), 3);
}

#[tokio::test]
async fn unknown_class_stays_pending() {
    let (m, _) = matcher(vec![]).await;
    let out = m
        .match_offers("env-1", vec![descriptor(1, "ghost")], vec![offer("o1", "h1", 4.0, 4096.0, "9000")])
        .await;
    assert_eq!(out.undeployed.len(), 1);
    assert!(out.undeployable.is_empty());
    assert_eq!(out.declines.len(), 1);
}

#[tokio::test]
async fn channels_and_control_port_are_allocated() {
    let mut c = class("fmq", 1.0, 100.0);
    c.control_mode = ControlMode::Fairmq;
    let mut data = Inbound::new("data", ChannelType::Push);
    data.global = "readout-out".to_string();
    let mut local = Inbound::new("local", ChannelType::Pull);
    local.addressing = Addressing::Ipc;
    c.bind = vec![data, Inbound::new("mon", ChannelType::Pub), local];
    c.wants.ports = Ranges::parse("100").unwrap();
    let (m, _) = matcher(vec![c]).await;

    let out = m
        .match_offers(
            "env-1",
            vec![descriptor(1, "fmq")],
            vec![offer("o1", "h1", 4.0, 4096.0, "100-200,9000-9010,30000-30005")],
        )
        .await;
    let (task, _) = &out.deployed[0];
    assert_eq!(task.control_port, Some(30000));
    assert_eq!(task.local_bind_map["data"].port(), Some(9000));
    assert_eq!(task.local_bind_map["mon"].port(), Some(9001));
    assert_eq!(task.local_bind_map["::readout-out"], task.local_bind_map["data"]);
    assert!(task.local_bind_map["local"].address().starts_with("ipc:///tmp/o2ipc-"));

    let launch = &out.accepts[0].launches[0];
    assert_eq!(launch.resources.ports.to_string(), "100,9000-9001,30000");
    let cmd = launch.command().unwrap();
    assert!(cmd.env.contains(&"OCC_CONTROL_PORT=30000".to_string()));
    assert!(cmd.arguments.ends_with(&["--control-port".to_string(), "30000".to_string()]));
    assert_eq!(
        out.remaining["o1"].ports.to_string(),
        "101-200,9002-9010,30001-30005"
    );
}
