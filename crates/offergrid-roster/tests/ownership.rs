//! Ownership flows across the roster and the role arena.

use std::sync::Arc;

use offergrid_core::{State, Status, TaskClass};
use offergrid_roster::{RoleArena, RoleSpec, Roster, Task};

fn placed_task(class: &str, host: &str) -> Task {
    let mut t = Task::new(Arc::new(TaskClass::new("local", class)));
    t.hostname = host.to_string();
    t.agent_id = format!("agent-{host}");
    t.offer_id = "offer-1".to_string();
    t.executor_id = "exec-1".to_string();
    t.status = Status::Active;
    t
}

#[tokio::test]
async fn lock_then_release_makes_task_claimable_again() {
    let roster = Roster::new();
    let arena = RoleArena::new();
    let root = arena.add_root("env-1", RoleSpec::new("root"));
    let leaf = arena.add_child(root, RoleSpec::new("readout")).unwrap();

    let task = placed_task("readout", "flp01");
    let id = task.task_id.clone();
    roster.append(task).await;

    roster.update(&id, |t| t.lock(leaf, "env-1")).await.unwrap();
    arena.set_task(leaf, &id, State::Standby, Status::Active).unwrap();

    let locked = roster.filtered(|t| t.is_locked()).await;
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].env_id, "env-1");
    assert_eq!(arena.get(root).unwrap().status, Status::Active);

    roster.update(&id, Task::release).await.unwrap();
    arena.unset_task(leaf);
    let claimable = roster.filtered(Task::is_claimable).await;
    assert_eq!(claimable.len(), 1);
    assert!(arena.get(leaf).unwrap().task.is_none());
}

#[tokio::test]
async fn grouping_by_host_keeps_every_task_once() {
    let roster = Roster::new();
    roster
        .append_all(vec![
            placed_task("a", "flp01"),
            placed_task("b", "flp01"),
            placed_task("a", "flp02"),
        ])
        .await;
    let by_host = roster.grouped_by(|t| t.hostname.clone()).await;
    assert_eq!(by_host["flp01"].len(), 2);
    assert_eq!(by_host["flp02"].len(), 1);
    let total: usize = by_host.values().map(Vec::len).sum();
    assert_eq!(total, roster.len().await);
}
