//! Task manager.
//!
//! Owns the lifecycle of tasks after placement: acquiring tasks for an
//! environment (reusing idle ones first, deploying the rest), pushing
//! configuration and transitions through the command queue, releasing and
//! killing, and folding cluster status updates into the roster and roles.
//!
//! Lifecycle requests arrive on a bounded message queue
//! ([`TaskmanHandle`]) or as direct calls; status and state updates are
//! applied inline by the queue worker.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use offergrid_control::{Command, CommandQueue, CommandTarget, Response};
use offergrid_core::channel::{GLOBAL_PREFIX, PropertyMap, bind_map_key, merge_inbound, merge_outbound};
use offergrid_core::{BindMap, ControlMode, Event, State, Status};
use offergrid_roster::{Descriptor, RosterError, Task};
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::acks::SafeAcks;
use crate::cluster::{TaskState, TaskStatusUpdate};
use crate::context::SchedulerContext;
use crate::error::{DeploymentError, SchedulerError, SchedulerResult};
use crate::metrics;
use crate::scheduler::Deployer;

/// Outcome of a kill request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KillReport {
    /// Removed from the roster, either killed or already inactive.
    pub killed: Vec<String>,
    /// Kill not confirmed; still in the roster.
    pub running: Vec<String>,
    /// Task id → why its kill failed.
    pub failures: Vec<(String, String)>,
}

impl KillReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct TaskManager {
    ctx: SchedulerContext,
    deployer: Deployer,
    commands: CommandQueue,
    acks: Arc<SafeAcks>,
    /// Held by acquisitions and kill passes, so tasks claimed or launched
    /// for an acquisition cannot be killed before they are locked.
    ownership_lock: Mutex<()>,
    state_changed: Notify,
    /// RUNNING updates that arrived before their task was adopted.
    early_status: Mutex<HashMap<String, (Instant, TaskStatusUpdate)>>,
}

impl TaskManager {
    pub fn new(ctx: SchedulerContext, deployer: Deployer, commands: CommandQueue, acks: Arc<SafeAcks>) -> Self {
        Self {
            ctx,
            deployer,
            commands,
            acks,
            ownership_lock: Mutex::new(()),
            state_changed: Notify::new(),
            early_status: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.ctx.roster.get(task_id).await
    }

    /// Tasks locked to `env_id`.
    pub async fn env_tasks(&self, env_id: &str) -> Vec<Task> {
        self.ctx
            .roster
            .filtered(|t| t.is_locked() && t.env_id == env_id)
            .await
    }

    // ── Acquisition ────────────────────────────────────────────────

    /// Give every descriptor a task and lock it to its role.
    ///
    /// Idle tasks are claimed first when reuse is enabled. The rest are
    /// deployed over up to `deploy_max_attempts` offer rounds. When a
    /// critical role stays unsatisfied nothing is locked and a
    /// [`DeploymentError`] is returned; the tasks launched meanwhile stay
    /// in the roster as idle tasks.
    pub async fn acquire_tasks(&self, env_id: &str, descriptors: Vec<Descriptor>) -> SchedulerResult<Vec<String>> {
        let _guard = self.ownership_lock.lock().await;
        let requested = descriptors.len();

        let mut acquired: Vec<(String, Descriptor)> = Vec::new();
        let mut outstanding = if self.ctx.config.reuse_unlocked_tasks {
            self.claim_idle(descriptors, &mut acquired).await
        } else {
            descriptors
        };
        if !acquired.is_empty() {
            info!(%env_id, reused = acquired.len(), "claimed idle tasks");
        }

        let mut undeployable: Vec<Descriptor> = Vec::new();
        let mut attempt = 0;
        while !outstanding.is_empty() && attempt < self.ctx.config.deploy_max_attempts {
            attempt += 1;
            self.ctx.metrics.counter(metrics::DEPLOY_ATTEMPTS, 1);
            debug!(%env_id, attempt, outstanding = outstanding.len(), "deployment attempt");

            self.deployer.revive().await;
            match self.deployer.deploy(env_id, outstanding.clone()).await {
                Ok(outcome) => {
                    acquired.extend(outcome.deployed.into_iter().map(|(t, d)| (t.task_id, d)));
                    outstanding = outcome.undeployed;
                    undeployable.extend(outcome.undeployable);
                }
                Err(SchedulerError::Timeout(reason)) => {
                    warn!(%env_id, attempt, %reason, "deployment attempt timed out");
                }
                Err(e) => return Err(e),
            }
            if undeployable.iter().any(|d| d.critical) {
                break;
            }
        }

        for d in &undeployable {
            self.ctx.roles.update_status(d.role, Status::Undeployable);
        }

        let mut present = Vec::with_capacity(acquired.len());
        for (task_id, d) in acquired {
            if self.ctx.roster.contains(&task_id).await {
                present.push((task_id, d));
            } else {
                warn!(%env_id, %task_id, role = %d.role_path, "acquired task vanished before locking");
                outstanding.push(d);
            }
        }

        let shortfall = classify_shortfall(env_id, &outstanding, &undeployable);
        if shortfall.has_critical() {
            error!(%env_id, error = %shortfall, "deployment failed, leaving launched tasks idle");
            return Err(shortfall.into());
        }
        if !shortfall.is_empty() {
            warn!(%env_id, error = %shortfall, "non-critical roles left without tasks");
        }

        let mut locked = Vec::with_capacity(present.len());
        for (task_id, d) in present {
            let snapshot = self
                .ctx
                .roster
                .update(&task_id, |t| {
                    t.lock(d.role, env_id);
                    t.control_mode = Task::resolve_control_mode(t.class.control_mode, d.has_trigger);
                    (t.state, t.status)
                })
                .await;
            let Some((state, status)) = snapshot else {
                return Err(RosterError::TaskNotFound(task_id).into());
            };
            self.ctx.roles.set_task(d.role, &task_id, state, status)?;
            locked.push(task_id);
        }
        info!(%env_id, requested, locked = locked.len(), attempts = attempt, "tasks acquired");
        Ok(locked)
    }

    /// Move launched tasks into the roster, unlocked, applying any status
    /// update that raced ahead of them.
    pub async fn adopt_launched(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        let mut early = self.early_status.lock().await;
        let adopted: Vec<Task> = tasks
            .into_iter()
            .map(|mut t| {
                if let Some((_, update)) = early.remove(&t.task_id) {
                    debug!(task_id = %t.task_id, state = %update.state, "applying early status");
                    t.status = status_for(update.state).unwrap_or(t.status);
                }
                t
            })
            .collect();
        self.ctx.roster.append_all(adopted).await;
    }

    async fn claim_idle(&self, descriptors: Vec<Descriptor>, acquired: &mut Vec<(String, Descriptor)>) -> Vec<Descriptor> {
        let idle = self.ctx.roster.filtered(Task::is_claimable).await;
        if idle.is_empty() {
            return descriptors;
        }

        let mut claimed: HashSet<String> = HashSet::new();
        let mut rest = Vec::new();
        for d in descriptors {
            let class = self.ctx.classes.get_class(&d.class_name).await;
            let constraints = d.resolved_constraints(class.as_deref());

            let mut found = None;
            for t in idle.iter().filter(|t| t.class_name() == d.class_name) {
                if claimed.contains(&t.task_id) {
                    continue;
                }
                let Some(agent) = self.ctx.agents.get(&t.agent_id).await else {
                    continue;
                };
                if agent.attributes.satisfy(&constraints) {
                    found = Some(t.task_id.clone());
                    break;
                }
            }

            match found {
                Some(task_id) => {
                    debug!(%task_id, role = %d.role_path, "claiming idle task");
                    claimed.insert(task_id.clone());
                    acquired.push((task_id, d));
                }
                None => rest.push(d),
            }
        }
        rest
    }

    // ── Control commands ───────────────────────────────────────────

    /// Push configuration to `task_ids`, moving them STANDBY → CONFIGURED.
    pub async fn configure_tasks(&self, env_id: &str, task_ids: &[String]) -> SchedulerResult<()> {
        let tasks = self.locked_tasks(task_ids).await?;
        if tasks.is_empty() {
            return Ok(());
        }

        let global = self.global_bind_map(env_id).await;
        let mut target_args: HashMap<CommandTarget, PropertyMap> = HashMap::new();
        for t in &tasks {
            let role = t
                .parent
                .and_then(|id| self.ctx.roles.get(id))
                .ok_or_else(|| RosterError::TaskNotLocked(t.task_id.clone()))?;
            let bind = merge_inbound(&role.bind, &t.class.bind);
            let connect = merge_outbound(&role.connect, &t.class.connect);
            let pm = t.build_property_map(&bind, &connect, &global, &role.path)?;
            target_args.insert(t.command_target(), pm);
        }

        let targets = tasks.iter().map(Task::command_target).collect();
        let cmd = Command::transition(targets, State::Standby, Event::Configure, State::Configured, target_args)
            .with_timeout(self.ctx.config.configure_timeout())
            .with_env_id(env_id);
        info!(%env_id, tasks = tasks.len(), "configuring tasks");
        let resp = self.commands.submit(cmd).await?;
        self.apply_response(&resp, None).await;
        self.check_failures(&tasks, &resp)
    }

    pub async fn transition_tasks(
        &self,
        env_id: &str,
        task_ids: &[String],
        source: State,
        event: Event,
        destination: State,
        common_args: PropertyMap,
    ) -> SchedulerResult<()> {
        let tasks = self.locked_tasks(task_ids).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        let targets = tasks.iter().map(Task::command_target).collect();
        let mut cmd = Command::transition(targets, source, event, destination, HashMap::new())
            .with_timeout(self.ctx.config.default_command_timeout())
            .with_env_id(env_id);
        cmd.arguments = common_args;
        info!(%env_id, tasks = tasks.len(), event = %event.as_str(), "transitioning tasks");
        let resp = self.commands.submit(cmd).await?;
        self.apply_response(&resp, Some(destination)).await;
        self.check_failures(&tasks, &resp)
    }

    /// Fire the hook of every hook-mode task among `task_ids`.
    pub async fn trigger_hooks(&self, task_ids: &[String]) -> SchedulerResult<()> {
        let tasks: Vec<Task> = self
            .locked_tasks(task_ids)
            .await?
            .into_iter()
            .filter(|t| t.control_mode == ControlMode::Hook)
            .collect();
        if tasks.is_empty() {
            debug!("no hook tasks to trigger");
            return Ok(());
        }
        let targets = tasks.iter().map(Task::command_target).collect();
        let cmd = Command::trigger_hook(targets).with_timeout(self.ctx.config.default_command_timeout());
        let resp = self.commands.submit(cmd).await?;
        self.check_failures(&tasks, &resp)
    }

    // ── Release and kill ───────────────────────────────────────────

    /// Detach `task_ids` from `env_id`, leaving them idle.
    ///
    /// Every id is checked before anything is released; tasks already
    /// idle are skipped.
    pub async fn release_tasks(&self, env_id: &str, task_ids: &[String]) -> SchedulerResult<Vec<String>> {
        let mut to_release = Vec::new();
        for id in task_ids {
            let task = self
                .ctx
                .roster
                .get(id)
                .await
                .ok_or_else(|| RosterError::TaskNotFound(id.clone()))?;
            if !task.is_locked() {
                debug!(task_id = %id, "task already released");
                continue;
            }
            if task.env_id != env_id {
                return Err(RosterError::TaskLocked {
                    task_id: id.clone(),
                    env_id: task.env_id,
                }
                .into());
            }
            to_release.push(task);
        }

        let mut released = Vec::with_capacity(to_release.len());
        for task in to_release {
            self.ctx.roster.update(&task.task_id, Task::release).await;
            if let Some(role) = task.parent {
                self.ctx.roles.unset_task(role);
            }
            released.push(task.task_id);
        }
        info!(%env_id, released = released.len(), "tasks released");
        Ok(released)
    }

    /// Kill specific idle tasks. Fails without killing anything unless
    /// every id names an idle task.
    pub async fn kill_tasks(&self, task_ids: &[String]) -> SchedulerResult<KillReport> {
        let _guard = self.ownership_lock.lock().await;
        let wanted: BTreeSet<&String> = task_ids.iter().collect();
        let to_kill = self
            .ctx
            .roster
            .filtered(|t| !t.is_locked() && wanted.contains(&t.task_id))
            .await;
        if to_kill.len() < wanted.len() {
            let found: HashSet<&str> = to_kill.iter().map(|t| t.task_id.as_str()).collect();
            let missing: Vec<&str> = wanted
                .iter()
                .map(|id| id.as_str())
                .filter(|id| !found.contains(id))
                .collect();
            return Err(RosterError::TaskNotFound(missing.join(", ")).into());
        }
        self.do_kill(to_kill).await
    }

    /// Kill every idle task.
    pub async fn cleanup(&self) -> SchedulerResult<KillReport> {
        let _guard = self.ownership_lock.lock().await;
        let idle = self.ctx.roster.filtered(|t| !t.is_locked()).await;
        self.do_kill(idle).await
    }

    async fn do_kill(&self, tasks: Vec<Task>) -> SchedulerResult<KillReport> {
        let mut report = KillReport::default();
        let (active, inactive): (Vec<Task>, Vec<Task>) = tasks.into_iter().partition(|t| t.status == Status::Active);

        let inactive_ids: Vec<String> = inactive.into_iter().map(|t| t.task_id).collect();
        self.ctx.roster.remove_all(&inactive_ids).await;
        report.killed.extend(inactive_ids);

        let timeout = self.ctx.config.kill_ack_timeout();
        let mut kills = JoinSet::new();
        for task in active {
            let acks = self.acks.clone();
            let cluster = self.ctx.cluster.clone();
            kills.spawn(async move {
                let ack = acks.register(&task.task_id).await;
                if let Err(e) = cluster.kill(&task.task_id, &task.agent_id).await {
                    acks.remove(&task.task_id).await;
                    return (task.task_id, Err(e.to_string()));
                }
                let result = match tokio::time::timeout(timeout, ack).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err("kill acknowledgement dropped".to_string()),
                    Err(_) => {
                        acks.remove(&task.task_id).await;
                        Err(format!("no kill acknowledgement within {timeout:?}"))
                    }
                };
                (task.task_id, result)
            });
        }

        let mut killed = Vec::new();
        while let Some(joined) = kills.join_next().await {
            match joined {
                Ok((task_id, Ok(()))) => killed.push(task_id),
                Ok((task_id, Err(reason))) => {
                    error!(%task_id, %reason, "could not kill task");
                    report.running.push(task_id.clone());
                    report.failures.push((task_id, reason));
                }
                Err(e) => error!(error = %e, "kill task failed"),
            }
        }

        self.ctx.roster.remove_all(&killed).await;
        self.ctx.metrics.counter(metrics::TASKS_KILLED, killed.len() as u64);
        report.killed.extend(killed);
        report.killed.sort();
        report.running.sort();
        info!(killed = report.killed.len(), failed = report.failures.len(), "kill finished");
        Ok(report)
    }

    // ── Updates ────────────────────────────────────────────────────

    /// Fold a cluster status update into the roster.
    pub async fn update_task_status(&self, update: TaskStatusUpdate) {
        let task_id = update.task_id.clone();
        if update.state == TaskState::Finished {
            self.ctx.metrics.counter(metrics::TASKS_FINISHED, 1);
        }

        let mut early = self.early_status.lock().await;
        let Some(task) = self.ctx.roster.get(&task_id).await else {
            if update.reconciliation && is_killable(update.state) {
                drop(early);
                info!(%task_id, state = %update.state, "killing task reported by reconciliation");
                if let Err(e) = self.ctx.cluster.kill(&task_id, &update.agent_id).await {
                    warn!(%task_id, error = %e, "reconciliation kill failed");
                }
            } else if update.state == TaskState::Running {
                let now = Instant::now();
                prune_early(&mut early, now, self.ctx.config.offer_wait_timeout());
                early.insert(task_id, (now, update));
            } else {
                debug!(%task_id, state = %update.state, "status update for unknown task");
            }
            return;
        };
        drop(early);

        if update.state.is_failure() {
            info!(%task_id, state = %update.state, message = %update.message, "task inactive exception");
            if task.is_locked() {
                self.update_task_state(&task_id, State::Error).await;
            }
        }

        let Some(status) = status_for(update.state) else {
            return;
        };
        let parent = self
            .ctx
            .roster
            .update(&task_id, |t| {
                t.status = status;
                t.parent
            })
            .await
            .flatten();
        if let Some(role) = parent {
            self.ctx.roles.update_status(role, status);
        }
        debug!(%task_id, state = %update.state, ?status, "task status updated");
    }

    /// Record the control state a task reports and wake waiters.
    pub async fn update_task_state(&self, task_id: &str, state: State) {
        let parent = self
            .ctx
            .roster
            .update(task_id, |t| {
                t.state = state;
                t.safe_to_stop = false;
                t.parent
            })
            .await;
        match parent {
            None => warn!(%task_id, state = %state.as_str(), "state update for task not in roster"),
            Some(Some(role)) => self.ctx.roles.update_state(role, state),
            Some(None) => {}
        }
        self.state_changed.notify_waiters();
    }

    /// Wait until every task in `task_ids` reports `state`.
    pub async fn wait_for_state(&self, task_ids: &[String], state: State, timeout: Duration) -> SchedulerResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut reached = true;
            for id in task_ids {
                if self.ctx.roster.get(id).await.map(|t| t.state) != Some(state) {
                    reached = false;
                    break;
                }
            }
            if reached {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(SchedulerError::Timeout(format!(
                    "{} tasks did not reach {} within {timeout:?}",
                    task_ids.len(),
                    state.as_str()
                )));
            }
        }
    }

    /// Evict cached classes no task uses and that have not been refreshed
    /// within the class TTL.
    pub async fn refresh_classes(&self) -> Vec<String> {
        let in_use = self.ctx.roster.class_names().await;
        let evicted = self
            .ctx
            .classes
            .remove_inactive(&in_use, self.ctx.config.class_ttl())
            .await;
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "task classes evicted");
        }
        evicted
    }

    // ── Internal helpers ───────────────────────────────────────────

    async fn locked_tasks(&self, task_ids: &[String]) -> SchedulerResult<Vec<Task>> {
        let mut tasks = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            let task = self
                .ctx
                .roster
                .get(id)
                .await
                .ok_or_else(|| RosterError::TaskNotFound(id.clone()))?;
            if !task.is_locked() {
                return Err(RosterError::TaskNotLocked(id.clone()).into());
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Inbound endpoints of every task of `env_id`, as seen by peers.
    async fn global_bind_map(&self, env_id: &str) -> BindMap {
        let mut global = BindMap::new();
        for t in self.env_tasks(env_id).await {
            let Some(path) = t.parent.and_then(|id| self.ctx.roles.path(id)) else {
                continue;
            };
            for (name, endpoint) in &t.local_bind_map {
                let key = if name.starts_with(GLOBAL_PREFIX) {
                    name.clone()
                } else {
                    bind_map_key(&path, name)
                };
                global.insert(key, endpoint.to_target(&t.hostname));
            }
        }
        global
    }

    async fn apply_response(&self, resp: &Response, default_state: Option<State>) {
        for (target, r) in resp.responses() {
            let state = match (r.state, r.is_ok()) {
                (Some(state), _) => state,
                (None, true) => match default_state {
                    Some(state) => state,
                    None => continue,
                },
                (None, false) => continue,
            };
            self.update_task_state(&target.task_id, state).await;
        }
    }

    /// Critical failures fail the call; the others are only logged.
    fn check_failures(&self, tasks: &[Task], resp: &Response) -> SchedulerResult<()> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();
        let mut critical = Vec::new();
        for (target, err) in resp.errors() {
            let is_critical = by_id
                .get(target.task_id.as_str())
                .and_then(|t| t.parent)
                .is_none_or(|role| self.ctx.roles.is_critical(role));
            if is_critical {
                critical.push(format!("[{}] {}", target.task_id, err));
            } else {
                warn!(task_id = %target.task_id, error = %err, "non-critical task failed command");
            }
        }
        if critical.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Critical(critical.join("; ")))
        }
    }
}

fn status_for(state: TaskState) -> Option<Status> {
    match state {
        TaskState::Running => Some(Status::Active),
        TaskState::Dropped | TaskState::Lost | TaskState::Killed | TaskState::Failed | TaskState::Error => {
            Some(Status::Inactive)
        }
        _ => None,
    }
}

/// Drop early updates older than `ttl`; their tasks were never adopted.
fn prune_early(early: &mut HashMap<String, (Instant, TaskStatusUpdate)>, now: Instant, ttl: Duration) {
    early.retain(|task_id, (seen, _)| {
        let fresh = now.saturating_duration_since(*seen) <= ttl;
        if !fresh {
            debug!(%task_id, "dropping stale early status");
        }
        fresh
    });
}

fn is_killable(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Staging | TaskState::Starting | TaskState::Running | TaskState::Killing | TaskState::Unknown
    )
}

fn classify_shortfall(env_id: &str, undeployed: &[Descriptor], undeployable: &[Descriptor]) -> DeploymentError {
    let mut err = DeploymentError {
        env_id: env_id.to_string(),
        ..DeploymentError::default()
    };
    for d in undeployed {
        let list = if d.critical {
            &mut err.critical_undeployed
        } else {
            &mut err.noncritical_undeployed
        };
        list.push(d.role_path.clone());
    }
    for d in undeployable {
        let list = if d.critical {
            &mut err.critical_undeployable
        } else {
            &mut err.noncritical_undeployable
        };
        list.push(d.role_path.clone());
    }
    err
}

// ── Message queue ──────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<SchedulerResult<T>>;

pub enum TaskmanMessage {
    Acquire {
        env_id: String,
        descriptors: Vec<Descriptor>,
        reply: Reply<Vec<String>>,
    },
    Configure {
        env_id: String,
        task_ids: Vec<String>,
        reply: Reply<()>,
    },
    Transition {
        env_id: String,
        task_ids: Vec<String>,
        source: State,
        event: Event,
        destination: State,
        arguments: PropertyMap,
        reply: Reply<()>,
    },
    Release {
        env_id: String,
        task_ids: Vec<String>,
        reply: Reply<Vec<String>>,
    },
    StatusUpdate(TaskStatusUpdate),
    StateUpdate {
        task_id: String,
        state: State,
    },
}

/// Producer side of the task manager queue.
#[derive(Clone)]
pub struct TaskmanHandle {
    tx: mpsc::Sender<TaskmanMessage>,
}

impl TaskmanHandle {
    /// Start the queue worker for `taskman`.
    pub fn start(taskman: Arc<TaskManager>, capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(taskman, rx));
        (Self { tx }, handle)
    }

    /// Queue `msg` without blocking.
    pub fn send(&self, msg: TaskmanMessage) -> SchedulerResult<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::Shutdown,
        })
    }

    pub async fn acquire(&self, env_id: &str, descriptors: Vec<Descriptor>) -> SchedulerResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(TaskmanMessage::Acquire {
            env_id: env_id.to_string(),
            descriptors,
            reply,
        })?;
        rx.await.map_err(|_| SchedulerError::Shutdown)?
    }

    pub async fn configure(&self, env_id: &str, task_ids: Vec<String>) -> SchedulerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TaskmanMessage::Configure {
            env_id: env_id.to_string(),
            task_ids,
            reply,
        })?;
        rx.await.map_err(|_| SchedulerError::Shutdown)?
    }

    pub async fn transition(
        &self,
        env_id: &str,
        task_ids: Vec<String>,
        source: State,
        event: Event,
        destination: State,
        arguments: PropertyMap,
    ) -> SchedulerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TaskmanMessage::Transition {
            env_id: env_id.to_string(),
            task_ids,
            source,
            event,
            destination,
            arguments,
            reply,
        })?;
        rx.await.map_err(|_| SchedulerError::Shutdown)?
    }

    pub async fn release(&self, env_id: &str, task_ids: Vec<String>) -> SchedulerResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(TaskmanMessage::Release {
            env_id: env_id.to_string(),
            task_ids,
            reply,
        })?;
        rx.await.map_err(|_| SchedulerError::Shutdown)?
    }
}

async fn run_worker(taskman: Arc<TaskManager>, mut rx: mpsc::Receiver<TaskmanMessage>) {
    info!("task manager worker started");
    while let Some(msg) = rx.recv().await {
        match msg {
            TaskmanMessage::StatusUpdate(update) => taskman.update_task_status(update).await,
            TaskmanMessage::StateUpdate { task_id, state } => taskman.update_task_state(&task_id, state).await,
            lifecycle => {
                let taskman = taskman.clone();
                tokio::spawn(async move { handle_lifecycle(&taskman, lifecycle).await });
            }
        }
    }
    info!("task manager worker stopped");
}

async fn handle_lifecycle(taskman: &TaskManager, msg: TaskmanMessage) {
    let delivered = match msg {
        TaskmanMessage::Acquire {
            env_id,
            descriptors,
            reply,
        } => reply.send(taskman.acquire_tasks(&env_id, descriptors).await).is_ok(),
        TaskmanMessage::Configure { env_id, task_ids, reply } => {
            reply.send(taskman.configure_tasks(&env_id, &task_ids).await).is_ok()
        }
        TaskmanMessage::Transition {
            env_id,
            task_ids,
            source,
            event,
            destination,
            arguments,
            reply,
        } => reply
            .send(
                taskman
                    .transition_tasks(&env_id, &task_ids, source, event, destination, arguments)
                    .await,
            )
            .is_ok(),
        TaskmanMessage::Release { env_id, task_ids, reply } => {
            reply.send(taskman.release_tasks(&env_id, &task_ids).await).is_ok()
        }
        TaskmanMessage::StatusUpdate(update) => {
            taskman.update_task_status(update).await;
            true
        }
        TaskmanMessage::StateUpdate { task_id, state } => {
            taskman.update_task_state(&task_id, state).await;
            true
        }
    };
    if !delivered {
        debug!("task manager requester went away");
    }
}
