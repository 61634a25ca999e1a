//! Scheduler: the event loop between the cluster manager and the task
//! manager.
//!
//! The `Scheduler`:
//! - Runs one offers round per batch of offers, matching it against the
//!   oldest pending deployment request
//! - ACCEPTs offers that received launches and DECLINEs all the others
//! - Routes status updates to kill acks and the task manager queue
//! - Routes executor replies to the servent and state changes to the
//!   task manager

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use offergrid_control::{CommandQueue, CommandTarget, Servent};
use offergrid_placement::{MatchOutcome, Matcher, MatcherConfig, Offer};
use offergrid_roster::Descriptor;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::acks::SafeAcks;
use crate::cluster::{ClusterEvent, ClusterManager};
use crate::context::SchedulerContext;
use crate::error::{SchedulerError, SchedulerResult};
use crate::hooks::{HookRegistry, RunHooks, TriggerHookTasks};
use crate::manager::{TaskManager, TaskmanHandle, TaskmanMessage};
use crate::metrics;
use crate::transport::{CommandTransport, ExecutorMessage};

/// Pending deployment requests beyond this are refused.
const REQUEST_QUEUE_CAPACITY: usize = 16;

/// A deployment waiting for the next offers round.
pub struct DeploymentRequest {
    pub env_id: String,
    pub descriptors: Vec<Descriptor>,
    pub reply: oneshot::Sender<MatchOutcome>,
}

/// Submits deployment requests to the offers loop and revives offers.
#[derive(Clone)]
pub struct Deployer {
    requests: mpsc::Sender<DeploymentRequest>,
    cluster: Arc<dyn ClusterManager>,
    revive: Arc<ReviveLimiter>,
    wait: Duration,
}

impl Deployer {
    pub fn new(
        requests: mpsc::Sender<DeploymentRequest>,
        cluster: Arc<dyn ClusterManager>,
        revive: ReviveLimiter,
        wait: Duration,
    ) -> Self {
        Self {
            requests,
            cluster,
            revive: Arc::new(revive),
            wait,
        }
    }

    /// Ask the cluster manager for offers again, unless rate limited.
    pub async fn revive(&self) {
        if !self.revive.try_acquire().await {
            debug!("revive skipped, rate limited");
            return;
        }
        if let Err(e) = self.cluster.revive().await {
            warn!(error = %e, "revive failed");
        }
    }

    /// Queue a request and wait for the round that serves it.
    pub async fn deploy(&self, env_id: &str, descriptors: Vec<Descriptor>) -> SchedulerResult<MatchOutcome> {
        let (reply, rx) = oneshot::channel();
        let request = DeploymentRequest {
            env_id: env_id.to_string(),
            descriptors,
            reply,
        };
        self.requests.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::Shutdown,
        })?;

        match tokio::time::timeout(self.wait, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(SchedulerError::Shutdown),
            Err(_) => Err(SchedulerError::Timeout(format!(
                "no offers round for environment {env_id} within {:?}",
                self.wait
            ))),
        }
    }
}

/// Token bucket: `capacity` tokens, one more every `refill`.
pub struct ReviveLimiter {
    capacity: u32,
    refill: Duration,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: u32,
    last: Instant,
}

impl ReviveLimiter {
    pub fn new(capacity: u32, refill: Duration) -> Self {
        Self {
            capacity,
            refill,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last: Instant::now(),
            }),
        }
    }

    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        if self.refill.is_zero() {
            bucket.tokens = self.capacity;
        } else {
            let earned = now.duration_since(bucket.last).as_nanos() / self.refill.as_nanos();
            if earned > 0 {
                let earned = u32::try_from(earned).unwrap_or(u32::MAX);
                bucket.tokens = bucket.tokens.saturating_add(earned).min(self.capacity);
                bucket.last = now;
            }
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

pub struct Scheduler {
    ctx: SchedulerContext,
    servent: Arc<Servent>,
    commands: CommandQueue,
    acks: Arc<SafeAcks>,
    matcher: Matcher,
    deployer: Deployer,
    requests: Mutex<mpsc::Receiver<DeploymentRequest>>,
    taskman: Arc<TaskManager>,
    handle: TaskmanHandle,
    hooks: Arc<RunHooks>,
}

impl Scheduler {
    /// Build the scheduler and start its command and task manager
    /// workers. Must be called from within a tokio runtime.
    pub fn new(ctx: SchedulerContext) -> Arc<Self> {
        let config = ctx.config.clone();
        let transport = Arc::new(CommandTransport::new(ctx.cluster.clone()));
        let servent = Arc::new(Servent::new(transport));
        let (commands, _worker) = CommandQueue::start(servent.clone(), config.command_queue_capacity);

        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let deployer = Deployer::new(
            request_tx,
            ctx.cluster.clone(),
            ReviveLimiter::new(config.revive_tokens, config.revive_refill()),
            config.offer_wait_timeout(),
        );

        let acks = Arc::new(SafeAcks::new());
        let taskman = Arc::new(TaskManager::new(
            ctx.clone(),
            deployer.clone(),
            commands.clone(),
            acks.clone(),
        ));
        let (handle, _taskman_worker) = TaskmanHandle::start(taskman.clone(), config.taskman_queue_capacity);

        let registry = HookRegistry::new();
        registry.register_all(Arc::new(TriggerHookTasks::new(taskman.clone())));
        let hooks = Arc::new(RunHooks::new(registry));

        let matcher = Matcher::new(ctx.classes.clone(), ctx.agents.clone(), MatcherConfig::from(config.as_ref()));

        info!(
            command_queue = config.command_queue_capacity,
            taskman_queue = config.taskman_queue_capacity,
            "scheduler created"
        );
        Arc::new(Self {
            ctx,
            servent,
            commands,
            acks,
            matcher,
            deployer,
            requests: Mutex::new(request_rx),
            taskman,
            handle,
            hooks,
        })
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub fn taskman(&self) -> &Arc<TaskManager> {
        &self.taskman
    }

    pub fn handle(&self) -> TaskmanHandle {
        self.handle.clone()
    }

    pub fn hooks(&self) -> &Arc<RunHooks> {
        &self.hooks
    }

    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Deploy `descriptors` in the next offers round.
    pub async fn deploy(&self, env_id: &str, descriptors: Vec<Descriptor>) -> SchedulerResult<MatchOutcome> {
        self.deployer.deploy(env_id, descriptors).await
    }

    /// Consume cluster events until the stream ends or `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ClusterEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        info!("cluster event stream closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        self.commands.stop();
        info!("scheduler stopped");
    }

    async fn dispatch(self: &Arc<Self>, event: ClusterEvent) {
        match event {
            ClusterEvent::Offers(offers) => {
                let this = self.clone();
                tokio::spawn(async move { this.offer_round(offers).await });
            }
            ClusterEvent::Update(update) => {
                if update.state.is_terminal() && self.acks.ack(&update.task_id).await {
                    debug!(task_id = %update.task_id, "kill acknowledged");
                }
                if let Err(e) = self.handle.send(TaskmanMessage::StatusUpdate(update)) {
                    error!(error = %e, "dropping status update");
                }
            }
            ClusterEvent::Message {
                agent_id,
                executor_id,
                data,
            } => self.handle_message(agent_id, executor_id, &data).await,
            ClusterEvent::Failure { agent_id, executor_id } => {
                warn!(%agent_id, executor_id = ?executor_id, "agent or executor failure");
                self.ctx.metrics.counter(metrics::CLUSTER_FAILURES, 1);
            }
        }
    }

    async fn handle_message(&self, agent_id: String, executor_id: String, data: &[u8]) {
        match ExecutorMessage::decode(data) {
            Ok(ExecutorMessage::Response(resp)) => {
                let target = CommandTarget::new(agent_id, executor_id, resp.task_id.clone());
                self.servent.process_response(resp, target).await;
            }
            Ok(ExecutorMessage::StateChanged(changed)) => {
                let msg = TaskmanMessage::StateUpdate {
                    task_id: changed.task_id,
                    state: changed.state,
                };
                if let Err(e) = self.handle.send(msg) {
                    error!(error = %e, "dropping task state update");
                }
            }
            Err(e) => warn!(%agent_id, %executor_id, error = %e, "undecodable executor message"),
        }
    }

    /// Match one batch of offers, then ACCEPT or DECLINE every one of them.
    async fn offer_round(&self, offers: Vec<Offer>) {
        let started = Instant::now();
        self.ctx.metrics.counter(metrics::OFFERS_RECEIVED, offers.len() as u64);

        let (mut outcome, reply) = match self.next_request().await {
            Some(DeploymentRequest {
                env_id,
                descriptors,
                reply,
            }) => {
                debug!(%env_id, descriptors = descriptors.len(), offers = offers.len(), "offers round");
                (self.matcher.match_offers(&env_id, descriptors, offers).await, Some(reply))
            }
            None => (MatchOutcome::decline_all(&offers), None),
        };

        let mut failed: HashSet<String> = HashSet::new();
        let mut launched = 0usize;
        for accept in std::mem::take(&mut outcome.accepts) {
            let task_ids: Vec<String> = accept.launches.iter().map(|l| l.task_id.clone()).collect();
            match self.ctx.cluster.accept(&accept.offer_id, accept.launches.clone()).await {
                Ok(()) => {
                    info!(offer_id = %accept.offer_id, hostname = %accept.hostname, tasks = task_ids.len(), "offer accepted");
                    launched += task_ids.len();
                    outcome.accepts.push(accept);
                }
                Err(e) => {
                    error!(offer_id = %accept.offer_id, error = %e, "accept failed");
                    failed.extend(task_ids);
                }
            }
        }
        if !failed.is_empty() {
            let (lost, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut outcome.deployed)
                .into_iter()
                .partition(|(task, _)| failed.contains(&task.task_id));
            outcome.deployed = kept;
            outcome.undeployed.extend(lost.into_iter().map(|(_, d)| d));
        }

        self.taskman
            .adopt_launched(outcome.deployed.iter().map(|(t, _)| t.clone()).collect())
            .await;

        if !outcome.declines.is_empty() {
            if let Err(e) = self.ctx.cluster.decline(&outcome.declines).await {
                warn!(offers = outcome.declines.len(), error = %e, "decline failed");
            }
        }

        let m = &self.ctx.metrics;
        m.counter(metrics::OFFERS_DECLINED, outcome.declines.len() as u64);
        m.counter(metrics::TASKS_LAUNCHED, launched as u64);
        m.histogram(metrics::LAUNCHES_PER_OFFER_CYCLE, launched as f64);
        m.histogram(metrics::OFFER_ROUND_SECONDS, started.elapsed().as_secs_f64());

        if let Some(reply) = reply {
            if reply.send(outcome).is_err() {
                warn!("deployment requester went away, launched tasks stay idle");
            }
        }
    }

    /// Oldest request whose requester is still waiting.
    async fn next_request(&self) -> Option<DeploymentRequest> {
        let mut requests = self.requests.lock().await;
        while let Ok(request) = requests.try_recv() {
            if request.reply.is_closed() {
                debug!(env_id = %request.env_id, "skipping abandoned deployment request");
                continue;
            }
            return Some(request);
        }
        None
    }
}
