//! Environment lifecycle hooks.
//!
//! Handlers are registered per [`HookKind`] and invoked in registration
//! order by [`HookRegistry::dispatch`]. [`RunHooks`] adds the run
//! bookkeeping: once a run has started, its end-of-run hooks are owed and
//! will be dispatched exactly once, at the latest during cleanup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::manager::TaskManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PrepareForRun,
    StartOfRun,
    EndOfRun,
    Cleanup,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::PrepareForRun,
        HookKind::StartOfRun,
        HookKind::EndOfRun,
        HookKind::Cleanup,
    ];

    /// Trigger name a role uses to run its hook task at this point.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::PrepareForRun => "PREPARE_FOR_RUN",
            HookKind::StartOfRun => "START_OF_RUN",
            HookKind::EndOfRun => "END_OF_RUN",
            HookKind::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOperation {
    PrepareForRun { env_id: String, run_number: u64 },
    StartOfRun { env_id: String, run_number: u64 },
    EndOfRun { env_id: String, run_number: u64 },
    Cleanup { env_id: String },
}

impl HookOperation {
    pub fn kind(&self) -> HookKind {
        match self {
            HookOperation::PrepareForRun { .. } => HookKind::PrepareForRun,
            HookOperation::StartOfRun { .. } => HookKind::StartOfRun,
            HookOperation::EndOfRun { .. } => HookKind::EndOfRun,
            HookOperation::Cleanup { .. } => HookKind::Cleanup,
        }
    }

    pub fn env_id(&self) -> &str {
        match self {
            HookOperation::PrepareForRun { env_id, .. }
            | HookOperation::StartOfRun { env_id, .. }
            | HookOperation::EndOfRun { env_id, .. }
            | HookOperation::Cleanup { env_id } => env_id,
        }
    }
}

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, op: &HookOperation) -> SchedulerResult<()>;
}

#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookKind, Vec<Arc<dyn HookHandler>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: HookKind, handler: Arc<dyn HookHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub fn register_all(&self, handler: Arc<dyn HookHandler>) {
        for kind in HookKind::ALL {
            self.register(kind, handler.clone());
        }
    }

    /// Run every handler registered for the kind of `op`. All handlers run
    /// even when one fails; the failures are joined into one error.
    pub async fn dispatch(&self, op: &HookOperation) -> SchedulerResult<()> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op.kind())
            .cloned()
            .unwrap_or_default();
        debug!(kind = %op.kind(), env_id = %op.env_id(), handlers = handlers.len(), "dispatching hook");

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(e) = handler.handle(op).await {
                warn!(kind = %op.kind(), env_id = %op.env_id(), error = %e, "hook handler failed");
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Hook {
                kind: op.kind().to_string(),
                message: failures.join("; "),
            })
        }
    }
}

/// Per-environment run tracking on top of a [`HookRegistry`].
pub struct RunHooks {
    registry: HookRegistry,
    /// env id → run number whose end-of-run is still owed.
    owed: Mutex<HashMap<String, u64>>,
}

impl RunHooks {
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry,
            owed: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub async fn prepare_for_run(&self, env_id: &str, run_number: u64) -> SchedulerResult<()> {
        self.registry
            .dispatch(&HookOperation::PrepareForRun {
                env_id: env_id.to_string(),
                run_number,
            })
            .await
    }

    /// Start a run. The end-of-run hooks are owed from here on, whether or
    /// not the start-of-run hooks succeed. A run still owed for `env_id` is
    /// ended first.
    pub async fn start_of_run(&self, env_id: &str, run_number: u64) -> SchedulerResult<()> {
        if self.is_running(env_id).await {
            warn!(%env_id, run_number, "run started while the previous run is still owed, ending it");
            if let Err(e) = self.end_of_run(env_id).await {
                warn!(%env_id, error = %e, "end of previous run failed");
            }
        }
        self.owed.lock().await.insert(env_id.to_string(), run_number);
        info!(%env_id, run_number, "run started");
        self.registry
            .dispatch(&HookOperation::StartOfRun {
                env_id: env_id.to_string(),
                run_number,
            })
            .await
    }

    /// Dispatch the owed end-of-run of `env_id`. Returns `Ok(false)` when
    /// none was owed.
    pub async fn end_of_run(&self, env_id: &str) -> SchedulerResult<bool> {
        let Some(run_number) = self.owed.lock().await.remove(env_id) else {
            return Ok(false);
        };
        info!(%env_id, run_number, "run ended");
        self.registry
            .dispatch(&HookOperation::EndOfRun {
                env_id: env_id.to_string(),
                run_number,
            })
            .await?;
        Ok(true)
    }

    pub async fn is_running(&self, env_id: &str) -> bool {
        self.owed.lock().await.contains_key(env_id)
    }

    /// Tear down `env_id`: any owed end-of-run first, then the cleanup hooks.
    /// A failing end-of-run does not prevent cleanup.
    pub async fn cleanup(&self, env_id: &str) -> SchedulerResult<()> {
        let end = self.end_of_run(env_id).await;
        if let Err(e) = &end {
            warn!(%env_id, error = %e, "end of run failed during cleanup");
        }
        self.registry
            .dispatch(&HookOperation::Cleanup {
                env_id: env_id.to_string(),
            })
            .await?;
        end.map(|_| ())
    }
}

/// Triggers the hook tasks of roles whose trigger names the hook kind.
pub struct TriggerHookTasks {
    taskman: Arc<TaskManager>,
}

impl TriggerHookTasks {
    pub fn new(taskman: Arc<TaskManager>) -> Self {
        Self { taskman }
    }
}

#[async_trait]
impl HookHandler for TriggerHookTasks {
    async fn handle(&self, op: &HookOperation) -> SchedulerResult<()> {
        let roles = &self.taskman.context().roles;
        let trigger = op.kind().as_str();
        let task_ids: Vec<String> = self
            .taskman
            .env_tasks(op.env_id())
            .await
            .into_iter()
            .filter(|t| {
                t.parent
                    .and_then(|id| roles.get(id))
                    .is_some_and(|role| role.traits.trigger == trigger)
            })
            .map(|t| t.task_id)
            .collect();
        if task_ids.is_empty() {
            return Ok(());
        }
        self.taskman.trigger_hooks(&task_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<HookOperation>>,
        fail_on: Option<HookKind>,
    }

    #[async_trait]
    impl HookHandler for Recorder {
        async fn handle(&self, op: &HookOperation) -> SchedulerResult<()> {
            self.seen.lock().unwrap().push(op.clone());
            if self.fail_on == Some(op.kind()) {
                return Err(SchedulerError::Critical("hook refused".into()));
            }
            Ok(())
        }
    }

    fn run_hooks(recorder: Arc<Recorder>) -> RunHooks {
        let registry = HookRegistry::new();
        registry.register_all(recorder);
        RunHooks::new(registry)
    }

    fn kinds(recorder: &Recorder) -> Vec<HookKind> {
        recorder.seen.lock().unwrap().iter().map(HookOperation::kind).collect()
    }

    #[tokio::test]
    async fn end_of_run_runs_at_most_once() {
        let recorder = Arc::new(Recorder::default());
        let hooks = run_hooks(recorder.clone());
        hooks.start_of_run("env", 7).await.unwrap();
        assert!(hooks.is_running("env").await);
        assert!(hooks.end_of_run("env").await.unwrap());
        assert!(!hooks.end_of_run("env").await.unwrap());
        hooks.cleanup("env").await.unwrap();
        assert_eq!(
            kinds(&recorder),
            vec![HookKind::StartOfRun, HookKind::EndOfRun, HookKind::Cleanup]
        );
    }

    #[tokio::test]
    async fn cleanup_runs_owed_end_of_run_first() {
        let recorder = Arc::new(Recorder {
            fail_on: Some(HookKind::StartOfRun),
            ..Recorder::default()
        });
        let hooks = run_hooks(recorder.clone());
        assert!(hooks.start_of_run("env", 3).await.is_err());
        hooks.cleanup("env").await.unwrap();
        assert_eq!(
            kinds(&recorder),
            vec![HookKind::StartOfRun, HookKind::EndOfRun, HookKind::Cleanup]
        );
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            seen[1],
            HookOperation::EndOfRun {
                env_id: "env".into(),
                run_number: 3
            }
        );
    }

    #[tokio::test]
    async fn failing_end_of_run_still_cleans_up() {
        let recorder = Arc::new(Recorder {
            fail_on: Some(HookKind::EndOfRun),
            ..Recorder::default()
        });
        let hooks = run_hooks(recorder.clone());
        hooks.start_of_run("env", 1).await.unwrap();
        let err = hooks.cleanup("env").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Hook { .. }));
        assert_eq!(kinds(&recorder).last(), Some(&HookKind::Cleanup));
        assert!(!hooks.is_running("env").await);
    }

    #[tokio::test]
    async fn cleanup_without_run_skips_end_of_run() {
        let recorder = Arc::new(Recorder::default());
        let hooks = run_hooks(recorder.clone());
        hooks.prepare_for_run("env", 1).await.unwrap();
        hooks.cleanup("env").await.unwrap();
        assert_eq!(kinds(&recorder), vec![HookKind::PrepareForRun, HookKind::Cleanup]);
    }

    #[tokio::test]
    async fn restarting_a_run_ends_the_previous_one() {
        let recorder = Arc::new(Recorder::default());
        let hooks = run_hooks(recorder.clone());
        hooks.start_of_run("env", 1).await.unwrap();
        hooks.start_of_run("env", 2).await.unwrap();
        assert!(hooks.end_of_run("env").await.unwrap());

        let seen = recorder.seen.lock().unwrap();
        let ended: Vec<u64> = seen
            .iter()
            .filter_map(|op| match op {
                HookOperation::EndOfRun { run_number, .. } => Some(*run_number),
                _ => None,
            })
            .collect();
        assert_eq!(ended, vec![1, 2]);
        assert_eq!(seen[1].kind(), HookKind::EndOfRun);
    }
}
