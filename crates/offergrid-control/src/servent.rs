//! Call/response correlation over an at-most-once transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::command::{CallId, Command, CommandTarget};
use crate::error::{ControlError, ControlResult};
use crate::response::CommandResponse;

/// Delivers one command to one target. Delivery is fire-and-forget: a
/// successful send says nothing about whether the target will reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, command: &Command, target: &CommandTarget) -> ControlResult<()>;
}

/// Turns one-way sends into calls that wait for a correlated reply.
pub struct Servent {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<CallId, oneshot::Sender<CommandResponse>>>,
}

impl Servent {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send `command` to `target` and wait for its reply or the command's
    /// timeout, whichever comes first.
    pub async fn run_command(
        &self,
        command: &Command,
        target: &CommandTarget,
    ) -> ControlResult<CommandResponse> {
        let call_id = CallId {
            command_id: command.id.clone(),
            target: target.clone(),
        };
        let (tx, rx) = oneshot::channel();

        // Registered before sending so a fast reply cannot miss us.
        self.pending.lock().await.insert(call_id.clone(), tx);

        if let Err(e) = self.transport.send(command, target).await {
            self.pending.lock().await.remove(&call_id);
            warn!(command = %command.name, task_id = %target.task_id, error = %e, "command send failed");
            return Err(e);
        }

        match tokio::time::timeout(command.timeout, rx).await {
            Ok(Ok(response)) => {
                debug!(command = %command.name, task_id = %target.task_id, "command response received");
                Ok(response)
            }
            // Sender dropped without a reply, only possible if the entry was
            // replaced by a call reusing the same id.
            Ok(Err(_)) => Err(ControlError::NoResponse(command.id.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&call_id);
                warn!(command = %command.name, task_id = %target.task_id, timeout = ?command.timeout, "command timed out");
                Err(ControlError::Timeout {
                    name: command.name.clone(),
                    task_id: target.task_id.clone(),
                })
            }
        }
    }

    /// Hand a reply to the call waiting on it. Replies nobody waits for any
    /// more are logged and dropped.
    pub async fn process_response(&self, response: CommandResponse, target: CommandTarget) {
        let call_id = CallId {
            command_id: response.command_id.clone(),
            target,
        };
        let waiter = self.pending.lock().await.remove(&call_id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(command_id = %call_id.command_id, "caller went away before the reply");
                }
            }
            None => {
                warn!(
                    command_id = %call_id.command_id,
                    task_id = %call_id.target.task_id,
                    "no pending request found"
                );
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Silent(AtomicUsize);

    #[async_trait]
    impl Transport for Silent {
        async fn send(&self, _: &Command, _: &CommandTarget) -> ControlResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Transport for Broken {
        async fn send(&self, _: &Command, _: &CommandTarget) -> ControlResult<()> {
            Err(ControlError::Transport("agent unreachable".into()))
        }
    }

    fn target() -> CommandTarget {
        CommandTarget::new("agent", "exec", "task-1")
    }

    #[tokio::test]
    async fn send_error_deregisters() {
        let servent = Servent::new(Arc::new(Broken));
        let cmd = Command::trigger_hook(vec![target()]);
        let err = servent.run_command(&cmd, &target()).await.unwrap_err();
        assert!(matches!(err, ControlError::Transport(_)));
        assert_eq!(servent.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_not_before_deadline_then_late_reply_dropped() {
        let servent = Arc::new(Servent::new(Arc::new(Silent(AtomicUsize::new(0)))));
        let cmd = Command::trigger_hook(vec![target()]).with_timeout(Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        let err = servent.run_command(&cmd, &target()).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(matches!(err, ControlError::Timeout { .. }));
        assert_eq!(err.to_string(), "MesosCommand_TriggerHook timed out for task task-1");
        assert_eq!(servent.pending_count().await, 0);

        // late reply: must not panic, must not be delivered anywhere
        servent
            .process_response(CommandResponse::ok(&cmd.name, &cmd.id, "task-1"), target())
            .await;
        assert_eq!(servent.pending_count().await, 0);
    }

    #[tokio::test]
    async fn reply_is_delivered_to_its_call() {
        let servent = Arc::new(Servent::new(Arc::new(Silent(AtomicUsize::new(0)))));
        let cmd = Command::trigger_hook(vec![target()]);

        let waiter = {
            let servent = servent.clone();
            let cmd = cmd.clone();
            tokio::spawn(async move { servent.run_command(&cmd, &target()).await })
        };
        while servent.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        // a reply for another command id is not ours
        servent
            .process_response(CommandResponse::ok(&cmd.name, "other", "task-1"), target())
            .await;
        assert_eq!(servent.pending_count().await, 1);

        servent
            .process_response(CommandResponse::ok(&cmd.name, &cmd.id, "task-1"), target())
            .await;
        let resp = waiter.await.unwrap().unwrap();
        assert!(resp.is_ok());
        assert_eq!(servent.pending_count().await, 0);
    }
}
