//! Bounded command queue with a single commit worker.
//!
//! `enqueue` never blocks: when the queue is full the command is refused
//! with [`ControlError::QueueFull`] and the caller decides what to do.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::error::{ControlError, ControlResult};
use crate::response::{CommandResponse, MultiResponse, Response};
use crate::servent::Servent;

/// Default queue capacity.
pub const QUEUE_CAPACITY: usize = 16384;

type Reply = oneshot::Sender<ControlResult<Response>>;

struct Entry {
    command: Command,
    reply: Reply,
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<Entry>,
    stop: Arc<watch::Sender<bool>>,
}

/// Consumer side of the queue. Exactly one exists per queue.
pub struct CommandQueueWorker {
    rx: mpsc::Receiver<Entry>,
    servent: Arc<Servent>,
    stop: watch::Receiver<bool>,
}

impl CommandQueue {
    /// Create a queue and its worker without starting the worker.
    pub fn new(servent: Arc<Servent>, capacity: usize) -> (Self, CommandQueueWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop_tx, stop) = watch::channel(false);
        (
            Self { tx, stop: Arc::new(stop_tx) },
            CommandQueueWorker { rx, servent, stop },
        )
    }

    /// Create a queue and spawn its worker.
    pub fn start(servent: Arc<Servent>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, worker) = Self::new(servent, capacity);
        let handle = tokio::spawn(worker.run());
        (queue, handle)
    }

    /// Queue `command` for commit. Returns the receiver its aggregated
    /// response will arrive on.
    pub fn enqueue(&self, command: Command) -> ControlResult<oneshot::Receiver<ControlResult<Response>>> {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(Entry { command, reply }) {
            Ok(()) => Ok(rx),
            Err(mpsc::error::TrySendError::Full(entry)) => {
                warn!(command = %entry.command.name, id = %entry.command.id, "command queue full");
                Err(ControlError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControlError::Shutdown),
        }
    }

    /// Enqueue and wait for the aggregated response.
    pub async fn submit(&self, command: Command) -> ControlResult<Response> {
        let id = command.id.clone();
        let rx = self.enqueue(command)?;
        rx.await.map_err(|_| ControlError::NoResponse(id))?
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Ask the worker to exit after the command it is committing.
    /// Commands still queued are dropped and their submitters see
    /// [`ControlError::NoResponse`].
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl CommandQueueWorker {
    /// Commit commands one at a time until every producer is gone or the
    /// queue is stopped.
    pub async fn run(mut self) {
        info!("command queue worker started");
        loop {
            let entry = tokio::select! {
                entry = self.rx.recv() => entry,
                _ = self.stop.changed() => None,
            };
            let Some(Entry { command, reply }) = entry else {
                break;
            };
            let result = commit(&self.servent, command).await;
            if reply.send(result).is_err() {
                debug!("command submitter went away before the response");
            }
        }
        self.rx.close();
        info!("command queue worker stopped");
    }
}

// ── Internal helpers ───────────────────────────────────────────────

/// Fan `command` out to every target and fold the replies into one.
async fn commit(servent: &Arc<Servent>, command: Command) -> ControlResult<Response> {
    if command.targets.is_empty() {
        return Err(ControlError::NoTargets(command.name));
    }
    debug!(command = %command.name, id = %command.id, targets = command.targets.len(), "committing command");

    let mut calls = JoinSet::new();
    let mut pending: BTreeSet<crate::command::CommandTarget> = command.targets.iter().cloned().collect();
    for target in &command.targets {
        let servent = servent.clone();
        let narrowed = command.single_target(target);
        let target = target.clone();
        calls.spawn(async move {
            let result = servent.run_command(&narrowed, &target).await;
            (target, result)
        });
    }

    let mut responses = BTreeMap::new();
    let mut failures = Vec::new();
    while let Some(joined) = calls.join_next().await {
        let (target, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(command = %command.name, error = %e, "command call task failed");
                continue;
            }
        };
        pending.remove(&target);
        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                failures.push(format!("[{}] {}", target.task_id, e));
                CommandResponse::failed(&command.name, &command.id, &target.task_id, e.to_string())
            }
        };
        responses.insert(target, response);
    }
    // Targets whose call task died without a result.
    for target in pending {
        let reason = "command call aborted";
        failures.push(format!("[{}] {}", target.task_id, reason));
        let response = CommandResponse::failed(&command.name, &command.id, &target.task_id, reason);
        responses.insert(target, response);
    }
    if !failures.is_empty() {
        warn!(command = %command.name, id = %command.id, errors = %failures.join("; "), "command failed for some targets");
    }

    consolidate(&command, responses)
}

fn consolidate(
    command: &Command,
    mut responses: BTreeMap<crate::command::CommandTarget, CommandResponse>,
) -> ControlResult<Response> {
    match responses.len() {
        0 => Err(ControlError::NoResponse(command.id.clone())),
        1 => {
            let Some((target, resp)) = responses.pop_first() else {
                return Err(ControlError::NoResponse(command.id.clone()));
            };
            Ok(Response::Single(target, resp))
        }
        _ => Ok(Response::Multi(MultiResponse {
            name: command.name.clone(),
            command_id: command.id.clone(),
            responses,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandTarget;
    use crate::servent::Transport;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _: &Command, _: &CommandTarget) -> ControlResult<()> {
            Ok(())
        }
    }

    struct PanickyTransport;

    #[async_trait]
    impl Transport for PanickyTransport {
        async fn send(&self, _: &Command, target: &CommandTarget) -> ControlResult<()> {
            if target.task_id == "t2" {
                panic!("transport blew up");
            }
            Ok(())
        }
    }

    fn servent() -> Arc<Servent> {
        Arc::new(Servent::new(Arc::new(NullTransport)))
    }

    #[tokio::test]
    async fn full_queue_refuses_without_blocking() {
        let (queue, _worker) = CommandQueue::new(servent(), 4);
        let target = CommandTarget::new("a", "e", "t");
        let mut receivers = Vec::new();
        for _ in 0..4 {
            receivers.push(queue.enqueue(Command::trigger_hook(vec![target.clone()])).unwrap());
        }
        assert_eq!(queue.remaining_capacity(), 0);
        let err = queue
            .enqueue(Command::trigger_hook(vec![target.clone()]))
            .unwrap_err();
        assert!(matches!(err, ControlError::QueueFull));
        assert_eq!(receivers.len(), 4);
    }

    #[tokio::test]
    async fn stopped_queue_refuses_new_commands() {
        let (queue, handle) = CommandQueue::start(servent(), 8);
        queue.stop();
        handle.await.unwrap();
        let target = CommandTarget::new("a", "e", "t");
        let err = queue.enqueue(Command::trigger_hook(vec![target])).unwrap_err();
        assert!(matches!(err, ControlError::Shutdown));
    }

    #[tokio::test]
    async fn empty_target_list_is_an_error() {
        let (queue, _handle) = CommandQueue::start(servent(), 8);
        let err = queue.submit(Command::trigger_hook(vec![])).await.unwrap_err();
        assert!(matches!(err, ControlError::NoTargets(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_fan_out_reports_every_target() {
        let (queue, _handle) = CommandQueue::start(servent(), 8);
        let targets = vec![
            CommandTarget::new("a", "e", "t1"),
            CommandTarget::new("b", "e", "t2"),
        ];
        let cmd = Command::trigger_hook(targets).with_timeout(Duration::from_secs(1));
        let resp = queue.submit(cmd).await.unwrap();
        let errors = resp.errors();
        assert_eq!(errors.len(), 2);
        assert!(resp.err().unwrap().contains("[t1]"));
        assert!(resp.err().unwrap().contains("[t2]"));
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_call_still_reports_its_target() {
        let (queue, _handle) = CommandQueue::start(Arc::new(Servent::new(Arc::new(PanickyTransport))), 8);
        let targets = vec![
            CommandTarget::new("a", "e", "t1"),
            CommandTarget::new("b", "e", "t2"),
        ];
        let cmd = Command::trigger_hook(targets).with_timeout(Duration::from_secs(1));
        let resp = queue.submit(cmd).await.unwrap();
        let errors = resp.errors();
        assert_eq!(errors.len(), 2);
        let crashed = errors
            .iter()
            .find(|(t, _)| t.task_id == "t2")
            .map(|(_, e)| e.clone())
            .unwrap();
        assert!(crashed.contains("aborted"));
    }
}
