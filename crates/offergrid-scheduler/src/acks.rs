//! One-shot acknowledgements keyed by task id.
//!
//! A killer registers the task id before asking the cluster manager to kill
//! it, then waits on the receiver. The status-update path acks the id when
//! the terminal update arrives.

use std::collections::HashMap;

use tokio::sync::{Mutex, oneshot};
use tracing::debug;

#[derive(Default)]
pub struct SafeAcks {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl SafeAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect an ack for `id`. A previous registration for the same id is
    /// replaced and its waiter sees the sender dropped.
    pub async fn register(&self, id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().await.insert(id.to_string(), tx).is_some() {
            debug!(%id, "ack registration replaced");
        }
        rx
    }

    /// Deliver the ack for `id`. Returns false when nobody was waiting.
    pub async fn ack(&self, id: &str) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }
}
