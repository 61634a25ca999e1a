//! The set of all known tasks, keyed by task id.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tokio::sync::RwLock;
use tracing::debug;

use crate::task::Task;

/// Every task the scheduler knows about, locked or idle.
///
/// All reads hand out owned snapshots, so callers never see a task
/// half-way through a mutation.
#[derive(Default)]
pub struct Roster {
    tasks: RwLock<HashMap<String, Task>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. A task with the same id is replaced, never duplicated.
    pub async fn append(&self, task: Task) {
        let mut tasks = self.tasks.write().await;
        if tasks.insert(task.task_id.clone(), task).is_some() {
            debug!("roster entry replaced");
        }
    }

    pub async fn append_all(&self, new_tasks: impl IntoIterator<Item = Task>) {
        let mut tasks = self.tasks.write().await;
        for task in new_tasks {
            tasks.insert(task.task_id.clone(), task);
        }
    }

    pub async fn remove(&self, task_id: &str) -> Option<Task> {
        self.tasks.write().await.remove(task_id)
    }

    /// Remove several tasks at once, returning those that were present.
    pub async fn remove_all(&self, task_ids: &[String]) -> Vec<Task> {
        let mut tasks = self.tasks.write().await;
        task_ids.iter().filter_map(|id| tasks.remove(id)).collect()
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.tasks.read().await.contains_key(task_id)
    }

    /// Snapshot of every task matching `pred`, ordered by task name.
    pub async fn filtered<F>(&self, pred: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks.values().filter(|t| pred(t)).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.filtered(|_| true).await
    }

    pub async fn grouped_by<K, F>(&self, key: F) -> HashMap<K, Vec<Task>>
    where
        K: Eq + Hash,
        F: Fn(&Task) -> K,
    {
        let tasks = self.tasks.read().await;
        let mut out: HashMap<K, Vec<Task>> = HashMap::new();
        for t in tasks.values() {
            out.entry(key(t)).or_default().push(t.clone());
        }
        out
    }

    /// Swap the whole content.
    pub async fn replace_all(&self, new_tasks: Vec<Task>) {
        let mut tasks = self.tasks.write().await;
        *tasks = new_tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), t))
            .collect();
    }

    /// Mutate one task in place under the write lock.
    pub async fn update<R, F>(&self, task_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut tasks = self.tasks.write().await;
        tasks.get_mut(task_id).map(f)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn contains_class(&self, class_name: &str) -> bool {
        self.tasks
            .read()
            .await
            .values()
            .any(|t| t.class_name() == class_name)
    }

    /// Names of every class some roster task was built from.
    pub async fn class_names(&self) -> HashSet<String> {
        self.tasks
            .read()
            .await
            .values()
            .map(|t| t.class_name().to_string())
            .collect()
    }
}
