//! Cache of parsed task classes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use offergrid_core::TaskClass;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::RosterResult;

struct CachedClass {
    class: Arc<TaskClass>,
    updated_at: Instant,
}

/// Task classes by name. Entries expire once no roster task uses them and
/// their TTL has run out.
#[derive(Default)]
pub struct ClassCache {
    classes: RwLock<HashMap<String, CachedClass>>,
}

impl ClassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a class, stamping it as fresh.
    pub async fn update_class(&self, class: TaskClass) -> Arc<TaskClass> {
        let class = Arc::new(class);
        let mut classes = self.classes.write().await;
        if let Some(old) = classes.get(class.name()) {
            if old.class.id.hash != class.id.hash {
                debug!(class = %class.id, "task class changed");
            }
        }
        classes.insert(
            class.name().to_string(),
            CachedClass {
                class: class.clone(),
                updated_at: Instant::now(),
            },
        );
        class
    }

    pub async fn get_class(&self, name: &str) -> Option<Arc<TaskClass>> {
        self.classes.read().await.get(name).map(|c| c.class.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.classes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.classes.read().await.is_empty()
    }

    /// Parse and cache every template under `dir`. Returns how many loaded.
    pub async fn load_dir(&self, repo: &str, dir: &Path) -> RosterResult<usize> {
        let parsed = offergrid_core::class::load_dir(repo, dir)?;
        let count = parsed.len();
        for class in parsed {
            self.update_class(class).await;
        }
        info!(repo, dir = %dir.display(), count, "task classes loaded");
        Ok(count)
    }

    /// Evict classes not in `in_use` whose last update is older than `ttl`.
    pub async fn remove_inactive(&self, in_use: &HashSet<String>, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut classes = self.classes.write().await;
        let expired: Vec<String> = classes
            .iter()
            .filter(|(name, c)| !in_use.contains(*name) && now.duration_since(c.updated_at) >= ttl)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            classes.remove(name);
            debug!(class = %name, "inactive task class evicted");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ttl_eviction_spares_classes_in_use() {
        let cache = ClassCache::new();
        cache.update_class(TaskClass::new("local", "used")).await;
        cache.update_class(TaskClass::new("local", "idle")).await;

        let in_use = HashSet::from(["used".to_string()]);
        let ttl = Duration::from_secs(60);
        assert!(cache.remove_inactive(&in_use, ttl).await.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let evicted = cache.remove_inactive(&in_use, ttl).await;
        assert_eq!(evicted, vec!["idle".to_string()]);
        assert!(cache.get_class("used").await.is_some());
        assert!(cache.get_class("idle").await.is_none());
    }

    #[tokio::test]
    async fn load_dir_populates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("qc.yaml"),
            "name: qc\ncommand:\n  value: qc.exe\nwants:\n  cpu: 1\n  memory: 128\n",
        )
        .unwrap();
        let cache = ClassCache::new();
        assert_eq!(cache.load_dir("local", dir.path()).await.unwrap(), 1);
        assert_eq!(cache.names().await, vec!["qc".to_string()]);
        assert_eq!(cache.get_class("qc").await.unwrap().wants.cpu, Some(1.0));
    }
}
