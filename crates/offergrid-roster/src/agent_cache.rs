//! Last-seen attributes of every agent that sent us an offer.

use std::collections::HashMap;

use offergrid_core::Attributes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCacheInfo {
    pub agent_id: String,
    pub hostname: String,
    pub attributes: Attributes,
}

/// Refreshed on every offer, read when checking whether an idle task on
/// some agent can serve a new descriptor.
#[derive(Default)]
pub struct AgentCache {
    agents: RwLock<HashMap<String, AgentCacheInfo>>,
}

impl AgentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, info: AgentCacheInfo) {
        self.agents.write().await.insert(info.agent_id.clone(), info);
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentCacheInfo> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn remove(&self, agent_id: &str) -> Option<AgentCacheInfo> {
        self.agents.write().await.remove(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offergrid_core::Attribute;

    #[tokio::test]
    async fn update_overwrites() {
        let cache = AgentCache::new();
        cache
            .update(AgentCacheInfo {
                agent_id: "a1".into(),
                hostname: "flp01".into(),
                attributes: Attributes::default(),
            })
            .await;
        cache
            .update(AgentCacheInfo {
                agent_id: "a1".into(),
                hostname: "flp01".into(),
                attributes: Attributes(vec![Attribute::new("machine_id", "flp01")]),
            })
            .await;
        assert_eq!(cache.len().await, 1);
        let info = cache.get("a1").await.unwrap();
        assert_eq!(info.attributes.machine_id(), Some("flp01"));
        assert!(cache.get("a2").await.is_none());
    }
}
