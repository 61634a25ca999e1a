//! Shared handles every scheduler component is built from.

use std::sync::Arc;

use offergrid_core::SchedulerConfig;
use offergrid_roster::{AgentCache, ClassCache, RoleArena, Roster};

use crate::cluster::ClusterManager;
use crate::metrics::{Metrics, NoopMetrics};

#[derive(Clone)]
pub struct SchedulerContext {
    pub config: Arc<SchedulerConfig>,
    pub metrics: Arc<dyn Metrics>,
    pub cluster: Arc<dyn ClusterManager>,
    pub agents: Arc<AgentCache>,
    pub classes: Arc<ClassCache>,
    pub roles: Arc<RoleArena>,
    pub roster: Arc<Roster>,
}

impl SchedulerContext {
    /// Fresh caches and roster, metrics discarded.
    pub fn new(config: SchedulerConfig, cluster: Arc<dyn ClusterManager>) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(NoopMetrics),
            cluster,
            agents: Arc::new(AgentCache::new()),
            classes: Arc::new(ClassCache::new()),
            roles: Arc::new(RoleArena::new()),
            roster: Arc::new(Roster::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_classes(mut self, classes: Arc<ClassCache>) -> Self {
        self.classes = classes;
        self
    }
}
