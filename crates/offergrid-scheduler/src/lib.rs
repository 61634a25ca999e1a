//! offergrid-scheduler — the offer loop and the task manager.
//!
//! Wires the lower crates into a running scheduler:
//!
//! - [`Scheduler`] consumes [`ClusterEvent`]s, runs one matching round per
//!   batch of offers and routes status updates and executor replies
//! - [`TaskManager`] acquires, configures, transitions, releases and kills
//!   tasks on behalf of environments
//! - [`RunHooks`] dispatches lifecycle hooks and guarantees end-of-run
//! - [`LocalCluster`] is an in-process [`ClusterManager`]
//!
//! # Architecture
//!
//! ```text
//! cluster ──ClusterEvent──▶ Scheduler::run
//!                             ├── Offers  ──▶ offer round ──▶ Matcher ──▶ accept / decline
//!                             ├── Update  ──▶ SafeAcks + TaskmanHandle
//!                             └── Message ──▶ Servent / TaskmanHandle
//! TaskManager::acquire_tasks ──▶ Deployer ──request──▶ next offer round ──outcome──▶ lock
//! TaskManager::configure_tasks ──▶ CommandQueue ──▶ CommandTransport ──▶ ClusterManager::message
//! ```
//!
//! Every component receives a [`SchedulerContext`] at construction.

pub mod acks;
pub mod cluster;
pub mod context;
pub mod error;
pub mod hooks;
pub mod local;
pub mod manager;
pub mod metrics;
pub mod scheduler;
pub mod transport;

pub use acks::SafeAcks;
pub use cluster::{ClusterEvent, ClusterManager, TaskState, TaskStatusUpdate};
pub use context::SchedulerContext;
pub use error::{DeploymentError, SchedulerError, SchedulerResult};
pub use hooks::{HookHandler, HookKind, HookOperation, HookRegistry, RunHooks};
pub use local::{ClusterCall, LocalCluster};
pub use manager::{KillReport, TaskManager, TaskmanHandle, TaskmanMessage};
pub use metrics::{InMemoryMetrics, Metrics, MetricsSnapshot, NoopMetrics};
pub use scheduler::{Deployer, DeploymentRequest, ReviveLimiter, Scheduler};
pub use transport::{CommandTransport, ExecutorMessage, TaskStateChanged};
