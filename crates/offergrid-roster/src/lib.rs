//! offergrid-roster — the authoritative record of deployed tasks.
//!
//! Holds every known [`Task`] (locked to an environment or idle), the role
//! arena tasks point back into, and the read-through caches consulted while
//! matching: agent attributes and task classes.
//!
//! # Architecture
//!
//! ```text
//! Roster       RwLock<task id → Task>        (tokio)
//! RoleArena    RwLock<RoleId → Role>         (std, short critical sections)
//! AgentCache   RwLock<agent id → attributes> (tokio)
//! ClassCache   RwLock<name → Arc<TaskClass>> (tokio, TTL eviction)
//! ```
//!
//! Each structure guards itself; there is no lock spanning two of them.

pub mod agent_cache;
pub mod classes;
pub mod descriptor;
pub mod error;
pub mod role;
pub mod roster;
pub mod task;

pub use agent_cache::{AgentCache, AgentCacheInfo};
pub use classes::ClassCache;
pub use descriptor::Descriptor;
pub use error::{RosterError, RosterResult};
pub use role::{Role, RoleArena, RoleId, RoleSpec, TaskTraits};
pub use roster::Roster;
pub use task::Task;
