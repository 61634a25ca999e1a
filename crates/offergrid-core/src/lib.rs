//! offergrid-core — shared domain types for the offergrid scheduler.
//!
//! Everything here is plain data plus pure functions. Nothing in this
//! crate owns a lock or spawns a task.
//!
//! # Architecture
//!
//! ```text
//! offergrid-core
//!   ├── state / status   (control FSM value + liveness, with the X product)
//!   ├── constraint       (agent attributes vs. placement constraints)
//!   ├── ports            (inclusive port interval sets)
//!   ├── channel          (inbound/outbound channels, endpoints, bind maps)
//!   ├── class            (task-class templates, YAML in/out)
//!   └── config           (scheduler TOML config)
//! ```

pub mod channel;
pub mod class;
pub mod config;
pub mod constraint;
pub mod error;
pub mod ports;
pub mod state;
pub mod status;

pub use channel::{BindMap, Endpoint, Inbound, Outbound};
pub use class::{ClassId, ControlMode, TaskClass};
pub use config::SchedulerConfig;
pub use constraint::{Attribute, Attributes, Constraint, Constraints};
pub use error::{CoreError, CoreResult};
pub use ports::{Range, Ranges};
pub use state::{Event, State, Transition};
pub use status::Status;
