//! offergrid-control — request/response calls over one-way messaging.
//!
//! Deployed tasks are controlled with fire-and-forget messages relayed by
//! the cluster manager. This crate turns those into awaitable calls:
//!
//! - [`Servent`] correlates each outgoing call with its reply by
//!   `(command id, target)` and bounds the wait with a timeout
//! - [`CommandQueue`] is a bounded queue drained by exactly one worker,
//!   which fans multi-target commands out and joins the replies
//!
//! # Architecture
//!
//! ```text
//! caller ──enqueue──▶ CommandQueue (bounded, try_send)
//!                        └── worker (one command at a time)
//!                              ├── Servent::run_command(target 1) ──▶ Transport
//!                              ├── Servent::run_command(target 2) ──▶ Transport
//!                              └── join ──▶ Response (single or multi)
//! cluster ──reply──▶ Servent::process_response ──▶ waiting call
//! ```

pub mod command;
pub mod error;
pub mod queue;
pub mod response;
pub mod servent;

pub use command::{CallId, Command, CommandKind, CommandTarget};
pub use error::{ControlError, ControlResult};
pub use queue::{CommandQueue, CommandQueueWorker};
pub use response::{CommandResponse, MultiResponse, Response};
pub use servent::{Servent, Transport};
