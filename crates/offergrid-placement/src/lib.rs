//! offergrid-placement — turns resource offers into task launches.
//!
//! Given a batch of offers and the descriptors still waiting for a task,
//! the matcher decides which offer hosts which descriptor, carves the
//! consumed resources out of each offer, allocates channel endpoints and
//! control ports, and produces launch payloads. It does NOT talk to the
//! cluster manager; accepting and declining offers is the caller's job.
//!
//! # Components
//!
//! - **`offer`**: offers and their remaining resource vectors
//! - **`wants`**: per-descriptor resource demands and limits
//! - **`launch`**: the launch payload handed to the cluster manager
//! - **`matcher`**: the per-offer concurrent matching round

pub mod error;
pub mod launch;
pub mod matcher;
pub mod offer;
pub mod wants;

pub use error::{PlacementError, PlacementResult};
pub use launch::{LaunchCommand, LaunchResources, TaskLaunch};
pub use matcher::{MatchOutcome, Matcher, MatcherConfig, OfferLaunch};
pub use offer::{Offer, ResourceVector};
pub use wants::{Limits, Wants};
