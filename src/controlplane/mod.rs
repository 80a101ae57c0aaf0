//! Control Plane Module
//!
//! The lifecycle engine, replication coordinator and controller facade,
//! plus the REST surface in front of them.

pub mod api;
pub mod context;
pub mod controller;
pub mod inventory;
pub mod lifecycle;
pub mod replication;
pub mod scheduler;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiServer, ApiServerConfig};
pub use context::{Accepted, Context};
pub use controller::Controller;
pub use inventory::Inventory;
pub use lifecycle::LifecycleEngine;
pub use replication::ReplicationCoordinator;
pub use scheduler::Scheduler;
