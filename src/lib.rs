//! SDS Control Plane
//!
//! Storage orchestration core: volume, attachment, snapshot and group
//! lifecycle across heterogeneous storage backends, plus two-sided
//! replication between them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        REST surface (external gateway)                      │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                             Controller Facade                               │
//! │  ┌────────────────────────────────┐  ┌───────────────────────────────────┐  │
//! │  │   Resource Lifecycle Engine    │  │      Replication Coordinator      │  │
//! │  │ volume/attachment/snapshot/grp │◄─┤   array-based     host-based      │  │
//! │  └───────────────┬────────────────┘  └─────────────────┬─────────────────┘  │
//! │                  │        Scheduler / Inventory        │                    │
//! ├──────────────────┴─────────────────────────────────────┴────────────────────┤
//! │     Driver Manager (setup, readiness)      │      Metadata Store (CAS)      │
//! ├────────────────────────────────────────────┼────────────────────────────────┤
//! │   Volume / Replication / Metrics drivers   │        memory  |  file         │
//! └────────────────────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: lifecycle engine, replication, controller and REST API
//! - [`drivers`]: driver registry, manager and the built-in sample driver
//! - [`store`]: metadata store implementations
//! - [`domain`]: entities, status machines and ports
//! - [`config`]: process configuration
//! - [`error`]: error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ConfigOverrides};
pub use controlplane::{
    Accepted, ApiServer, ApiServerConfig, Context, Controller, LifecycleEngine,
    ReplicationCoordinator,
};
pub use drivers::{DriverManager, DriverRegistry};
pub use error::{Error, ErrorKind, Result};
pub use metrics::Metrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
