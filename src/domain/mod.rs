//! Domain layer - Entities and port definitions
//!
//! This module defines the records the control plane owns and the traits
//! (ports) that drivers and metadata stores implement, following hexagonal
//! architecture principles.

pub mod model;
pub mod ports;
pub mod replication_data;

pub use model::*;
pub use ports::*;
