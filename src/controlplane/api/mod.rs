//! API Module
//!
//! REST surface consumed by the external gateway.

pub mod rest;
pub mod server;

pub use rest::RestRouter;
pub use server::{ApiServer, ApiServerConfig};
