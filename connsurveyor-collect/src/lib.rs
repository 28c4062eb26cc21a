//! Tenant resource and connection-data collection engine.
//!
//! The binary drives two passes over a tenant: `recon` enumerates
//! resources (environments, canvas apps, connections, connector
//! specifications) into the cache tree, and `dump` walks every cached
//! connection through its connector to enumerate and dump the underlying
//! data.
//!
//! # Security Guarantees
//! - Read-only collection: every backend call is a GET
//! - The bearer credential is injected by the operator and never cached
//! - Collected output is plain local files a reviewer can diff offline

pub mod api;
pub mod data;
pub mod output;
pub mod resources;

pub use api::{PlatformApi, DEFAULT_API_BASE_URL};
pub use data::{DataCollector, DEFAULT_PARALLELISM};
pub use resources::ResourcesCollector;
