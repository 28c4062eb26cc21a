//! Core entity model, transport, and connector framework for ConnSurveyor.
//!
//! This crate provides everything shared between the collector binary and
//! any downstream cache consumer: the canonical entity model, the
//! authenticated HTTP transport with throttling recovery, the per-backend
//! connector framework, the cache tree layout, and the read-only loaders
//! that reconstruct entities from disk.
//!
//! # Security Guarantees
//! - Every backend operation is a read; enumeration and dumping never
//!   mutate remote state
//! - Bearer credentials live in zeroizing buffers and are never logged
//! - Error messages and logged URLs are sanitized of query values
//!
//! # Architecture
//! - One object-safe trait per concern ([`connectors::ConnectorClient`])
//!   with a closed dispatch table ([`connectors::BackendKind`])
//! - Whole-file cache writes; loaders re-parse from disk on every call

pub mod cache;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod models;
pub mod paths;
pub mod transport;

// Re-export commonly used types
pub use connectors::{bind, BackendKind, BoundConnector, ConnectorClient};
pub use error::{ConnSurveyorError, Result};
pub use logging::init_logging;
pub use models::{
    CanvasApp, Connection, Connector, ConnectorSpec, DataDump, DataDumpWithContext, DataRecord,
    DataRecordWithContext, DataStore, DataStoreWithContext, Principal, RecordExtra, RecordType,
    ResourceType, StoreExtra, ENCODING, SCHEMA_VERSION,
};
pub use transport::{ApiClient, ApiResponse, PageOptions, PagedValues, ResponseBody};
