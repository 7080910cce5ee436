#![warn(missing_docs)]

//! Tidemark replication subsystem.
//!
//! Mirrors every point written to a replicated local bucket into durable
//! on-disk queues, one per configured remote binding, without blocking or
//! corrupting the local write path. A background shipper (elsewhere in the
//! node) drains the queues and posts their contents to the remotes.

pub mod bucket;
pub mod catalog;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod queue_manager;
pub mod remotes;
pub mod service;
pub mod validator;
pub mod writer;

pub use catalog::{
    Catalog, CreateReplicationRequest, Replication, ReplicationFilter, UpdateReplicationRequest,
};
pub use error::{ErrorKind, ReplicationError};
pub use metrics::ReplicationMetrics;
pub use queue_manager::QueueManager;
pub use remotes::RemoteHttpConfig;
pub use service::{ReplicationService, ServiceConfig, MIN_QUEUE_SIZE_BYTES};
