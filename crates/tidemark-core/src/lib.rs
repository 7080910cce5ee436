#![warn(missing_docs)]

//! Tidemark platform types: opaque identifiers, the node-wide ID generator,
//! and the time-series point model with line protocol encoding.

pub mod id;
pub mod idgen;
pub mod point;

pub use id::{BucketId, IdParseError, OrgId, RemoteId, ReplicationId};
pub use idgen::IdGenerator;
pub use point::{FieldValue, Point};
