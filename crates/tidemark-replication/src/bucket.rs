//! Bucket presence oracle.
//!
//! Replication only needs two capabilities from the bucket subsystem: an
//! existence check for a local bucket, and a shared lock that
//! `CreateReplication` holds so the bucket cannot be deleted between the
//! existence check and the catalog insert.

use async_trait::async_trait;
use thiserror::Error;
use tidemark_core::BucketId;
use tokio::sync::OwnedRwLockReadGuard;

/// Errors from the bucket service.
#[derive(Debug, Error)]
pub enum BucketError {
    /// The bucket does not exist.
    #[error("bucket {id} not found")]
    NotFound {
        /// The missing bucket.
        id: BucketId,
    },
    /// The bucket service could not answer.
    #[error("bucket service unavailable: {msg}")]
    Unavailable {
        /// Description of the failure.
        msg: String,
    },
}

/// Read-only view of the node's bucket catalog.
#[async_trait]
pub trait BucketService: Send + Sync {
    /// Acquires the shared lock guarding bucket existence. Holding the
    /// returned guard blocks concurrent bucket deletion.
    async fn read_lock(&self) -> OwnedRwLockReadGuard<()>;

    /// Succeeds when the bucket exists on this node.
    async fn find_bucket(&self, id: BucketId) -> Result<(), BucketError>;
}
