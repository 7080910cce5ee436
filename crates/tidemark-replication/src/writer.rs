//! Seam to the local storage engine's write path.

use async_trait::async_trait;
use thiserror::Error;
use tidemark_core::{BucketId, OrgId, Point};

/// Errors the storage engine can surface from a local write.
#[derive(Debug, Error)]
pub enum PointsWriterError {
    /// Disk or engine I/O failure.
    #[error("storage engine I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The engine rejected the write.
    #[error("storage engine rejected the write: {msg}")]
    Rejected {
        /// Description of the rejection.
        msg: String,
    },
    /// The engine is not accepting writes.
    #[error("storage engine unavailable: {msg}")]
    Unavailable {
        /// Description of the failure.
        msg: String,
    },
}

/// Durable sink for points on this node.
///
/// A successful return means the points are durable in the local store; the
/// replication hot path relies on that before it fans anything out.
#[async_trait]
pub trait PointsWriter: Send + Sync {
    /// Writes a batch of points to the local storage engine.
    async fn write_points(
        &self,
        org_id: OrgId,
        bucket_id: BucketId,
        points: &[Point],
    ) -> Result<(), PointsWriterError>;
}
