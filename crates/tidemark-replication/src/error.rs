//! Error types for the replication subsystem.

use crate::queue::QueueError;
use crate::validator::ValidatorError;
use crate::writer::PointsWriterError;
use thiserror::Error;
use tidemark_core::{BucketId, RemoteId};

/// Structural classification of a replication error, independent of any
/// transport the error may eventually cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced catalog row does not exist.
    NotFound,
    /// The request referenced something invalid or missing.
    InvalidArgument,
    /// Catalog or queue I/O failed.
    Internal,
    /// Several queue operations failed; details are in the server logs.
    Aggregate,
}

/// Errors surfaced by the replication service.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// No replication exists with the given id.
    #[error("replication not found")]
    NotFound,

    /// The referenced remote does not exist.
    #[error("remote {id} not found")]
    RemoteNotFound {
        /// The missing remote.
        id: RemoteId,
    },

    /// The referenced local bucket does not exist.
    #[error("local bucket {id} not found")]
    LocalBucketNotFound {
        /// The missing bucket.
        id: BucketId,
    },

    /// Another replication in the organization already uses the name.
    #[error("replication name {name:?} is already in use in this organization")]
    NameConflict {
        /// The conflicting name.
        name: String,
    },

    /// The requested queue bound is below the configured floor.
    #[error("max queue size of {got} bytes is below the minimum of {min} bytes")]
    QueueSizeTooSmall {
        /// The rejected value.
        got: u64,
        /// The configured floor.
        min: u64,
    },

    /// The remote probe failed.
    #[error("replication parameters fail validation")]
    ValidationFailed {
        /// The probe failure.
        #[source]
        source: ValidatorError,
    },

    /// The catalog store failed.
    #[error("catalog error")]
    Catalog(#[from] sqlx::Error),

    /// A durable queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The local storage engine write failed.
    #[error(transparent)]
    LocalWrite(#[from] PointsWriterError),

    /// Points could not be serialized for replication.
    #[error("failed to serialize points for replication")]
    Serialize(#[source] std::io::Error),

    /// One or more queue deletions failed during a bucket-wide delete.
    #[error("deleting replications for bucket {bucket_id} failed, see server logs for details")]
    BucketDeleteFailed {
        /// The bucket whose replications were being deleted.
        bucket_id: BucketId,
    },
}

impl ReplicationError {
    /// Classifies this error into its structural kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::NotFound => ErrorKind::NotFound,
            ReplicationError::RemoteNotFound { .. }
            | ReplicationError::LocalBucketNotFound { .. }
            | ReplicationError::NameConflict { .. }
            | ReplicationError::QueueSizeTooSmall { .. }
            | ReplicationError::ValidationFailed { .. } => ErrorKind::InvalidArgument,
            ReplicationError::Catalog(_)
            | ReplicationError::Queue(_)
            | ReplicationError::LocalWrite(_)
            | ReplicationError::Serialize(_) => ErrorKind::Internal,
            ReplicationError::BucketDeleteFailed { .. } => ErrorKind::Aggregate,
        }
    }
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
