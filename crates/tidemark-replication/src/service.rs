//! The replication service: orchestrates the catalog, the durable queue
//! manager, and the external seams behind one public contract.
//!
//! Catalog mutations run under the service's exclusive lock and mirror
//! lifecycle calls into the queue manager; reads are lock-free. The hot
//! write path performs the local write and payload serialization in
//! parallel, then fans the same gzipped buffer into every matching queue.
//! Create is queue-first/catalog-second and delete is the reverse, so any
//! interruption leaves an orphan queue that `open` sweeps away, never a
//! queue-less catalog row.

use crate::bucket::BucketService;
use crate::catalog::{
    Catalog, CreateReplicationRequest, Replication, ReplicationFilter, UpdateReplicationRequest,
};
use crate::error::{is_foreign_key_violation, is_unique_violation, ReplicationError};
use crate::metrics::ReplicationMetrics;
use crate::queue_manager::QueueManager;
use crate::validator::ReplicationValidator;
use crate::writer::PointsWriter;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tidemark_core::{BucketId, IdGenerator, OrgId, Point, ReplicationId};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Floor for `max_queue_size_bytes` enforced at the service layer.
pub const MIN_QUEUE_SIZE_BYTES: u64 = 33_554_430;

/// Directory under the engine path that holds the per-replication queues.
const QUEUE_DIR_NAME: &str = "replicationq";

/// Configuration for the replication service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Storage engine root; queues live under `<engine_path>/replicationq`.
    pub engine_path: PathBuf,
    /// Smallest accepted queue bound.
    pub min_queue_size_bytes: u64,
}

impl ServiceConfig {
    /// Configuration with the default queue-size floor.
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            min_queue_size_bytes: MIN_QUEUE_SIZE_BYTES,
        }
    }
}

/// The replication control plane of one Tidemark node.
pub struct ReplicationService {
    catalog: Catalog,
    id_generator: IdGenerator,
    buckets: Arc<dyn BucketService>,
    local_writer: Arc<dyn PointsWriter>,
    validator: Arc<dyn ReplicationValidator>,
    queues: Arc<QueueManager>,
    metrics: Arc<ReplicationMetrics>,
    write_lock: Mutex<()>,
    min_queue_size_bytes: u64,
}

impl ReplicationService {
    /// Wires the service together. The metrics registry is created here,
    /// exactly once, and shared with the queue manager.
    pub fn new(
        catalog: Catalog,
        buckets: Arc<dyn BucketService>,
        local_writer: Arc<dyn PointsWriter>,
        validator: Arc<dyn ReplicationValidator>,
        config: ServiceConfig,
    ) -> Self {
        let metrics = Arc::new(ReplicationMetrics::new());
        let queues = Arc::new(QueueManager::new(
            config.engine_path.join(QUEUE_DIR_NAME),
            Arc::clone(&metrics),
        ));
        Self {
            catalog,
            id_generator: IdGenerator::new(),
            buckets,
            local_writer,
            validator,
            queues,
            metrics,
            write_lock: Mutex::new(()),
            min_queue_size_bytes: config.min_queue_size_bytes,
        }
    }

    /// The service's counter registry, for the metrics exporter.
    pub fn metrics(&self) -> Arc<ReplicationMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The durable queue manager, shared with the shipper that drains the
    /// queues.
    pub fn queue_manager(&self) -> Arc<QueueManager> {
        Arc::clone(&self.queues)
    }

    /// Replays the catalog into the queue manager, reconciling the on-disk
    /// queue directories with the catalog rows.
    pub async fn open(&self) -> Result<(), ReplicationError> {
        let bounds = self.catalog.queue_bounds().await?;
        self.queues.start_replication_queues(bounds).await?;
        Ok(())
    }

    /// Flushes and closes every queue. Errors here are fatal to shutdown.
    pub async fn close(&self) -> Result<(), ReplicationError> {
        self.queues.close_all().await?;
        Ok(())
    }

    /// Lists replications matching the filter, with live queue sizes
    /// spliced in. Takes no locks.
    pub async fn list_replications(
        &self,
        filter: &ReplicationFilter,
    ) -> Result<Vec<Replication>, ReplicationError> {
        let mut replications = self.catalog.list(filter).await?;
        if replications.is_empty() {
            return Ok(replications);
        }
        let ids: Vec<ReplicationId> = replications.iter().map(|r| r.id).collect();
        let sizes = self.queues.current_queue_sizes(&ids).await?;
        for replication in &mut replications {
            replication.current_queue_size_bytes =
                sizes.get(&replication.id).copied().unwrap_or(0);
        }
        Ok(replications)
    }

    /// Fetches one replication with its live queue size spliced in.
    pub async fn get_replication(
        &self,
        id: ReplicationId,
    ) -> Result<Replication, ReplicationError> {
        let mut replication = self
            .catalog
            .get(id)
            .await?
            .ok_or(ReplicationError::NotFound)?;
        let sizes = self.queues.current_queue_sizes(&[id]).await?;
        replication.current_queue_size_bytes = sizes.get(&id).copied().unwrap_or(0);
        Ok(replication)
    }

    /// Creates a replication: bucket existence check, queue initialization,
    /// then the catalog insert, with a compensating queue delete if the
    /// insert fails. Runs under the bucket read lock and the exclusive
    /// mutation lock.
    pub async fn create_replication(
        &self,
        request: &CreateReplicationRequest,
    ) -> Result<Replication, ReplicationError> {
        if request.max_queue_size_bytes < self.min_queue_size_bytes {
            return Err(ReplicationError::QueueSizeTooSmall {
                got: request.max_queue_size_bytes,
                min: self.min_queue_size_bytes,
            });
        }

        let _bucket_guard = self.buckets.read_lock().await;
        let _write_guard = self.write_lock.lock().await;

        if let Err(err) = self.buckets.find_bucket(request.local_bucket_id).await {
            debug!(bucket_id = %request.local_bucket_id, error = %err, "local bucket lookup failed");
            return Err(ReplicationError::LocalBucketNotFound {
                id: request.local_bucket_id,
            });
        }

        let new_id = self.id_generator.generate();
        self.queues
            .initialize_queue(new_id, request.max_queue_size_bytes)
            .await?;

        match self.catalog.insert(new_id, request).await {
            Ok(replication) => Ok(replication),
            Err(err) => {
                self.cleanup_queue(new_id).await;
                if is_foreign_key_violation(&err) {
                    return Err(ReplicationError::RemoteNotFound {
                        id: request.remote_id,
                    });
                }
                if is_unique_violation(&err) {
                    return Err(ReplicationError::NameConflict {
                        name: request.name.clone(),
                    });
                }
                Err(err.into())
            }
        }
    }

    async fn cleanup_queue(&self, id: ReplicationId) {
        if let Err(err) = self.queues.delete_queue(id).await {
            warn!(
                id = %id,
                error = %err,
                "durable queue remaining on disk after initialization failure"
            );
        }
    }

    /// Applies a partial update under the exclusive lock, then mirrors a
    /// queue-bound change into the queue manager. A queue resize failure is
    /// surfaced after the catalog was already mutated; the divergence is
    /// logged and healed at the next `open`.
    pub async fn update_replication(
        &self,
        id: ReplicationId,
        request: &UpdateReplicationRequest,
    ) -> Result<Replication, ReplicationError> {
        if let Some(max) = request.max_queue_size_bytes {
            if max < self.min_queue_size_bytes {
                return Err(ReplicationError::QueueSizeTooSmall {
                    got: max,
                    min: self.min_queue_size_bytes,
                });
            }
        }

        let _write_guard = self.write_lock.lock().await;

        let mut replication = match self.catalog.update(id, request).await {
            Ok(Some(replication)) => replication,
            Ok(None) => return Err(ReplicationError::NotFound),
            Err(err) => {
                if let Some(remote_id) = request.remote_id {
                    if is_foreign_key_violation(&err) {
                        return Err(ReplicationError::RemoteNotFound { id: remote_id });
                    }
                }
                if let Some(name) = &request.name {
                    if is_unique_violation(&err) {
                        return Err(ReplicationError::NameConflict { name: name.clone() });
                    }
                }
                return Err(err.into());
            }
        };

        if let Some(max) = request.max_queue_size_bytes {
            if let Err(err) = self.queues.update_max_queue_size(id, max).await {
                warn!(
                    id = %id,
                    error = %err,
                    "actual max queue size does not match the max queue size recorded in the catalog"
                );
                return Err(err.into());
            }
        }

        let sizes = self.queues.current_queue_sizes(&[id]).await?;
        replication.current_queue_size_bytes = sizes.get(&id).copied().unwrap_or(0);
        Ok(replication)
    }

    /// Deletes one replication, catalog row first, then its queue.
    pub async fn delete_replication(&self, id: ReplicationId) -> Result<(), ReplicationError> {
        let _write_guard = self.write_lock.lock().await;

        if !self.catalog.delete(id).await? {
            return Err(ReplicationError::NotFound);
        }
        self.queues.delete_queue(id).await?;
        Ok(())
    }

    /// Deletes every replication of a local bucket. Queue deletion failures
    /// are logged, the remainder still runs, and one aggregate error is
    /// returned at the end. Zero matches is a success.
    pub async fn delete_bucket_replications(
        &self,
        local_bucket_id: BucketId,
    ) -> Result<(), ReplicationError> {
        let _write_guard = self.write_lock.lock().await;

        let deleted = self.catalog.delete_by_bucket(local_bucket_id).await?;
        let mut queue_delete_failed = false;
        for id in &deleted {
            if let Err(err) = self.queues.delete_queue(*id).await {
                error!(
                    id = %id,
                    error = %err,
                    "durable queue remaining on disk after deletion failure"
                );
                queue_delete_failed = true;
            }
        }

        debug!(
            bucket_id = %local_bucket_id,
            count = deleted.len(),
            "deleted all replications for local bucket"
        );

        if queue_delete_failed {
            return Err(ReplicationError::BucketDeleteFailed {
                bucket_id: local_bucket_id,
            });
        }
        Ok(())
    }

    /// Validates a prospective replication without persisting anything.
    pub async fn validate_new_replication(
        &self,
        request: &CreateReplicationRequest,
    ) -> Result<(), ReplicationError> {
        if let Err(err) = self.buckets.find_bucket(request.local_bucket_id).await {
            debug!(bucket_id = %request.local_bucket_id, error = %err, "local bucket lookup failed");
            return Err(ReplicationError::LocalBucketNotFound {
                id: request.local_bucket_id,
            });
        }
        let config = self
            .catalog
            .remote_http_config(request.remote_id, request.remote_bucket_id)
            .await?
            .ok_or(ReplicationError::RemoteNotFound {
                id: request.remote_id,
            })?;
        self.validator
            .validate_replication(&config)
            .await
            .map_err(|source| ReplicationError::ValidationFailed { source })
    }

    /// Validates the configuration a stored replication would have after
    /// applying the update.
    pub async fn validate_updated_replication(
        &self,
        id: ReplicationId,
        request: &UpdateReplicationRequest,
    ) -> Result<(), ReplicationError> {
        let mut config = self
            .catalog
            .full_http_config(id)
            .await?
            .ok_or(ReplicationError::NotFound)?;
        if let Some(remote_bucket_id) = request.remote_bucket_id {
            config.remote_bucket_id = remote_bucket_id;
        }
        if let Some(remote_id) = request.remote_id {
            config = self
                .catalog
                .remote_http_config(remote_id, config.remote_bucket_id)
                .await?
                .ok_or(ReplicationError::RemoteNotFound { id: remote_id })?;
        }
        self.validator
            .validate_replication(&config)
            .await
            .map_err(|source| ReplicationError::ValidationFailed { source })
    }

    /// Validates a stored replication as configured.
    pub async fn validate_replication(&self, id: ReplicationId) -> Result<(), ReplicationError> {
        let config = self
            .catalog
            .full_http_config(id)
            .await?
            .ok_or(ReplicationError::NotFound)?;
        self.validator
            .validate_replication(&config)
            .await
            .map_err(|source| ReplicationError::ValidationFailed { source })
    }

    /// The hot write path.
    ///
    /// With no matching replications this is a plain delegation to the
    /// local writer. Otherwise the local write and the gzip serialization
    /// run in parallel; if either fails nothing is enqueued and the error
    /// is returned, so queues never hold data the local store does not.
    /// After both succeed, the same buffer is enqueued into every matching
    /// replication concurrently; individual enqueue failures are logged but
    /// never surfaced, because the local write has already succeeded.
    pub async fn write_points(
        &self,
        org_id: OrgId,
        bucket_id: BucketId,
        points: &[Point],
    ) -> Result<(), ReplicationError> {
        let ids = self.catalog.ids_for_write(org_id, bucket_id).await?;
        if ids.is_empty() {
            return Ok(self
                .local_writer
                .write_points(org_id, bucket_id, points)
                .await?);
        }

        let ((), payload) = tokio::try_join!(
            async {
                self.local_writer
                    .write_points(org_id, bucket_id, points)
                    .await
                    .map_err(ReplicationError::from)
            },
            async { encode_points_gzip(points) },
        )?;

        let payload = Arc::new(payload);
        let num_points = points.len();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let queues = Arc::clone(&self.queues);
            let payload = Arc::clone(&payload);
            handles.push(tokio::spawn(async move {
                if let Err(err) = queues.enqueue_data(id, &payload, num_points).await {
                    error!(id = %id, error = %err, "failed to enqueue points for replication");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Serializes points to newline-terminated, nanosecond-precision line
/// protocol, streamed through a gzip compressor. The compressed form is
/// what sits in the queues and what the shipper posts to the remote without
/// recompressing.
fn encode_points_gzip(points: &[Point]) -> Result<Vec<u8>, ReplicationError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for point in points {
        encoder
            .write_all(point.line_protocol().as_bytes())
            .map_err(ReplicationError::Serialize)?;
        encoder.write_all(b"\n").map_err(ReplicationError::Serialize)?;
    }
    encoder.finish().map_err(ReplicationError::Serialize)
}
