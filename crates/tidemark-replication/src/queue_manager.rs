//! Lifecycle owner for the per-replication durable queues.
//!
//! The manager holds the `id → queue` map behind its own synchronization,
//! mirrors catalog lifecycle events onto disk, and reconciles the queue
//! directory tree against the catalog at startup. All paths live under one
//! root, `<engine_path>/replicationq/<id>/`.

use crate::metrics::ReplicationMetrics;
use crate::queue::{DurableQueue, QueueError, QueueResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidemark_core::ReplicationId;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Owns every durable queue on this node, keyed by replication id.
pub struct QueueManager {
    root: PathBuf,
    queues: RwLock<HashMap<ReplicationId, Arc<Mutex<DurableQueue>>>>,
    metrics: Arc<ReplicationMetrics>,
    closed: AtomicBool,
}

impl QueueManager {
    /// Creates a manager rooted at `root`. No disk access happens until a
    /// queue operation or `start_replication_queues` runs.
    pub fn new(root: impl Into<PathBuf>, metrics: Arc<ReplicationMetrics>) -> Self {
        Self {
            root: root.into(),
            queues: RwLock::new(HashMap::new()),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn queue_dir(&self, id: ReplicationId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Creates and registers the queue for a new replication. Double
    /// initialization is an error.
    pub async fn initialize_queue(&self, id: ReplicationId, max_bytes: u64) -> QueueResult<()> {
        self.ensure_open()?;
        let mut queues = self.queues.write().await;
        if queues.contains_key(&id) {
            return Err(QueueError::AlreadyInitialized { id });
        }
        let queue = DurableQueue::open(self.queue_dir(id), max_bytes)?;
        queues.insert(id, Arc::new(Mutex::new(queue)));
        debug!(id = %id, max_bytes, "initialized durable queue");
        Ok(())
    }

    /// Closes and removes the queue for a replication, deleting its
    /// directory. Safe to call for an id that is not registered: leftover
    /// directories are still removed and a missing directory is a success.
    pub async fn delete_queue(&self, id: ReplicationId) -> QueueResult<()> {
        self.ensure_open()?;
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.remove(&id) {
            queue.lock().await.close()?;
        }
        let dir = self.queue_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(QueueError::Io {
                    path: dir,
                    source: err,
                })
            }
        }
        debug!(id = %id, "deleted durable queue");
        Ok(())
    }

    /// Adjusts the bound enforced by a replication's queue.
    pub async fn update_max_queue_size(&self, id: ReplicationId, max_bytes: u64) -> QueueResult<()> {
        self.ensure_open()?;
        let queues = self.queues.read().await;
        let queue = queues
            .get(&id)
            .ok_or(QueueError::UnknownReplication { id })?;
        let result = queue.lock().await.set_max_bytes(max_bytes);
        result
    }

    /// Reports bytes on disk for every requested id that has a queue;
    /// unknown ids are omitted.
    pub async fn current_queue_sizes(
        &self,
        ids: &[ReplicationId],
    ) -> QueueResult<HashMap<ReplicationId, u64>> {
        self.ensure_open()?;
        let queues = self.queues.read().await;
        let mut sizes = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(queue) = queues.get(id) {
                sizes.insert(*id, queue.lock().await.total_bytes());
            }
        }
        Ok(sizes)
    }

    /// Appends one record to a replication's queue and bumps the enqueue
    /// counters. `num_points` is only used for metrics.
    pub async fn enqueue_data(
        &self,
        id: ReplicationId,
        data: &[u8],
        num_points: usize,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        let queue = {
            let queues = self.queues.read().await;
            queues
                .get(&id)
                .cloned()
                .ok_or(QueueError::UnknownReplication { id })?
        };
        queue.lock().await.enqueue(data)?;
        self.metrics
            .record_enqueue(id, num_points as u64, data.len() as u64);
        Ok(())
    }

    /// Startup reconciliation: opens a queue for every tracked replication
    /// with its recorded bound, and removes every directory under the queue
    /// root that does not correspond to a tracked replication. Restores the
    /// one-row-one-queue invariant after crashes or interrupted deletes.
    pub async fn start_replication_queues(
        &self,
        tracked: HashMap<ReplicationId, u64>,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        let mut queues = self.queues.write().await;

        for (&id, &max_bytes) in &tracked {
            match queues.get(&id) {
                Some(queue) => queue.lock().await.set_max_bytes(max_bytes)?,
                None => {
                    let queue = DurableQueue::open(self.queue_dir(id), max_bytes)?;
                    queues.insert(id, Arc::new(Mutex::new(queue)));
                }
            }
        }

        fs::create_dir_all(&self.root).map_err(|err| QueueError::Io {
            path: self.root.clone(),
            source: err,
        })?;
        let entries = fs::read_dir(&self.root).map_err(|err| QueueError::Io {
            path: self.root.clone(),
            source: err,
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| QueueError::Io {
                path: self.root.clone(),
                source: err,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let keep = ReplicationId::from_str(&name)
                .map(|id| tracked.contains_key(&id))
                .unwrap_or(false);
            if !keep {
                warn!(
                    path = %entry.path().display(),
                    "removing queue directory with no catalog row"
                );
                remove_dir_entry(&entry.path())?;
            }
        }

        debug!(tracked = tracked.len(), "started replication queues");
        Ok(())
    }

    /// Flushes and closes every queue. Later operations fail with
    /// [`QueueError::Closed`].
    pub async fn close_all(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut queues = self.queues.write().await;
        let mut first_error = None;
        for (id, queue) in queues.drain() {
            if let Err(err) = queue.lock().await.close() {
                warn!(id = %id, error = %err, "failed to close durable queue");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn remove_dir_entry(path: &Path) -> QueueResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|err| QueueError::Io {
        path: path.to_path_buf(),
        source: err,
    })
}
