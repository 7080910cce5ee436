//! Prometheus-compatible replication queue metrics.
//!
//! Two monotonic counters per replication, updated by the queue manager on
//! every successful enqueue and exposed in Prometheus text exposition
//! format. One `ReplicationMetrics` value is constructed per service and
//! shared; counters must not be registered twice.

use std::collections::HashMap;
use std::sync::Mutex;
use tidemark_core::ReplicationId;

/// Counter: points enqueued to the replication stream.
pub const POINTS_QUEUED_METRIC: &str = "replications_queue_points_queued_total";
/// Counter: bytes enqueued to the replication stream.
pub const BYTES_QUEUED_METRIC: &str = "replications_queue_bytes_queued_total";

const REPLICATION_LABEL: &str = "replicationID";

/// A single Prometheus counter sample.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Labels as key=value pairs.
    pub labels: Vec<(String, String)>,
    /// Current value.
    pub value: u64,
}

impl Metric {
    /// Creates a counter sample.
    pub fn counter(name: &str, help: &str, labels: Vec<(String, String)>, value: u64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            labels,
            value,
        }
    }

    /// Formats this sample in Prometheus text exposition format.
    pub fn format(&self) -> String {
        let mut output = format!("# HELP {} {}\n", self.name, self.help);
        output.push_str(&format!("# TYPE {} counter\n", self.name));
        if self.labels.is_empty() {
            output.push_str(&format!("{} {}\n", self.name, self.value));
        } else {
            let label_str = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, v))
                .collect::<Vec<_>>()
                .join(",");
            output.push_str(&format!("{}{{{}}} {}\n", self.name, label_str, self.value));
        }
        output
    }
}

/// Per-replication enqueue totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Points enqueued.
    pub points_queued: u64,
    /// Payload bytes enqueued.
    pub bytes_queued: u64,
}

/// Counter registry for the replication subsystem.
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    per_replication: Mutex<HashMap<ReplicationId, QueueCounters>>,
}

impl ReplicationMetrics {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            per_replication: Mutex::new(HashMap::new()),
        }
    }

    /// Records one successful enqueue.
    pub fn record_enqueue(&self, id: ReplicationId, points: u64, bytes: u64) {
        let mut per_replication = self
            .per_replication
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let counters = per_replication.entry(id).or_default();
        counters.points_queued += points;
        counters.bytes_queued += bytes;
    }

    /// Current totals for a replication, if it has ever enqueued.
    pub fn counters(&self, id: ReplicationId) -> Option<QueueCounters> {
        self.per_replication
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
    }

    /// Produces the full list of counter samples, ordered by replication id
    /// for stable output.
    pub fn to_metrics(&self) -> Vec<Metric> {
        let per_replication = self
            .per_replication
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = per_replication.keys().copied().collect();
        ids.sort();

        let mut out = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            let counters = per_replication[&id];
            let labels = vec![(REPLICATION_LABEL.to_string(), id.to_string())];
            out.push(Metric::counter(
                POINTS_QUEUED_METRIC,
                "The number of points enqueued to the replication stream",
                labels.clone(),
                counters.points_queued,
            ));
            out.push(Metric::counter(
                BYTES_QUEUED_METRIC,
                "The number of bytes enqueued to the replication stream",
                labels,
                counters.bytes_queued,
            ));
        }
        out
    }

    /// Formats every sample in Prometheus text exposition format.
    pub fn format_prometheus(&self) -> String {
        self.to_metrics()
            .iter()
            .map(|m| m.format())
            .collect::<Vec<_>>()
            .join("")
    }
}
