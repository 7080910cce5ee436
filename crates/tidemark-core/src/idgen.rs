//! Node-wide replication identifier generation.
//!
//! Identifiers are 64-bit and composed of a millisecond timestamp, a node
//! tag, and a per-millisecond sequence, so they are monotonically increasing
//! on one node and unique across a deployment's nodes.

use crate::id::ReplicationId;
use rand::Rng;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generator epoch: 2020-01-01T00:00:00Z, in milliseconds since the Unix
/// epoch. Leaves 41 timestamp bits of headroom for several decades.
const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct GeneratorState {
    last_ms: u64,
    sequence: u64,
}

/// Produces monotonically increasing, globally unique replication IDs.
pub struct IdGenerator {
    node: u64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Creates a generator with a randomly chosen node tag.
    pub fn new() -> Self {
        Self::with_node(rand::rng().random_range(0..=NODE_MASK as u16))
    }

    /// Creates a generator with an explicit node tag. Only the low 10 bits
    /// are used.
    pub fn with_node(node: u16) -> Self {
        Self {
            node: node as u64 & NODE_MASK,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    /// Returns the next identifier.
    ///
    /// Successive calls on one generator always return strictly increasing
    /// values; wall-clock regressions are absorbed by holding the last
    /// observed timestamp.
    pub fn generate(&self) -> ReplicationId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(EPOCH_MS);
        if now < state.last_ms {
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond; borrow from
                // the next one rather than blocking.
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let raw = (now << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS)
            | state.sequence;
        ReplicationId::new(raw)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
