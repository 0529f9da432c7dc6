//! Per-writer Lamport clock.

use std::cmp::Ordering;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A `(writer id, time)` pair with a total order.
///
/// `time` is compared first; ties break on the writer id, lexicographically.
/// This is a total order over all writers, not a causal order: it is what
/// last-writer-wins reductions and merge head selection sort by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display(fmt = "{}@{}", id, time)]
pub struct LamportClock {
    id: String,
    time: u64,
}

impl LamportClock {
    /// Create a clock for writer `id` at `time`.
    pub fn new(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }

    /// The writer identity this clock belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The logical time.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// The same writer's clock, advanced by one.
    pub fn tick(&self) -> Self {
        Self {
            id: self.id.clone(),
            time: self.time + 1,
        }
    }
}

impl Ord for LamportClock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for LamportClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
