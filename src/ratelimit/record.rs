//! Per-key records and their expiry queue entries.

use serde::Serialize;
use std::cmp::Ordering;

/// Hit count and deadline for one tracked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Hits registered since the record was created
    pub count: u64,
    /// Epoch second at which the record becomes eligible for eviction
    pub deadline: i64,
    /// Identifies the expiry entry that owns this record
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl Record {
    /// Create a record for a first hit at `now`.
    pub(crate) fn new(now: i64, window: i64, generation: u64) -> Self {
        Self {
            count: 1,
            deadline: now.saturating_add(window),
            generation,
        }
    }

    /// Register a hit. Returns whether the count before this hit was
    /// still under `threshold`. The count always increases.
    pub(crate) fn hit(&mut self, threshold: i64) -> bool {
        let admitted = self.is_under(threshold);
        self.count = self.count.saturating_add(1);
        admitted
    }

    /// Whether the current count is below `threshold`.
    pub fn is_under(&self, threshold: i64) -> bool {
        u64::try_from(threshold).is_ok_and(|threshold| self.count < threshold)
    }

    /// Whether the record has expired at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.deadline <= now
    }
}

/// Entry in the expiry queue.
///
/// Ordered by deadline, with the generation breaking ties so entries
/// created earlier come out first. The key takes no part in the ordering.
#[derive(Debug, Clone)]
pub(crate) struct Expiry<K> {
    pub deadline: i64,
    pub generation: u64,
    pub key: K,
}

impl<K> Expiry<K> {
    pub fn is_expired(&self, now: i64) -> bool {
        self.deadline <= now
    }

    /// Whether `record` is the live record this entry was queued for.
    pub fn owns(&self, record: &Record) -> bool {
        record.generation == self.generation
    }
}

impl<K> PartialEq for Expiry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl<K> Eq for Expiry<K> {}

impl<K> PartialOrd for Expiry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Expiry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.generation.cmp(&other.generation))
    }
}
