//! Core rate limiter implementation.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::record::{Expiry, Record};
use crate::config::LimiterConfig;

/// Per-key fixed-window rate limiter.
///
/// Each key gets a record on its first hit with a deadline of `now + window`.
/// Hits inside the window increment the record's count; once the count
/// reaches the threshold further hits are rejected. The deadline is never
/// extended, so a fresh window only opens after the old record expires.
///
/// Expired records are evicted lazily at the start of every operation by
/// popping a deadline-ordered heap, so the cost of eviction is proportional
/// to the number of records that expired rather than the number tracked.
///
/// All state, including the window and threshold, lives behind a single
/// lock held for the duration of each call. The limiter can be shared
/// across threads through an `Arc`.
pub struct WindowLimiter<K, C = SystemClock> {
    state: Mutex<State<K>>,
    clock: C,
}

struct State<K> {
    window: i64,
    threshold: i64,
    /// Live records indexed by key
    index: HashMap<K, Record>,
    /// Expiry entries, earliest deadline first. May hold entries for keys
    /// that were cleared; those no longer own an index record.
    queue: BinaryHeap<Reverse<Expiry<K>>>,
    next_generation: u64,
}

impl<K> State<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn new(config: LimiterConfig) -> Self {
        Self {
            window: config.window_secs,
            threshold: config.threshold,
            index: HashMap::new(),
            queue: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    /// Pop every expired entry and drop the records they own.
    fn evict(&mut self, now: i64) -> usize {
        let mut evicted = 0;

        while let Some(Reverse(front)) = self.queue.peek() {
            if !front.is_expired(now) {
                break;
            }
            let Some(Reverse(expired)) = self.queue.pop() else {
                break;
            };

            if self.index.get(&expired.key).is_some_and(|r| expired.owns(r)) {
                self.index.remove(&expired.key);
                evicted += 1;
                trace!(key = ?expired.key, deadline = expired.deadline, "Evicted expired record");
            }
        }

        if evicted > 0 {
            debug!(evicted, remaining = self.index.len(), "Evicted expired records");
        }
        evicted
    }

    fn insert(&mut self, key: K, now: i64) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let record = Record::new(now, self.window, generation);
        debug!(
            key = ?key,
            deadline = record.deadline,
            "Creating new rate limit record"
        );

        self.queue.push(Reverse(Expiry {
            deadline: record.deadline,
            generation,
            key: key.clone(),
        }));
        self.index.insert(key, record);
    }
}

impl<K> WindowLimiter<K, SystemClock>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create a limiter reading the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Create a limiter with window and threshold both zero.
    ///
    /// Until [`configure`](Self::configure) is called every key is at
    /// capacity: first hits are admitted and nothing else is.
    pub fn unconfigured() -> Self {
        Self::new(LimiterConfig::new(0, 0))
    }
}

impl<K, C> WindowLimiter<K, C>
where
    K: Eq + Hash + Clone + Debug,
    C: Clock,
{
    /// Create a limiter with an explicit time source.
    pub fn with_clock(config: LimiterConfig, clock: C) -> Self {
        Self {
            state: Mutex::new(State::new(config)),
            clock,
        }
    }

    /// Replace the window and threshold.
    ///
    /// Records that already exist keep their deadlines; the new window only
    /// applies to records created afterwards. The threshold applies to every
    /// decision from now on.
    pub fn configure(&self, window: i64, threshold: i64) {
        let mut state = self.state.lock();
        state.window = window;
        state.threshold = threshold;
        info!(window, threshold, "Limiter configured");
    }

    /// Register one hit for `key`.
    ///
    /// Returns `true` if the hit is within the key's budget. The first hit of
    /// a window is always admitted. Later hits are admitted while the count
    /// before the hit is below the threshold; the count grows either way.
    pub fn add(&self, key: K) -> bool {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.evict(now);

        if let Some(record) = state.index.get_mut(&key) {
            let admitted = record.hit(state.threshold);
            trace!(key = ?key, count = record.count, admitted, "Registered hit");
            if !admitted {
                debug!(
                    key = ?key,
                    count = record.count,
                    threshold = state.threshold,
                    "Rate limit exceeded"
                );
            }
            return admitted;
        }

        state.insert(key, now);
        true
    }

    /// Whether `key` is currently under its limit, without registering a hit.
    ///
    /// This answers whether the next [`add`](Self::add) for the key would be
    /// admitted. Keys with no live record are never limited.
    pub fn ask<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.evict(now);

        let under = state
            .index
            .get(key)
            .map_or(true, |record| record.is_under(state.threshold));
        trace!(key = ?key, under, "Checked rate limit");
        under
    }

    /// Forget the record for `key`, if any.
    ///
    /// The matching expiry entry stays queued and is discarded when it
    /// reaches the front; it can never evict a newer record for the same key.
    pub fn clear<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let mut state = self.state.lock();
        if state.index.remove(key).is_some() {
            debug!(key = ?key, "Cleared rate limit record");
        }
    }

    /// Drain every record in deadline order, logging each key.
    ///
    /// Returns the drained keys. The limiter is empty afterwards and can be
    /// used as normal. Records past their deadline that have not been
    /// evicted yet are included.
    pub fn dump(&self) -> Vec<K> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut drained = Vec::with_capacity(state.index.len());

        while let Some(Reverse(entry)) = state.queue.pop() {
            let Some(record) = state.index.get(&entry.key) else {
                continue;
            };
            if !entry.owns(record) {
                continue;
            }
            info!(
                key = ?entry.key,
                count = record.count,
                deadline = entry.deadline,
                "Dumped rate limit record"
            );
            state.index.remove(&entry.key);
            drained.push(entry.key);
        }

        info!(drained = drained.len(), "Limiter dumped");
        drained
    }

    /// Copy out every live record in deadline order, leaving them in place.
    pub fn snapshot(&self) -> Vec<(K, Record)> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.evict(now);

        let mut records: Vec<(K, Record)> = state
            .index
            .iter()
            .map(|(key, record)| (key.clone(), *record))
            .collect();
        records.sort_by_key(|(_, record)| (record.deadline, record.generation));
        records
    }

    /// Get the live hit count for `key`.
    ///
    /// Returns `None` if no record exists for the key.
    pub fn count<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.evict(now);
        state.index.get(key).map(|record| record.count)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.evict(now);
        state.index.len()
    }

    /// Whether no records are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current window in seconds.
    pub fn window(&self) -> i64 {
        self.state.lock().window
    }

    /// Current threshold.
    pub fn threshold(&self) -> i64 {
        self.state.lock().threshold
    }

    /// Drop every record without logging them.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.index.clear();
        state.queue.clear();
    }

    /// Number of queued expiry entries, tombstones included.
    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}
