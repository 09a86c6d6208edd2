//! Ready queue — priority-ordered admission, FIFO within a priority band.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::job::{Job, Priority};

/// Stable locator of a queued entry, valid until the entry leaves the queue.
/// The monotone sequence component breaks priority ties in admission order.
pub(crate) type EntryKey = (Reverse<Priority>, u64);

/// Priority queue over not-yet-started jobs.
///
/// Backed by an ordered map keyed by `(Reverse(priority), seq)`: the first
/// entry is always the earliest-admitted job of the highest priority present.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    entries: BTreeMap<EntryKey, Job>,
    seq: u64,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a job, returning its locator for the dedup index.
    pub(crate) fn insert(&mut self, job: Job) -> EntryKey {
        let key = (Reverse(job.priority()), self.seq);
        self.seq += 1;
        self.entries.insert(key, job);
        key
    }

    /// Pop the earliest-admitted job among those at the highest priority.
    pub(crate) fn pop_highest(&mut self) -> Option<Job> {
        self.pop_highest_entry().map(|(_, job)| job)
    }

    /// Like [`pop_highest`](Self::pop_highest), but also yields the entry
    /// locator so the caller can retire a dedup registration precisely.
    pub(crate) fn pop_highest_entry(&mut self) -> Option<(EntryKey, Job)> {
        self.entries.pop_first()
    }

    /// Access a queued job in place (waiter coalescing).
    pub(crate) fn get_mut(&mut self, key: &EntryKey) -> Option<&mut Job> {
        self.entries.get_mut(key)
    }

    /// Evict every queued job satisfying the predicate. Jobs already
    /// dequeued for execution are untouchable here by construction.
    pub(crate) fn remove_matching(&mut self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        let keys: Vec<EntryKey> = self
            .entries
            .iter()
            .filter(|(_, job)| pred(job))
            .map(|(key, _)| *key)
            .collect();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
