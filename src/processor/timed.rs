//! Timed schedule table — jobs deferred to a future instant.

use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::job::Job;

/// Jobs ordered by due time ascending. Ties dispatch in admission order.
#[derive(Default)]
pub(crate) struct TimedTable {
    entries: BTreeMap<(Instant, u64), Job>,
    seq: u64,
}

impl TimedTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a job until `due`. Overdue submissions are the caller's problem:
    /// the front door routes those straight to the ready queue.
    pub(crate) fn schedule(&mut self, due: Instant, job: Job) {
        self.entries.insert((due, self.seq), job);
        self.seq += 1;
    }

    /// Remove and return every job whose due time has passed, in due order.
    /// Promoted jobs keep the priority they were scheduled with.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<Job> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// Earliest due time still parked, for the loop's sleep deadline.
    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    pub(crate) fn remove_matching(&mut self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        let keys: Vec<(Instant, u64)> = self
            .entries
            .iter()
            .filter(|(_, job)| pred(job))
            .map(|(key, _)| *key)
            .collect();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
