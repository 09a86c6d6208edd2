//! Deduplication index — keys of ready-queue jobs that have not started.
//!
//! Prevents unbounded queue growth from repeated submissions of logically
//! identical work (e.g. repeated "refresh now" triggers). Entries leave the
//! index the moment their job is popped for execution or cancelled, so a
//! re-submission while the first instance is *running* is admitted normally.

use std::collections::HashMap;

use crate::job::JobKey;

use super::ready::EntryKey;

#[derive(Default)]
pub(crate) struct DedupIndex {
    pending: HashMap<JobKey, EntryKey>,
}

impl DedupIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, key: &JobKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Locator of the pending job holding this key, for waiter coalescing.
    pub(crate) fn get(&self, key: &JobKey) -> Option<EntryKey> {
        self.pending.get(key).copied()
    }

    pub(crate) fn insert(&mut self, key: JobKey, entry: EntryKey) {
        self.pending.insert(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &JobKey) {
        self.pending.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;

    use super::*;
    use crate::job::Priority;

    #[test]
    fn insert_lookup_remove() {
        let mut index = DedupIndex::new();
        let key = JobKey::tag("refresh");
        let entry = (Reverse(Priority::Normal), 7);

        assert!(!index.contains(&key));
        index.insert(key.clone(), entry);
        assert!(index.contains(&key));
        assert_eq!(index.get(&key), Some(entry));

        index.remove(&key);
        assert!(!index.contains(&key));
    }
}
