//! Idle queue — work eligible only while the host reports idleness.
//!
//! Same ordering discipline as the ready queue, but strictly lower
//! precedence: the loop consults it only when nothing ready or due-timed
//! exists and the idle probe currently reports true.

use crate::job::Job;

use super::ready::ReadyQueue;

#[derive(Default)]
pub(crate) struct IdleQueue(ReadyQueue);

impl IdleQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, mut job: Job) {
        job.mark_idle();
        self.0.insert(job);
    }

    /// Idle jobs order among themselves by their own declared priority.
    pub(crate) fn pop_highest(&mut self) -> Option<Job> {
        self.0.pop_highest()
    }

    pub(crate) fn remove_matching(&mut self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        self.0.remove_matching(pred)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Priority, Step};

    #[test]
    fn insert_marks_idle_and_keeps_priority_order() {
        let mut queue = IdleQueue::new();
        queue.insert(Job::from_fn(|| async { Ok(Step::Done(None)) }).with_name("low"));
        queue.insert(
            Job::from_fn(|| async { Ok(Step::Done(None)) })
                .with_name("high")
                .with_priority(Priority::AboveNormal),
        );

        let first = queue.pop_highest().unwrap();
        assert_eq!(first.name(), Some("high"));
        assert!(first.is_idle());
    }
}
