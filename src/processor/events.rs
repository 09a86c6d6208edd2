//! Processor events, fired synchronously on the worker task.
//!
//! Observers run inline after the corresponding job mutation and must not
//! block significantly, or they stall all further dispatch.

use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::error::Error;
use crate::job::JobMeta;

/// Terminal outcome carried by [`ProcessorEvent::JobFinished`].
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The final step returned normally.
    Completed(Option<Value>),
    /// The step returned an error, panicked, or overflowed the wait limit.
    Faulted(Error),
}

impl JobOutcome {
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

/// Events observable through `JobProcessor::on_event`.
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    /// A job step is about to execute.
    JobStarting { job: JobMeta },
    /// A job reached a terminal outcome. Suspension is not a finish.
    JobFinished { job: JobMeta, outcome: JobOutcome },
    /// The ready queue just transitioned from non-empty to empty.
    QueueGotEmpty,
}

/// A registered event observer.
pub type EventHook = Box<dyn Fn(&ProcessorEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventHooks {
    hooks: RwLock<Vec<EventHook>>,
}

impl EventHooks {
    pub(crate) fn register(&self, hook: EventHook) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub(crate) fn fire(&self, event: &ProcessorEvent) {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn hooks_fire_in_registration_order() {
        let hooks = EventHooks::default();
        let count = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&count);
        hooks.register(Box::new(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = Arc::clone(&count);
        hooks.register(Box::new(move |_| {
            second.fetch_add(10, Ordering::SeqCst);
        }));

        hooks.fire(&ProcessorEvent::QueueGotEmpty);
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }
}
