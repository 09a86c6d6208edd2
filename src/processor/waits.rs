//! Wait multiplexer — suspended jobs awaiting an external signal or timeout.
//!
//! Suspension is cooperative, not thread-blocking: each registered wait runs
//! a small watcher task that races the job's signal against its private
//! timeout, then posts the job back to the scheduler loop. Many suspended
//! jobs wait concurrently; the worker keeps dispatching other work meanwhile.
//!
//! The number of concurrently outstanding waits is bounded (default 64, see
//! [`DEFAULT_WAIT_LIMIT`](crate::config::DEFAULT_WAIT_LIMIT)). Exceeding the
//! bound is a reported fatal condition for the overflowing job, never a
//! silent truncation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::Error;
use crate::job::{Job, Signal};

/// Why a suspended job came back to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeCause {
    /// The wait target fired before the timeout.
    Signalled,
    /// The timeout elapsed first; the loop invokes the job's timeout handler.
    TimedOut,
    /// Shutdown released the wait; the job is discarded.
    Released,
}

pub(crate) struct Resumption {
    pub(crate) job: Job,
    pub(crate) cause: ResumeCause,
}

pub(crate) struct WaitMultiplexer {
    limit: usize,
    outstanding: Arc<AtomicUsize>,
    resume_tx: mpsc::UnboundedSender<Resumption>,
    shutdown_tx: watch::Sender<bool>,
}

impl WaitMultiplexer {
    /// Create the multiplexer and the resumption channel the loop drains.
    pub(crate) fn new(limit: usize) -> (Self, mpsc::UnboundedReceiver<Resumption>) {
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let mux = Self {
            limit,
            outstanding: Arc::new(AtomicUsize::new(0)),
            resume_tx,
            shutdown_tx,
        };
        (mux, resume_rx)
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Register a suspended job. The job comes back through the resumption
    /// channel once `signal` fires, `timeout` elapses, or shutdown releases
    /// it. Returns the job untouched when the bound would be exceeded.
    pub(crate) fn register(
        &self,
        mut job: Job,
        signal: Signal,
        timeout: Duration,
    ) -> Result<(), (Job, Error)> {
        let prev = self.outstanding.fetch_add(1, Ordering::SeqCst);
        if prev >= self.limit {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err((job, Error::WaitLimitExceeded { limit: self.limit }));
        }

        job.transition(crate::job::JobState::Suspended);
        debug!(job_id = %job.id(), ?timeout, outstanding = prev + 1, "wait registered");

        let outstanding = Arc::clone(&self.outstanding);
        let resume_tx = self.resume_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let cause = tokio::select! {
                _ = signal.wait() => ResumeCause::Signalled,
                _ = tokio::time::sleep(timeout) => ResumeCause::TimedOut,
                _ = shutdown_rx.changed() => ResumeCause::Released,
            };
            outstanding.fetch_sub(1, Ordering::SeqCst);
            let _ = resume_tx.send(Resumption { job, cause });
        });
        Ok(())
    }

    /// Wake every watcher; their jobs come back `Released` and are dropped
    /// by the shutdown path.
    pub(crate) fn release_all(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
