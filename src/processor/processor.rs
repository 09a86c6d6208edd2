//! Front door — the thread-safe admission API around the scheduler loop.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobKey, JobMeta, JobState, Priority, Step};

use super::dedup::DedupIndex;
use super::events::{EventHooks, JobOutcome, ProcessorEvent};
use super::idle::IdleQueue;
use super::ready::ReadyQueue;
use super::runner;
use super::timed::TimedTable;
use super::waits::WaitMultiplexer;

/// Outcome of [`JobProcessor::run_unique`].
#[derive(Debug, Clone, PartialEq)]
pub enum UniqueRun {
    /// This caller's instance ran to completion.
    Completed(Option<Value>),
    /// An equal job was already pending; this submission coalesced with it
    /// and carries no result of its own.
    Skipped,
}

/// The four admission structures, guarded together by one mutex. The lock is
/// held only for short, non-awaiting sections; contention is low relative to
/// step execution time.
pub(crate) struct Queues {
    pub(crate) ready: ReadyQueue,
    pub(crate) timed: TimedTable,
    pub(crate) idle: IdleQueue,
    pub(crate) dedup: DedupIndex,
}

impl Queues {
    fn new() -> Self {
        Self {
            ready: ReadyQueue::new(),
            timed: TimedTable::new(),
            idle: IdleQueue::new(),
            dedup: DedupIndex::new(),
        }
    }

    /// Insert into the ready queue, registering the job's key for dedup
    /// unless an earlier holder of the same key is still pending.
    pub(crate) fn admit_ready(&mut self, job: Job) {
        let key = job.key().cloned();
        let entry = self.ready.insert(job);
        if let Some(key) = key {
            if !self.dedup.contains(&key) {
                self.dedup.insert(key, entry);
            }
        }
    }

    /// Pop the highest ready job, retiring its dedup registration if the
    /// index still points at this entry.
    pub(crate) fn pop_ready(&mut self) -> Option<Job> {
        let (entry, job) = self.ready.pop_highest_entry()?;
        if let Some(key) = job.key() {
            if self.dedup.get(key) == Some(entry) {
                self.dedup.remove(key);
            }
        }
        Some(job)
    }

    /// Drop dedup registrations whose ready-queue entries are gone.
    fn prune_dedup(&mut self, removed: &[Job]) {
        for job in removed {
            if let Some(key) = job.key() {
                if let Some(entry) = self.dedup.get(key) {
                    if self.ready.get_mut(&entry).is_none() {
                        self.dedup.remove(key);
                    }
                }
            }
        }
    }
}

/// State shared between the front door and the scheduler loop.
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    pub(crate) config: ProcessorConfig,
    queues: Mutex<Queues>,
    pub(crate) wake: Notify,
    pub(crate) waits: WaitMultiplexer,
    pub(crate) hooks: EventHooks,
    current_job_name: RwLock<Option<String>>,
    pub(crate) shutdown: AtomicBool,
}

impl Shared {
    pub(crate) fn queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_current_job_name(&self, name: Option<String>) {
        *self
            .current_job_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    fn current_job_name(&self) -> Option<String> {
        self.current_job_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle to a running job processor. Cheaply cloneable; admission methods
/// are callable from any thread or task.
///
/// Cancellation is a best-effort race with dispatch: a job may begin running
/// in the gap between a cancel call being issued and processed. That is
/// documented behavior, not a bug — a running step always completes or
/// suspends on its own terms.
#[derive(Clone)]
pub struct JobProcessor {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JobProcessor {
    /// Start the processor: spawns the dedicated worker task.
    pub fn start(config: ProcessorConfig) -> Self {
        let (waits, resume_rx) = WaitMultiplexer::new(config.max_suspended);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            config,
            queues: Mutex::new(Queues::new()),
            wake: Notify::new(),
            waits,
            hooks: EventHooks::default(),
            current_job_name: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        });
        let worker = tokio::spawn(runner::run(Arc::clone(&shared), resume_rx));
        info!(processor = %shared.config.name, "job processor started");
        Self {
            shared,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Admit a job to the ready queue. Returns `Ok(false)` when an equal job
    /// (same key) is already pending and the submission was merged with it.
    pub fn enqueue(&self, job: Job) -> Result<bool> {
        self.ensure_running()?;
        {
            let mut q = self.shared.queues();
            if let Some(key) = job.key() {
                if q.dedup.contains(key) {
                    debug!(job_id = %job.id(), key = %key, "enqueue merged with pending duplicate");
                    return Ok(false);
                }
            }
            debug!(job_id = %job.id(), priority = %job.priority(), "job enqueued");
            q.admit_ready(job);
        }
        self.shared.wake.notify_one();
        Ok(true)
    }

    /// Park a job until `due`. An overdue `due` admits the job to the ready
    /// queue immediately — no spurious delay for schedules already in the
    /// past.
    pub fn schedule_at(&self, due: Instant, mut job: Job) -> Result<()> {
        self.ensure_running()?;
        {
            let mut q = self.shared.queues();
            if due <= Instant::now() {
                debug!(job_id = %job.id(), "overdue schedule, admitting immediately");
                q.admit_ready(job);
            } else {
                job.transition(JobState::Waiting);
                debug!(job_id = %job.id(), ?due, "job scheduled");
                q.timed.schedule(due, job);
            }
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Park a job for `delay` from now.
    pub fn schedule_after(&self, delay: Duration, job: Job) -> Result<()> {
        self.schedule_at(Instant::now() + delay, job)
    }

    /// Admit a job that may only run while the host reports idleness and no
    /// ready or due-timed work exists.
    pub fn enqueue_idle(&self, job: Job) -> Result<()> {
        self.ensure_running()?;
        {
            let mut q = self.shared.queues();
            debug!(job_id = %job.id(), priority = %job.priority(), "idle job enqueued");
            q.idle.insert(job);
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Admit at `Immediate` priority and wait for completion.
    ///
    /// Raises [`Error::DuplicateJob`] when an equal job is already pending.
    /// Called from the worker task itself (re-entrant call from inside a
    /// running step), the job executes inline instead of deadlocking on its
    /// own queue position.
    pub async fn run(&self, job: Job) -> Result<Option<Value>> {
        self.ensure_running()?;
        if runner::on_worker_task(self.shared.id) {
            if let Some(key) = job.key() {
                if self.shared.queues().dedup.contains(key) {
                    return Err(Error::DuplicateJob { key: key.clone() });
                }
            }
            return self.run_inline(job).await;
        }

        let mut job = job.with_priority(Priority::Immediate);
        let (tx, rx) = oneshot::channel();
        job.add_waiter(tx);
        {
            let mut q = self.shared.queues();
            if let Some(key) = job.key() {
                if q.dedup.contains(key) {
                    return Err(Error::DuplicateJob { key: key.clone() });
                }
            }
            debug!(job_id = %job.id(), "synchronous run admitted");
            q.admit_ready(job);
        }
        self.shared.wake.notify_one();
        rx.await.map_err(|_| Error::ShuttingDown)?
    }

    /// Like [`run`](Self::run), but an equal pending job coalesces instead
    /// of erroring: the skipped caller waits for the pending instance and
    /// receives [`UniqueRun::Skipped`] with no result of its own.
    pub async fn run_unique(&self, job: Job) -> Result<UniqueRun> {
        self.ensure_running()?;
        if runner::on_worker_task(self.shared.id) {
            if let Some(key) = job.key() {
                if self.shared.queues().dedup.contains(key) {
                    // The pending duplicate can only run on this very task;
                    // waiting for it here would deadlock.
                    return Ok(UniqueRun::Skipped);
                }
            }
            return self.run_inline(job).await.map(UniqueRun::Completed);
        }

        let (tx, rx) = oneshot::channel();
        let mut coalesced = false;
        {
            let mut q = self.shared.queues();
            let pending = job.key().and_then(|key| q.dedup.get(key));
            if let Some(pending_job) = pending.and_then(|entry| q.ready.get_mut(&entry)) {
                debug!(job_id = %pending_job.id(), "run_unique coalesced with pending duplicate");
                pending_job.add_waiter(tx);
                coalesced = true;
            } else {
                let mut job = job.with_priority(Priority::Immediate);
                job.add_waiter(tx);
                debug!(job_id = %job.id(), "unique synchronous run admitted");
                q.admit_ready(job);
            }
        }
        self.shared.wake.notify_one();

        let value = rx.await.map_err(|_| Error::ShuttingDown)??;
        if coalesced {
            Ok(UniqueRun::Skipped)
        } else {
            Ok(UniqueRun::Completed(value))
        }
    }

    /// Cancel every not-yet-started job whose metadata satisfies the
    /// predicate, across the ready, timed, and idle structures. Returns the
    /// number of jobs cancelled; never errors, even when nothing matched.
    pub fn cancel_where(&self, pred: impl Fn(&JobMeta) -> bool) -> usize {
        let removed = {
            let mut q = self.shared.queues();
            let mut removed = q.ready.remove_matching(|job| pred(&job.meta()));
            q.prune_dedup(&removed);
            removed.extend(q.idle.remove_matching(|job| pred(&job.meta())));
            removed.extend(q.timed.remove_matching(|job| pred(&job.meta())));
            removed
        };
        self.finish_cancelled(removed)
    }

    /// Cancel pending jobs carrying this equality key.
    pub fn cancel_key(&self, key: &JobKey) -> usize {
        self.cancel_where(|meta| meta.key.as_ref() == Some(key))
    }

    /// Cancel a specific pending job instance.
    pub fn cancel_job(&self, id: Uuid) -> usize {
        self.cancel_where(|meta| meta.id == id)
    }

    /// Cancel everything not yet started.
    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    /// Cancel matching jobs in the timed table only.
    pub fn cancel_timed_where(&self, pred: impl Fn(&JobMeta) -> bool) -> usize {
        let removed = {
            let mut q = self.shared.queues();
            q.timed.remove_matching(|job| pred(&job.meta()))
        };
        self.finish_cancelled(removed)
    }

    /// Cancel timed jobs carrying this equality key.
    pub fn cancel_timed_key(&self, key: &JobKey) -> usize {
        self.cancel_timed_where(|meta| meta.key.as_ref() == Some(key))
    }

    /// Discard the whole timed table.
    pub fn cancel_timed_all(&self) -> usize {
        self.cancel_timed_where(|_| true)
    }

    /// True when called from the processor's own worker task.
    pub fn is_worker(&self) -> bool {
        runner::on_worker_task(self.shared.id)
    }

    /// Name of the most recently started job, if it had one.
    pub fn current_job_name(&self) -> Option<String> {
        self.shared.current_job_name()
    }

    /// Register an event observer. Hooks run synchronously on the worker
    /// task and must not block significantly.
    pub fn on_event(&self, hook: impl Fn(&ProcessorEvent) + Send + Sync + 'static) {
        self.shared.hooks.register(Box::new(hook));
    }

    /// Number of not-yet-started jobs across all admission structures.
    pub fn pending_jobs(&self) -> usize {
        let q = self.shared.queues();
        q.ready.len() + q.timed.len() + q.idle.len()
    }

    /// Number of currently suspended jobs.
    pub fn suspended_jobs(&self) -> usize {
        self.shared.waits.outstanding()
    }

    /// Stop the worker: pending jobs are discarded (their waiters receive
    /// [`Error::ShuttingDown`]) and suspended waits are released. Admission
    /// calls made after this return [`Error::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!(processor = %self.shared.config.name, "job processor stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            Err(Error::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn finish_cancelled(&self, removed: Vec<Job>) -> usize {
        let cancelled = removed.len();
        for mut job in removed {
            debug!(job_id = %job.id(), "job cancelled");
            job.transition(JobState::Cancelled);
            job.notify_waiters(&Err(Error::Cancelled));
        }
        cancelled
    }

    /// Execute a job to completion on the worker task itself, driving its
    /// waits inline. Only reachable from a re-entrant synchronous run.
    async fn run_inline(&self, mut job: Job) -> Result<Option<Value>> {
        debug!(job_id = %job.id(), "re-entrant synchronous run, executing inline");
        job.transition(JobState::Running);
        self.shared.set_current_job_name(job.name().map(str::to_owned));
        self.shared.hooks.fire(&ProcessorEvent::JobStarting { job: job.meta() });

        let result = loop {
            let step = AssertUnwindSafe(job.body.step()).catch_unwind().await;
            match step {
                Err(panic) => {
                    break Err(Error::JobFaulted {
                        reason: runner::panic_reason(panic),
                    });
                }
                Ok(Err(err)) => {
                    break Err(Error::JobFaulted {
                        reason: format!("{err:#}"),
                    });
                }
                Ok(Ok(Step::Done(value))) => break Ok(value),
                Ok(Ok(Step::Wait { signal, timeout })) => {
                    // Already inside a step on the worker; the wait is driven
                    // here rather than through the multiplexer.
                    let timed_out = tokio::select! {
                        _ = signal.wait() => false,
                        _ = tokio::time::sleep(timeout) => true,
                    };
                    if timed_out {
                        let handled =
                            AssertUnwindSafe(job.body.on_timeout()).catch_unwind().await;
                        if handled.is_err() {
                            break Err(Error::JobFaulted {
                                reason: "timeout handler panicked".to_string(),
                            });
                        }
                    }
                }
            }
        };

        job.transition(JobState::Completed);
        let outcome = match &result {
            Ok(value) => JobOutcome::Completed(value.clone()),
            Err(err) => JobOutcome::Faulted(err.clone()),
        };
        job.notify_waiters(&result);
        self.shared.hooks.fire(&ProcessorEvent::JobFinished {
            job: job.meta(),
            outcome,
        });
        result
    }
}
