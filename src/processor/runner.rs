//! Scheduler loop — the single owner task driving admission, execution,
//! suspension, and completion.
//!
//! Exactly one job step executes at a time, which is what lets job bodies
//! touch shared mutable state without their own locking. Each iteration:
//! re-admit resumed waits, promote due timed jobs, dispatch the highest
//! ready job (or an idle job when the host is idle and nothing else is
//! runnable), and otherwise sleep until the next admission event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{Job, JobState, Step};

use super::events::{JobOutcome, ProcessorEvent};
use super::processor::Shared;
use super::waits::{ResumeCause, Resumption};

tokio::task_local! {
    /// Marks the scheduler's own task, so re-entrant synchronous runs can
    /// detect themselves and execute inline instead of deadlocking.
    static WORKER: Uuid;
}

/// True when the current task is the worker task of the given processor.
pub(crate) fn on_worker_task(id: Uuid) -> bool {
    WORKER.try_with(|worker| *worker == id).unwrap_or(false)
}

pub(crate) async fn run(shared: Arc<Shared>, resume_rx: UnboundedReceiver<Resumption>) {
    let id = shared.id;
    WORKER.scope(id, drive(shared, resume_rx)).await;
}

async fn drive(shared: Arc<Shared>, mut resume_rx: UnboundedReceiver<Resumption>) {
    debug!(processor = %shared.config.name, "scheduler loop started");
    loop {
        while let Ok(resumption) = resume_rx.try_recv() {
            readmit(&shared, resumption).await;
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            drain(&shared, &mut resume_rx).await;
            break;
        }

        match next_job(&shared) {
            Some((job, drained_ready)) => {
                execute(&shared, job).await;
                if drained_ready {
                    shared.hooks.fire(&ProcessorEvent::QueueGotEmpty);
                }
            }
            None => wait_for_work(&shared, &mut resume_rx).await,
        }
    }
    debug!(processor = %shared.config.name, "scheduler loop stopped");
}

/// Pick the next dispatchable job. Due timed jobs are promoted first, so a
/// timed job can never starve behind lower-priority backlog. The boolean is
/// true when the pop left the ready queue empty.
fn next_job(shared: &Shared) -> Option<(Job, bool)> {
    let mut q = shared.queues();

    let now = Instant::now();
    for mut job in q.timed.pop_due(now) {
        job.transition(JobState::Pending);
        debug!(job_id = %job.id(), "timed job due, promoting to ready queue");
        q.admit_ready(job);
    }

    if let Some(job) = q.pop_ready() {
        let drained = q.ready.is_empty();
        return Some((job, drained));
    }

    // Idle work only when nothing ready or due-timed exists and the host
    // currently reports idleness. The probe is re-checked every iteration,
    // so idleness lapsing stops further idle pulls after the current step.
    if (shared.config.idle_probe)() {
        if let Some(job) = q.idle.pop_highest() {
            return Some((job, false));
        }
    }

    None
}

/// Execute one continuation step of a dispatched job.
async fn execute(shared: &Arc<Shared>, mut job: Job) {
    job.transition(JobState::Running);
    shared.set_current_job_name(job.name().map(str::to_owned));
    shared.hooks.fire(&ProcessorEvent::JobStarting { job: job.meta() });
    debug!(
        job_id = %job.id(),
        name = job.name().unwrap_or(""),
        priority = %job.priority(),
        idle = job.is_idle(),
        "job starting"
    );

    let step = AssertUnwindSafe(job.body.step()).catch_unwind().await;
    match step {
        Err(panic) => {
            let reason = panic_reason(panic);
            warn!(job_id = %job.id(), %reason, "job step panicked");
            finish(shared, job, Err(Error::JobFaulted { reason }));
        }
        Ok(Err(err)) => {
            warn!(job_id = %job.id(), error = %err, "job step failed");
            finish(
                shared,
                job,
                Err(Error::JobFaulted {
                    reason: format!("{err:#}"),
                }),
            );
        }
        Ok(Ok(Step::Done(value))) => finish(shared, job, Ok(value)),
        Ok(Ok(Step::Wait { signal, timeout })) => {
            if let Err((job, err)) = shared.waits.register(job, signal, timeout) {
                warn!(job_id = %job.id(), error = %err, "suspension rejected");
                finish(shared, job, Err(err));
            }
        }
    }
}

/// Deliver a terminal result: state, synchronous waiters, then the event.
pub(super) fn finish(shared: &Shared, mut job: Job, result: Result<Option<serde_json::Value>>) {
    job.transition(JobState::Completed);
    let outcome = match &result {
        Ok(value) => JobOutcome::Completed(value.clone()),
        Err(err) => JobOutcome::Faulted(err.clone()),
    };
    job.notify_waiters(&result);
    debug!(job_id = %job.id(), faulted = outcome.is_faulted(), "job finished");
    shared.hooks.fire(&ProcessorEvent::JobFinished {
        job: job.meta(),
        outcome,
    });
}

/// Re-admit a job the wait multiplexer handed back.
async fn readmit(shared: &Arc<Shared>, resumption: Resumption) {
    let Resumption { mut job, cause } = resumption;
    match cause {
        ResumeCause::Released => {
            debug!(job_id = %job.id(), "suspended job released on shutdown");
            job.notify_waiters(&Err(Error::ShuttingDown));
        }
        ResumeCause::Signalled | ResumeCause::TimedOut => {
            if cause == ResumeCause::TimedOut {
                debug!(job_id = %job.id(), "wait timed out, invoking timeout handler");
                let handled = AssertUnwindSafe(job.body.on_timeout()).catch_unwind().await;
                if handled.is_err() {
                    warn!(job_id = %job.id(), "timeout handler panicked");
                    finish(
                        shared,
                        job,
                        Err(Error::JobFaulted {
                            reason: "timeout handler panicked".to_string(),
                        }),
                    );
                    return;
                }
            } else {
                debug!(job_id = %job.id(), "wait signalled, re-admitting");
            }
            job.transition(JobState::Pending);
            // The job has already started once: it re-enters the ready queue
            // at its original priority and is not re-registered for dedup.
            shared.queues().ready.insert(job);
        }
    }
}

/// Park until any admission event: a new job, the next timed deadline, an
/// idle re-poll, or a resumed wait.
async fn wait_for_work(shared: &Arc<Shared>, resume_rx: &mut UnboundedReceiver<Resumption>) {
    let (next_due, idle_parked) = {
        let q = shared.queues();
        (q.timed.next_due(), !q.idle.is_empty())
    };

    let idle_recheck = idle_parked.then(|| Instant::now() + shared.config.idle_poll_interval);
    let deadline = match (next_due, idle_recheck) {
        (Some(due), Some(poll)) => Some(due.min(poll)),
        (Some(due), None) => Some(due),
        (None, poll) => poll,
    };

    let timer = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shared.wake.notified() => {}
        resumption = resume_rx.recv() => {
            if let Some(resumption) = resumption {
                readmit(shared, resumption).await;
            }
        }
        _ = timer => {}
    }
}

/// Shutdown: discard all four admission structures, release the
/// multiplexer's waiters, and flush the resumption channel.
async fn drain(shared: &Arc<Shared>, resume_rx: &mut UnboundedReceiver<Resumption>) {
    let dropped = {
        let mut q = shared.queues();
        let mut dropped = q.ready.remove_matching(|_| true);
        dropped.extend(q.timed.remove_matching(|_| true));
        dropped.extend(q.idle.remove_matching(|_| true));
        q.dedup.clear();
        dropped
    };
    let discarded = dropped.len();
    for mut job in dropped {
        job.transition(JobState::Cancelled);
        job.notify_waiters(&Err(Error::ShuttingDown));
    }

    shared.waits.release_all();
    while shared.waits.outstanding() > 0 || !resume_rx.is_empty() {
        match resume_rx.recv().await {
            Some(Resumption { mut job, .. }) => {
                job.notify_waiters(&Err(Error::ShuttingDown));
            }
            None => break,
        }
    }

    if discarded > 0 {
        info!(discarded, "pending jobs discarded on shutdown");
    }
}

pub(crate) fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
