//! Error types for the job processor.

use crate::job::JobKey;

/// Top-level error type for the processor.
///
/// Timeouts are deliberately absent: a wait that times out is a normal
/// transition that invokes the job's own timeout handler, never an error.
/// Cancellation likewise never errors for the cancelling caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An equal job is already pending. Raised only by
    /// [`JobProcessor::run`](crate::processor::JobProcessor::run);
    /// `enqueue` merges and `run_unique` coalesces instead.
    #[error("an equal job is already pending ({key})")]
    DuplicateJob { key: JobKey },

    /// More jobs are suspended than the wait multiplexer supports.
    /// Surfaced to the submitter of the job that triggered the overflow.
    #[error("suspended-job limit of {limit} exceeded")]
    WaitLimitExceeded { limit: usize },

    /// The processor is shutting down and no longer admits work.
    #[error("job processor is shutting down")]
    ShuttingDown,

    /// A job step returned an error or panicked. The scheduler loop survives;
    /// the fault is reported through `JobFinished` and to synchronous waiters.
    #[error("job faulted: {reason}")]
    JobFaulted { reason: String },

    /// The job was cancelled while still queued.
    #[error("job was cancelled before it ran")]
    Cancelled,
}

/// Result type alias for the processor.
pub type Result<T> = std::result::Result<T, Error>;
