//! jobq — single-worker asynchronous job processor.
//!
//! A [`JobProcessor`] accepts units of work from any thread or task, orders
//! them by priority (FIFO within a band), deduplicates equal submissions,
//! supports deferred and idle-time execution, and lets a job suspend
//! cooperatively pending an external signal with timeout. All job steps run
//! on one dedicated worker task, so job bodies get serialized access to
//! shared mutable state with no locking of their own.
//!
//! ```no_run
//! use jobq::{Job, JobProcessor, ProcessorConfig, Step};
//!
//! # async fn demo() -> jobq::Result<()> {
//! let processor = JobProcessor::start(ProcessorConfig::default());
//! processor.enqueue(Job::from_fn(|| async {
//!     // ... do work ...
//!     Ok(Step::Done(None))
//! }).with_name("refresh feeds"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod processor;

pub use config::{DEFAULT_WAIT_LIMIT, IdleProbe, ProcessorConfig};
pub use error::{Error, Result};
pub use job::{Job, JobBody, JobKey, JobMeta, JobState, Priority, Signal, Step};
pub use processor::{JobOutcome, JobProcessor, ProcessorEvent, UniqueRun};
