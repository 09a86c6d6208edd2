//! The job processor — admission structures, wait multiplexer, and the
//! single-worker scheduler loop.
//!
//! Core components:
//! - `ready` — priority queue, FIFO within a band
//! - `timed` — jobs deferred to a future instant
//! - `idle` — jobs eligible only while the host reports idleness
//! - `dedup` — equality-based merge of redundant submissions
//! - `waits` — cooperative suspension pending a signal or timeout
//! - `runner` — the scheduler loop owning all job state transitions
//! - `processor` — the thread-safe front door, [`JobProcessor`]

mod dedup;
pub mod events;
mod idle;
#[allow(clippy::module_inception)]
mod processor;
mod ready;
mod runner;
mod timed;
mod waits;

pub use events::{EventHook, JobOutcome, ProcessorEvent};
pub use processor::{JobProcessor, UniqueRun};
