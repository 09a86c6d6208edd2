//! Job model — priority, state machine, and the resumable execution contract.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use uuid::Uuid;

use crate::error::Result;

/// Scheduling priority. `Immediate` is the highest.
///
/// Jobs at the same priority dispatch in admission order (FIFO); across
/// priorities dispatch is strictly priority-descending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Immediate,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lowest => "lowest",
            Self::BelowNormal => "below_normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above_normal",
            Self::Immediate => "immediate",
        };
        write!(f, "{s}")
    }
}

/// State of a job.
///
/// Transitions are performed only by the scheduler loop; callers never
/// mutate job state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted to the ready or idle queue, not yet dispatched.
    Pending,
    /// Parked in the timed table, not yet due.
    Waiting,
    /// A step is currently executing on the worker.
    Running,
    /// Yielded the worker pending a signal or timeout.
    Suspended,
    /// Finished (successfully or faulted). Terminal.
    Completed,
    /// Cancelled while still queued. Terminal.
    Cancelled,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            // Admission
            (Pending, Waiting) | (Pending, Running) | (Pending, Cancelled) |
            // Timed promotion / timed cancellation
            (Waiting, Pending) | (Waiting, Cancelled) |
            // Step outcomes
            (Running, Completed) | (Running, Suspended) |
            // Signal or timeout re-admits
            (Suspended, Pending)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Caller-supplied equality capability.
///
/// Two submissions carrying equal keys are considered the same work: the
/// second `enqueue` merges with the first, `run` raises
/// [`Error::DuplicateJob`](crate::error::Error::DuplicateJob), and
/// cancellation can match by key. Key-less jobs are never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKey {
    /// Match a specific job instance.
    Id(Uuid),
    /// Match logically identical work (same operation over the same inputs).
    Tag(String),
}

impl JobKey {
    /// Convenience constructor for tag keys.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Tag(tag) => write!(f, "tag:{tag}"),
        }
    }
}

/// Wait target a suspended job resumes on.
///
/// Cloneable; the job keeps one clone and hands another to whatever external
/// collaborator will complete the wait. Firing before the wait is registered
/// still releases it (permit semantics), so there is no lost-wakeup race.
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<Notify>);

impl Signal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the job waiting on this signal.
    pub fn fire(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.0.notified().await;
    }
}

/// What a job step reports back to the scheduler loop.
#[derive(Debug)]
pub enum Step {
    /// The job is finished. The payload is delivered to synchronous waiters
    /// and `JobFinished` observers.
    Done(Option<Value>),
    /// Suspend until `signal` fires or `timeout` elapses, then step again.
    /// A timeout invokes the job's timeout handler first; the wait target is
    /// cleared either way.
    Wait { signal: Signal, timeout: Duration },
}

/// Resumable execution contract invoked by the scheduler loop.
///
/// `step` is called once per dispatch. A single-step job returns
/// [`Step::Done`] on the first call; a multi-step job returns [`Step::Wait`]
/// and is stepped again after its signal fires or its timeout elapses.
#[async_trait]
pub trait JobBody: Send {
    /// Perform one unit of work.
    async fn step(&mut self) -> anyhow::Result<Step>;

    /// Invoked by the loop exactly when a wait timed out before its signal
    /// arrived. The wait is already cleared: the job is re-dispatched as
    /// immediately resumable, not treated as failed.
    async fn on_timeout(&mut self) {}
}

struct FnBody<F>(F);

#[async_trait]
impl<F, Fut> JobBody for FnBody<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<Step>> + Send,
{
    async fn step(&mut self) -> anyhow::Result<Step> {
        (self.0)().await
    }
}

/// Read-only job metadata, exposed to cancellation predicates and events.
#[derive(Debug, Clone, Serialize)]
pub struct JobMeta {
    pub id: Uuid,
    pub name: Option<String>,
    pub key: Option<JobKey>,
    pub priority: Priority,
    pub is_idle: bool,
}

/// Result payload delivered to synchronous waiters on completion.
pub(crate) type Completion = Result<Option<Value>>;

/// A schedulable unit of work.
///
/// Built by a caller, admitted into exactly one admission structure, mutated
/// solely by the scheduler loop, and dropped on reaching a terminal state.
pub struct Job {
    id: Uuid,
    name: Option<String>,
    key: Option<JobKey>,
    priority: Priority,
    state: JobState,
    is_idle: bool,
    pub(crate) body: Box<dyn JobBody>,
    waiters: Vec<oneshot::Sender<Completion>>,
}

impl Job {
    /// Create a job around a body, at `Normal` priority.
    pub fn new(body: impl JobBody + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            key: None,
            priority: Priority::Normal,
            state: JobState::Pending,
            is_idle: false,
            body: Box::new(body),
            waiters: Vec::new(),
        }
    }

    /// Create a job from a resumable closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Step>> + Send,
    {
        Self::new(FnBody(f))
    }

    /// Attach a human-readable label. The last-started job name is
    /// observable through `JobProcessor::current_job_name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach an equality key for dedup and cancellation matching.
    pub fn with_key(mut self, key: JobKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Override the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn key(&self) -> Option<&JobKey> {
        self.key.as_ref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    /// Snapshot the metadata cancellation predicates and events see.
    pub fn meta(&self) -> JobMeta {
        JobMeta {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            priority: self.priority,
            is_idle: self.is_idle,
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        self.is_idle = true;
    }

    /// Move to a new state. Only the scheduler loop calls this; a faulting
    /// job may be forced terminal from any live phase.
    pub(crate) fn transition(&mut self, to: JobState) {
        debug_assert!(
            self.state.can_transition_to(to) || to == JobState::Completed,
            "illegal job state transition {} -> {}",
            self.state,
            to
        );
        self.state = to;
    }

    pub(crate) fn add_waiter(&mut self, tx: oneshot::Sender<Completion>) {
        self.waiters.push(tx);
    }

    /// Deliver the terminal result to every synchronous waiter.
    pub(crate) fn notify_waiters(&mut self, result: &Completion) {
        for tx in self.waiters.drain(..) {
            let _ = tx.send(result.clone());
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("is_idle", &self.is_idle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_total_order() {
        assert!(Priority::Immediate > Priority::AboveNormal);
        assert!(Priority::AboveNormal > Priority::Normal);
        assert!(Priority::Normal > Priority::BelowNormal);
        assert!(Priority::BelowNormal > Priority::Lowest);
    }

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Cancelled));
        assert!(JobState::Pending.can_transition_to(JobState::Waiting));
        assert!(JobState::Waiting.can_transition_to(JobState::Pending));
        assert!(JobState::Waiting.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Suspended));
        assert!(JobState::Suspended.can_transition_to(JobState::Pending));
    }

    #[test]
    fn state_transitions_invalid() {
        // Cancellation never interrupts a running step.
        assert!(!JobState::Running.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Suspended.can_transition_to(JobState::Cancelled));
        // Terminal states are final.
        assert!(!JobState::Completed.can_transition_to(JobState::Pending));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Running));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Suspended.is_terminal());
    }

    #[test]
    fn builder_defaults() {
        let job = Job::from_fn(|| async { Ok(Step::Done(None)) });
        assert_eq!(job.priority(), Priority::Normal);
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.name().is_none());
        assert!(job.key().is_none());
        assert!(!job.is_idle());
    }

    #[test]
    fn builder_overrides() {
        let job = Job::from_fn(|| async { Ok(Step::Done(None)) })
            .with_name("reindex")
            .with_key(JobKey::tag("reindex"))
            .with_priority(Priority::AboveNormal);
        assert_eq!(job.name(), Some("reindex"));
        assert_eq!(job.key(), Some(&JobKey::tag("reindex")));
        assert_eq!(job.priority(), Priority::AboveNormal);
    }

    #[test]
    fn job_key_equality() {
        assert_eq!(JobKey::tag("refresh"), JobKey::tag("refresh"));
        assert_ne!(JobKey::tag("refresh"), JobKey::tag("import"));
        let id = Uuid::new_v4();
        assert_eq!(JobKey::Id(id), JobKey::Id(id));
    }

    #[tokio::test]
    async fn signal_fires_before_wait() {
        let signal = Signal::new();
        signal.fire();
        // Permit semantics: the wait completes even though the fire came first.
        signal.wait().await;
    }

    #[test]
    fn job_state_serde() {
        let json = serde_json::to_string(&JobState::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobState::Suspended);
    }
}
