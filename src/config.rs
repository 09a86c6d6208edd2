//! Configuration types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Host-supplied idleness probe ("is the system idle right now?").
///
/// Consulted by the scheduler loop before pulling idle-queue work. The probe
/// is re-checked between idle dispatches, so idleness lapsing mid-run stops
/// further idle jobs after the current step.
pub type IdleProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Upper bound on concurrently suspended jobs. Mirrors the platform
/// wait-handle limit the processor's wait semantics were modeled on.
pub const DEFAULT_WAIT_LIMIT: usize = 64;

/// Processor configuration.
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Processor name, used in log fields.
    pub name: String,
    /// Maximum number of concurrently suspended jobs. Exceeding this bound
    /// faults the overflowing job with `Error::WaitLimitExceeded`; it is
    /// never silently truncated.
    pub max_suspended: usize,
    /// How often the idle probe is re-polled while idle work is parked and
    /// nothing else is runnable.
    pub idle_poll_interval: Duration,
    /// Host idleness probe. The default treats the system as always idle,
    /// so idle jobs run whenever no ready or due timed work exists.
    pub idle_probe: IdleProbe,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            name: "jobq".to_string(),
            max_suspended: DEFAULT_WAIT_LIMIT,
            idle_poll_interval: Duration::from_millis(250),
            idle_probe: Arc::new(|| true),
        }
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("name", &self.name)
            .field("max_suspended", &self.max_suspended)
            .field("idle_poll_interval", &self.idle_poll_interval)
            .finish_non_exhaustive()
    }
}
