//! Scheduler constants and runtime configuration

use crate::error::{SchedError, SchedResult};

/// Number of real-time priority levels; priorities `0..MAX_RT_PRIO` are
/// real-time, smaller is more urgent.
pub const MAX_RT_PRIO: i32 = 100;

/// Width of the nice range (-20..=19).
pub const NICE_WIDTH: i32 = 40;

/// One past the least urgent priority; the per-CPU idle task runs here.
pub const MAX_PRIO: i32 = MAX_RT_PRIO + NICE_WIDTH;

/// Range of the dynamic boost adjustment applied to non-real-time tasks.
/// `boost_prio` lives in `[-MAX_PRIORITY_ADJ, +MAX_PRIORITY_ADJ]`.
pub const MAX_PRIORITY_ADJ: i32 = 12;

/// Bucket index reserved for the per-CPU idle task.
pub const IDLE_BUCKET: usize = (NICE_WIDTH + 2 * MAX_PRIORITY_ADJ) as usize;

/// Number of buckets in a priority bitmap queue.
pub const NUM_BUCKETS: usize = IDLE_BUCKET + 1;

/// Number of watermark levels. Level 0 is the SMT sibling-group-idle level,
/// level `IDLE_WM` means "only the idle task", higher levels mean more
/// urgent work is queued.
pub const NUM_WM_LEVELS: usize = IDLE_BUCKET + 2;

/// Watermark level of a CPU running nothing but its idle task.
pub const IDLE_WM: usize = 1;

/// Maximum number of CPUs supported; CPU masks are a single 64-bit word.
pub const MAX_CPUS: usize = 64;

/// Default base timeslice handed to a task on dispatch/refill.
pub const DEFAULT_TIMESLICE_NS: u64 = 4_000_000;

/// Remaining-slice threshold below which a reschedule is requested.
pub const DEFAULT_RESCHED_NS: u64 = 100_000;

/// Maximum number of tasks moved by a single idle pull.
pub const DEFAULT_MIGRATION_CAP: usize = 32;

/// Watermark level advertised by a CPU whose best bucket is `bucket`.
#[inline]
pub const fn watermark_level(bucket: usize) -> usize {
    IDLE_BUCKET - bucket + 1
}

/// Behaviour of [`crate::Scheduler::yield_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YieldType {
    /// Yield is a no-op.
    None,
    /// Fully deboost the caller and requeue it at the tail of its new bucket.
    #[default]
    Deboost,
    /// Leave the caller in place but set the run-once skip hint.
    SkipHint,
}

/// Runtime scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedConfig {
    /// Base slice size in nanoseconds.
    pub timeslice_ns: u64,
    /// "Too little left" threshold in nanoseconds.
    pub resched_ns: u64,
    /// Yield behaviour.
    pub yield_type: YieldType,
    /// Max tasks moved per idle pull.
    pub migration_cap: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            timeslice_ns: DEFAULT_TIMESLICE_NS,
            resched_ns: DEFAULT_RESCHED_NS,
            yield_type: YieldType::default(),
            migration_cap: DEFAULT_MIGRATION_CAP,
        }
    }
}

impl SchedConfig {
    /// Validate the configuration at scheduler construction time.
    pub fn validate(&self) -> SchedResult<()> {
        if self.timeslice_ns == 0 || self.resched_ns >= self.timeslice_ns {
            return Err(SchedError::InvalidArgument {
                name: "timeslice_ns",
            });
        }
        if self.migration_cap == 0 {
            return Err(SchedError::InvalidArgument {
                name: "migration_cap",
            });
        }
        Ok(())
    }
}
