//! Scheduler error types
//!
//! Parameter validation happens at the edges, before any runqueue lock is
//! taken. Inside the core the only failure paths are transient and retried;
//! broken invariants are assertion failures, not errors.

use core::fmt;

use crate::task::TaskId;

/// Errors surfaced by the parameter-change and affinity entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "scheduler errors must be handled, not silently discarded"]
pub enum SchedError {
    /// The requested scheduling policy is unknown or not permitted here.
    InvalidPolicy { policy: u32 },
    /// Priority outside the valid range for the requested policy.
    PriorityOutOfRange { prio: i32, min: i32, max: i32 },
    /// Nice value outside `[-20, 19]`.
    NiceOutOfRange { nice: i32 },
    /// The requested affinity mask contains no usable CPU.
    AffinityEmpty { task: TaskId },
    /// The task is a per-CPU kernel thread and may not change affinity.
    PinnedThread { task: TaskId },
    /// The caller is not allowed to perform the change.
    PermissionDenied { operation: &'static str },
    /// Lookup of a task that does not exist.
    TaskNotFound { task: TaskId },
    /// Allocation failure while building an affinity mask.
    NoMemory,
    /// A malformed configuration value.
    InvalidArgument { name: &'static str },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPolicy { policy } => {
                write!(f, "invalid scheduling policy {}", policy)
            }
            Self::PriorityOutOfRange { prio, min, max } => {
                write!(f, "priority {} outside [{}, {}]", prio, min, max)
            }
            Self::NiceOutOfRange { nice } => write!(f, "nice value {} outside [-20, 19]", nice),
            Self::AffinityEmpty { task } => {
                write!(f, "affinity mask for task {} selects no CPU", task)
            }
            Self::PinnedThread { task } => {
                write!(f, "task {} is pinned and may not change affinity", task)
            }
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied: {}", operation)
            }
            Self::TaskNotFound { task } => write!(f, "no such task {}", task),
            Self::NoMemory => write!(f, "out of memory"),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
        }
    }
}

/// Result alias for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;
