//! Collaborator contracts
//!
//! The scheduler core consumes its surroundings through this narrow trait:
//! time, cross-CPU kicks, the per-CPU stopper, and a handful of optional
//! hooks. Hosts hand in an `Arc<dyn Platform>` at construction.

use alloc::sync::Arc;

use crate::cpumask::{CpuId, CpuMask};
use crate::task::Task;

/// Work dispatched through the per-CPU stopper.
#[derive(Debug, Clone)]
pub enum StopRequest {
    /// Force-migrate `task` off its current CPU to `dest_cpu` after an
    /// affinity change or placement decision.
    MigrateTask { task: Arc<Task>, dest_cpu: CpuId },
    /// One-shot SMT rebalance: move the lone runner of a half-busy sibling
    /// group onto a fully idle group.
    ActiveBalance {
        task: Arc<Task>,
        src_cpu: CpuId,
        dest_cpu: CpuId,
    },
}

/// Services the host kernel provides to the scheduler core.
///
/// All methods may be called with runqueue locks *not* held unless noted.
pub trait Platform: Send + Sync {
    /// Monotonic per-CPU clock in nanoseconds; never decreases across calls
    /// on the same CPU.
    fn now_ns(&self, cpu: CpuId) -> u64;

    /// Best-effort reschedule kick; may race, may be lost on hot-unplug.
    fn send_reschedule_ipi(&self, cpu: CpuId);

    /// Arm a one-shot preemption timer on `cpu` after `ns` nanoseconds.
    fn hrtimer_start(&self, cpu: CpuId, ns: u64);

    /// Cancel any pending preemption timer on `cpu`.
    fn hrtimer_cancel(&self, cpu: CpuId);

    /// Synchronously arrange for `cpu` to execute
    /// [`crate::Scheduler::run_stopper`] with `req`, at a priority above any
    /// scheduler-controlled task. Completes even if `cpu` goes offline; the
    /// request runs on whichever CPU receives it.
    fn stop_one_cpu(&self, cpu: CpuId, req: StopRequest);

    /// Whether a pending signal should cancel `task`'s interruptible sleep.
    fn signal_pending(&self, _task: &Task) -> bool {
        false
    }

    /// Kick the frequency governor of `cpu` (I/O-wait wakeups, successful
    /// pulls).
    fn cpufreq_poke(&self, _cpu: CpuId) {}

    /// Cumulative interrupt time attributed to `cpu`, deducted from the
    /// task clock.
    fn irq_time_ns(&self, _cpu: CpuId) -> u64 {
        0
    }

    /// Cumulative paravirt-stolen time on `cpu`, deducted from the task
    /// clock.
    fn steal_time_ns(&self, _cpu: CpuId) -> u64 {
        0
    }

    /// Last-resort affinity for a task whose allowed set is entirely
    /// offline. The result is intersected with the possible-CPU set before
    /// use.
    fn cpuset_fallback(&self, _task: &Task) -> CpuMask {
        CpuMask::from_bits(!0)
    }
}
