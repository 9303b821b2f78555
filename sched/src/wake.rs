//! Wake path
//!
//! Transitions a sleeping task back to runnable on a chosen CPU. The
//! ordering protocol is the load-bearing part:
//!
//! - the outgoing `schedule` stores everything the task did, then clears
//!   `on_cpu` with release ordering;
//! - the waker spins on `on_cpu` with acquire loads, so once the spin ends
//!   it observes every side effect from the task's previous CPU;
//! - the CPU handover store is release-ordered before any store into the
//!   target runqueue.

use alloc::sync::Arc;
use core::sync::atomic::{fence, Ordering};

use log::trace;

use crate::rq::EnqueueFlags;
use crate::scheduler::Scheduler;
use crate::task::{OnRq, Task, TaskState, WakeFlags};

impl Scheduler {
    /// Wake `task` if its state matches `allowed`. Returns whether this
    /// call made it runnable (or found it already runnable).
    pub fn wake_up(&self, task: &Arc<Task>, allowed: WakeFlags) -> bool {
        let _pi = task.pi_lock.lock();
        fence(Ordering::SeqCst);

        if !allowed.admits(task.state()) {
            return false;
        }

        // Fast path: the task never left a runqueue (it is blocking right
        // now on another CPU, or was requeued before it got dequeued).
        // Flipping the state back to RUNNING under the owning lock is
        // enough; the in-flight schedule re-reads the state under that lock.
        if task.on_rq() == OnRq::Queued {
            let rq = self.task_rq_lock(task);
            if task.on_rq() == OnRq::Queued {
                task.set_state(TaskState::Running);
                task.stats.wakeups.fetch_add(1, Ordering::Relaxed);
                self.shared.metrics.record_wakeup();
                self.shared.metrics.record_remote_wakeup();
                drop(rq);
                return true;
            }
            drop(rq);
        }

        // Wait for the previous CPU to finish with the task; pairs with the
        // release store of `on_cpu` in the outgoing schedule.
        while task.on_cpu() {
            core::hint::spin_loop();
        }

        let was_uninterruptible = task.state() == TaskState::Uninterruptible;
        task.set_state(TaskState::Waking);

        let cpu = self.shared.select_target(task);
        if cpu != task.cpu() {
            task.stats.migrations.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_migration();
            task.set_cpu(cpu);
        }

        let mut rq = self.rqs[cpu as usize].0.lock();
        rq.update_clock(&self.shared);
        if was_uninterruptible {
            rq.nr_uninterruptible = rq.nr_uninterruptible.saturating_sub(1);
        }
        rq.enqueue(task, EnqueueFlags::WAKEUP, &self.shared);
        task.set_on_rq(OnRq::Queued);
        task.set_state(TaskState::Running);
        task.stats.wakeups.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.record_wakeup();
        self.check_preempt(&rq, task);
        trace!("wake: task {} -> cpu {}", task.id(), cpu);
        true
    }
}
