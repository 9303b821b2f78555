//! Per-CPU runqueue
//!
//! Owns the CPU's priority bitmap queue, the current task, the clocks and
//! the slice bookkeeping. Every method requires the runqueue lock, which the
//! caller expresses by holding `&mut Runqueue` obtained from the per-CPU
//! mutex. The lock also protects this CPU's slot in the watermark index and
//! pending mask; both are refreshed here whenever queue membership changes.

use alloc::sync::Arc;

use bitflags::bitflags;
use log::trace;

use crate::cpumask::CpuId;
use crate::pbq::PriorityBitmapQueue;
use crate::scheduler::SchedShared;
use crate::task::{Task, TaskFlags};

bitflags! {
    /// Context of an enqueue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnqueueFlags: u8 {
        /// Task is being woken from sleep.
        const WAKEUP = 1 << 0;
        /// Task arrives from another CPU.
        const MIGRATED = 1 << 1;
    }
}

bitflags! {
    /// Context of a dequeue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DequeueFlags: u8 {
        /// Task is going to sleep.
        const SLEEP = 1 << 0;
        /// Task leaves for another CPU.
        const MIGRATED = 1 << 1;
    }
}

/// Pad each runqueue to its own cache line.
#[repr(align(64))]
pub(crate) struct CacheAligned<T>(pub T);

pub(crate) struct Runqueue {
    pub cpu: CpuId,
    pub pbq: PriorityBitmapQueue,
    /// Task currently executing on this CPU; the idle task at rest.
    pub curr: Arc<Task>,
    pub idle: Arc<Task>,
    /// Monotonic wall clock of this runqueue.
    pub clock: u64,
    /// Clock charged to tasks: wall clock minus interrupt and stolen time.
    pub clock_task: u64,
    last_irq_ns: u64,
    last_steal_ns: u64,
    /// Queued runnable tasks, the resident idle task excluded.
    pub nr_running: u32,
    pub nr_uninterruptible: u32,
    pub nr_iowait: u32,
    /// One-shot yield hint consumed by the next pick.
    pub skip: Option<Arc<Task>>,
    pub switch_count: u64,
}

impl Runqueue {
    pub fn new(cpu: CpuId, idle: Arc<Task>) -> Self {
        let mut pbq = PriorityBitmapQueue::new();
        pbq.init_idle(Arc::clone(&idle));
        Self {
            cpu,
            pbq,
            curr: Arc::clone(&idle),
            idle,
            clock: 0,
            clock_task: 0,
            last_irq_ns: 0,
            last_steal_ns: 0,
            nr_running: 0,
            nr_uninterruptible: 0,
            nr_iowait: 0,
            skip: None,
            switch_count: 0,
        }
    }

    /// Advance `clock` to the platform's notion of now and charge the
    /// interrupt-free, steal-free remainder to `clock_task`. Both clocks are
    /// clamped monotonic.
    pub fn update_clock(&mut self, shared: &SchedShared) {
        let now = shared.platform.now_ns(self.cpu);
        if now <= self.clock {
            return;
        }
        let delta = now - self.clock;
        self.clock = now;

        let irq = shared.platform.irq_time_ns(self.cpu);
        let irq_delta = irq.saturating_sub(self.last_irq_ns);
        self.last_irq_ns = irq;

        let steal = shared.platform.steal_time_ns(self.cpu);
        let steal_delta = steal.saturating_sub(self.last_steal_ns);
        self.last_steal_ns = steal;

        self.clock_task += delta.saturating_sub(irq_delta + steal_delta);
    }

    /// Make `task` runnable on this CPU.
    pub fn enqueue(&mut self, task: &Arc<Task>, flags: EnqueueFlags, shared: &SchedShared) {
        debug_assert_eq!(task.cpu(), self.cpu, "task filed on foreign runqueue");
        debug_assert!(!task.is_idle_task());
        debug_assert!(
            !self.pbq.contains(task.id()),
            "task {} already queued",
            task.id()
        );

        let idx = task.sched_prio();
        self.pbq.insert(Arc::clone(task), idx);
        self.nr_running += 1;
        if self.nr_running > 1 {
            shared.pending.set(self.cpu);
        }
        self.refresh_watermark(shared);

        if flags.contains(EnqueueFlags::WAKEUP) && self.curr.is_idle_task() {
            shared.metrics.record_wake_to_idle();
        }
        if task.flags().contains(TaskFlags::IN_IOWAIT) {
            task.remove_flags(TaskFlags::IN_IOWAIT);
            self.nr_iowait = self.nr_iowait.saturating_sub(1);
            shared.platform.cpufreq_poke(self.cpu);
        }
        self.pbq.assert_consistent();
    }

    /// Remove `task` from the runnable set.
    pub fn dequeue(&mut self, task: &Arc<Task>, flags: DequeueFlags, shared: &SchedShared) {
        debug_assert_eq!(task.cpu(), self.cpu, "task filed on foreign runqueue");

        let _removed = self.pbq.remove(task);
        debug_assert!(_removed, "dequeue of unqueued task");
        self.nr_running = self.nr_running.saturating_sub(1);
        if self.nr_running <= 1 {
            shared.pending.clear(self.cpu);
        }
        self.refresh_watermark(shared);

        if flags.contains(DequeueFlags::SLEEP) && task.flags().contains(TaskFlags::IN_IOWAIT) {
            self.nr_iowait += 1;
        }
        self.pbq.assert_consistent();
    }

    /// Re-file `task` under its current priority, moving it to the tail of
    /// the (possibly unchanged) bucket.
    pub fn requeue(&mut self, task: &Arc<Task>, shared: &SchedShared) {
        debug_assert_eq!(task.cpu(), self.cpu);
        let _removed = self.pbq.remove(task);
        debug_assert!(_removed, "requeue of unqueued task");
        self.pbq.insert(Arc::clone(task), task.sched_prio());
        self.refresh_watermark(shared);
        self.pbq.assert_consistent();
    }

    /// As [`requeue`](Self::requeue), but a no-op when the bucket would not
    /// change. Returns whether the task actually moved.
    pub fn requeue_lazy(&mut self, task: &Arc<Task>, shared: &SchedShared) -> bool {
        if task.queue_idx() == task.sched_prio() {
            return false;
        }
        self.requeue(task, shared);
        true
    }

    /// Push this CPU's best bucket into the watermark index. Offline CPUs
    /// stay retired from the index.
    pub fn refresh_watermark(&self, shared: &SchedShared) {
        if !shared.online.load().contains(self.cpu) {
            return;
        }
        let bucket = self.pbq.first_bucket();
        trace!("cpu {} advertises bucket {}", self.cpu, bucket);
        shared
            .watermark
            .advertise_bucket(self.cpu, bucket, &shared.topology);
    }

    /// Consume the yield hint, if any.
    pub fn take_skip(&mut self) -> Option<Arc<Task>> {
        self.skip.take()
    }
}
