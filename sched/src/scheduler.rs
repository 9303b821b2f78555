//! Scheduler core
//!
//! The central choose/switch machinery: priority recomputation, timeslice
//! accounting, preemption checks, fork/exit hand-off and the dispatcher
//! itself. One [`Scheduler`] instance drives one fleet of per-CPU runqueues;
//! hosts call [`Scheduler::schedule`] from the CPU being scheduled, with
//! preemption disabled.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicBool, Ordering};

use bitflags::bitflags;
use log::{debug, trace};
use spin::{Mutex, MutexGuard};

use crate::config::{SchedConfig, YieldType, MAX_CPUS, MAX_PRIORITY_ADJ, MAX_RT_PRIO};
use crate::cpumask::{AtomicCpuMask, CpuId, CpuMask};
use crate::error::{SchedError, SchedResult};
use crate::metrics::{MetricsSummary, SchedulerMetrics};
use crate::platform::Platform;
use crate::rq::{CacheAligned, DequeueFlags, EnqueueFlags, Runqueue};
use crate::task::{
    boost_threshold, nice_to_static_prio, OnRq, SchedPolicy, Task, TaskState,
};
use crate::topology::{CpuTopology, TopologyDesc};
use crate::watermark::WatermarkIndex;

bitflags! {
    /// Clone flags of interest to `sched_fork`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CloneFlags: u64 {
        /// Child shares the parent's address space.
        const VM = 0x100;
        /// Child is a thread of the parent's group.
        const THREAD = 0x10000;
    }
}

/// Task ids `IDLE_TASK_ID_BASE + cpu` are reserved for the per-CPU idle
/// tasks the scheduler creates itself.
pub const IDLE_TASK_ID_BASE: u64 = u64::MAX - MAX_CPUS as u64;

/// State shared by every runqueue: configuration, collaborators, and the
/// process-wide indexes. Each per-CPU slot of the masks has a single writer
/// (the owning CPU, under its runqueue lock); readers are lock-free.
pub(crate) struct SchedShared {
    pub config: SchedConfig,
    pub platform: Arc<dyn Platform>,
    pub topology: CpuTopology,
    pub watermark: WatermarkIndex,
    /// CPUs with more than one queued task; pull candidates.
    pub pending: AtomicCpuMask,
    pub online: AtomicCpuMask,
    pub active: AtomicCpuMask,
    pub need_resched: Vec<AtomicBool>,
    /// Per-CPU one-shot guard for SMT active balance.
    pub active_balance: Vec<AtomicBool>,
    pub metrics: SchedulerMetrics,
}

/// A priority-bitmap multi-queue scheduler over `nr_cpus` runqueues.
pub struct Scheduler {
    pub(crate) shared: SchedShared,
    pub(crate) rqs: Vec<CacheAligned<Mutex<Runqueue>>>,
}

impl Scheduler {
    /// Build a scheduler for the described machine. All CPUs start online
    /// and active, running their idle tasks.
    pub fn new(
        config: SchedConfig,
        desc: &TopologyDesc,
        platform: Arc<dyn Platform>,
    ) -> SchedResult<Scheduler> {
        config.validate()?;
        if desc.nr_cpus == 0 || desc.nr_cpus as usize > MAX_CPUS {
            return Err(SchedError::InvalidArgument { name: "nr_cpus" });
        }
        let nr_cpus = desc.nr_cpus;
        let topology = CpuTopology::build(desc);
        let watermark = WatermarkIndex::new(nr_cpus);

        let mut rqs = Vec::with_capacity(nr_cpus as usize);
        for cpu in 0..nr_cpus {
            let idle = Arc::new(Task::new_idle(IDLE_TASK_ID_BASE + cpu as u64, cpu));
            idle.set_on_cpu(true);
            rqs.push(CacheAligned(Mutex::new(Runqueue::new(cpu, idle))));
        }

        let shared = SchedShared {
            config,
            platform,
            topology,
            watermark,
            pending: AtomicCpuMask::default(),
            online: AtomicCpuMask::new(CpuMask::all(nr_cpus)),
            active: AtomicCpuMask::new(CpuMask::all(nr_cpus)),
            need_resched: (0..nr_cpus).map(|_| AtomicBool::new(false)).collect(),
            active_balance: (0..nr_cpus).map(|_| AtomicBool::new(false)).collect(),
            metrics: SchedulerMetrics::new(),
        };

        let sched = Scheduler { shared, rqs };
        for cpu in 0..nr_cpus {
            let mut rq = sched.rqs[cpu as usize].0.lock();
            rq.update_clock(&sched.shared);
            rq.refresh_watermark(&sched.shared);
        }
        debug!("scheduler up: {} cpus", nr_cpus);
        Ok(sched)
    }

    pub fn nr_cpus(&self) -> u32 {
        self.rqs.len() as u32
    }

    /// Snapshot of the activity counters.
    pub fn metrics(&self) -> MetricsSummary {
        self.shared.metrics.summary()
    }

    pub fn online_mask(&self) -> CpuMask {
        self.shared.online.load()
    }

    /// Task currently executing on `cpu`.
    pub fn current_task(&self, cpu: CpuId) -> Arc<Task> {
        Arc::clone(&self.rqs[cpu as usize].0.lock().curr)
    }

    /// Whether `cpu` has nothing queued beyond its idle task.
    pub fn idle_cpu(&self, cpu: CpuId) -> bool {
        self.shared.watermark.cpu_is_idle(cpu)
    }

    /// Queued runnable tasks on `cpu`, idle task excluded.
    pub fn nr_running(&self, cpu: CpuId) -> u32 {
        self.rqs[cpu as usize].0.lock().nr_running
    }

    pub fn nr_running_total(&self) -> u32 {
        (0..self.nr_cpus()).map(|cpu| self.nr_running(cpu)).sum()
    }

    /// Tasks on `cpu` in uninterruptible sleep.
    pub fn nr_uninterruptible(&self, cpu: CpuId) -> u32 {
        self.rqs[cpu as usize].0.lock().nr_uninterruptible
    }

    /// Tasks that went to sleep on `cpu` waiting for I/O.
    pub fn nr_iowait(&self, cpu: CpuId) -> u32 {
        self.rqs[cpu as usize].0.lock().nr_iowait
    }

    /// Context switches performed on `cpu`.
    pub fn switch_count(&self, cpu: CpuId) -> u64 {
        self.rqs[cpu as usize].0.lock().switch_count
    }

    /// Whether a reschedule has been requested on `cpu` and not yet served.
    pub fn need_resched(&self, cpu: CpuId) -> bool {
        self.shared.need_resched[cpu as usize].load(Ordering::Acquire)
    }

    /// Effective priority of `task`; smaller is more urgent.
    pub fn task_prio(&self, task: &Task) -> i32 {
        task.prio()
    }

    /// Accumulated runtime of `task`, including the running streak of a
    /// currently executing task.
    pub fn task_runtime_ns(&self, task: &Arc<Task>) -> u64 {
        let mut rq = self.task_rq_lock(task);
        if Arc::ptr_eq(&rq.curr, task) {
            rq.update_clock(&self.shared);
            self.update_curr(&rq, task);
        }
        task.stats.runtime_ns.load(Ordering::Relaxed)
    }

    // ===== Lock helpers =====

    /// Lock the runqueue owning `task`, spinning while the task is in
    /// flight between two runqueues.
    pub(crate) fn task_rq_lock(&self, task: &Task) -> MutexGuard<'_, Runqueue> {
        loop {
            let cpu = task.cpu();
            let rq = self.rqs[cpu as usize].0.lock();
            if task.cpu() == cpu && task.on_rq() != OnRq::Migrating {
                return rq;
            }
            drop(rq);
            core::hint::spin_loop();
        }
    }

    /// Request a reschedule on `cpu`; sends the kick only on the first
    /// request since the last `schedule`.
    pub(crate) fn resched_curr(&self, cpu: CpuId) {
        if !self.shared.need_resched[cpu as usize].swap(true, Ordering::AcqRel) {
            self.shared.platform.send_reschedule_ipi(cpu);
        }
    }

    /// Preemption check after `task` became runnable on `rq`.
    pub(crate) fn check_preempt(&self, rq: &Runqueue, task: &Arc<Task>) {
        if rq.curr.is_idle_task() {
            self.resched_curr(rq.cpu);
            return;
        }
        // Equal-priority real-time tasks append behind the incumbent, so a
        // FIFO peer never trips this.
        if rq.pbq.first_is(task) {
            self.resched_curr(rq.cpu);
        }
    }

    // ===== Runtime accounting =====

    /// Charge `task` for the time it ran since the last accounting point.
    pub(crate) fn update_curr(&self, rq: &Runqueue, task: &Arc<Task>) {
        let delta = rq.clock_task.saturating_sub(task.last_ran());
        task.set_last_ran(rq.clock_task);
        task.stats.runtime_ns.fetch_add(delta, Ordering::Relaxed);
        task.set_time_slice(task.time_slice().saturating_sub(delta));
    }

    /// Account the outgoing task and handle slice expiry: refill, deboost
    /// (RR exempt), and requeue at the tail of the new bucket.
    fn check_curr(&self, rq: &mut Runqueue, prev: &Arc<Task>) {
        if prev.is_idle_task() {
            return;
        }
        self.update_curr(rq, prev);
        if prev.time_slice() < self.shared.config.resched_ns
            && prev.policy() != SchedPolicy::Fifo
        {
            prev.set_time_slice(self.shared.config.timeslice_ns);
            if !prev.is_realtime() {
                prev.deboost();
            }
            if prev.on_rq() == OnRq::Queued {
                rq.requeue(prev, &self.shared);
            }
        }
    }

    // ===== Dispatcher =====

    /// Voluntary entry to the dispatcher: the current task blocks, exits,
    /// or yields. Returns the task now running on `cpu`.
    pub fn schedule(&self, cpu: CpuId) -> Arc<Task> {
        self.do_schedule(cpu, false)
    }

    /// Preemption entry: the current task stays runnable.
    pub fn schedule_preempted(&self, cpu: CpuId) -> Arc<Task> {
        self.do_schedule(cpu, true)
    }

    fn do_schedule(&self, cpu: CpuId, preempted: bool) -> Arc<Task> {
        let mut rq = self.rqs[cpu as usize].0.lock();
        fence(Ordering::SeqCst);
        rq.update_clock(&self.shared);
        let prev = Arc::clone(&rq.curr);
        let mut prev_blocked = false;

        if !preempted && !prev.is_idle_task() && prev.state() != TaskState::Running {
            if prev.state() == TaskState::Interruptible
                && self.shared.platform.signal_pending(&prev)
            {
                // The pending signal cancels the sleep.
                prev.set_state(TaskState::Running);
            } else {
                if prev.state() != TaskState::Dead {
                    self.boost_on_block(&rq, &prev);
                }
                if prev.state() == TaskState::Uninterruptible {
                    rq.nr_uninterruptible += 1;
                }
                if prev.on_rq() == OnRq::Queued {
                    rq.dequeue(&prev, DequeueFlags::SLEEP, &self.shared);
                    prev.set_on_rq(OnRq::Off);
                }
                prev_blocked = true;
            }
        }

        self.shared.need_resched[cpu as usize].store(false, Ordering::Release);
        self.check_curr(&mut rq, &prev);

        let next = self.choose_next(&mut rq);
        if Arc::ptr_eq(&next, &prev) {
            // Same task keeps the CPU; re-arm the slice timer in case
            // check_curr just refilled it.
            if !prev.is_idle_task() && prev.policy() != SchedPolicy::Fifo {
                self.shared
                    .platform
                    .hrtimer_start(cpu, prev.time_slice().max(self.shared.config.resched_ns));
            }
            return next;
        }

        rq.curr = Arc::clone(&next);
        next.set_on_cpu(true);
        next.set_dispatched_at(rq.clock_task);
        next.set_last_ran(rq.clock_task);
        next.stats.dispatches.fetch_add(1, Ordering::Relaxed);
        rq.switch_count += 1;

        if next.is_idle_task() || next.policy() == SchedPolicy::Fifo {
            self.shared.platform.hrtimer_cancel(cpu);
        } else {
            self.shared
                .platform
                .hrtimer_start(cpu, next.time_slice().max(self.shared.config.resched_ns));
        }

        if next.is_idle_task() {
            self.shared.metrics.record_idle_scheduled();
        }
        self.shared.metrics.record_context_switch(prev_blocked);
        let stat = if prev_blocked {
            &prev.stats.voluntary_switches
        } else {
            &prev.stats.involuntary_switches
        };
        stat.fetch_add(1, Ordering::Relaxed);

        trace!("cpu {}: switch {} -> {}", cpu, prev.id(), next.id());
        drop(rq);

        // Finalize the outgoing task. The release store pairs with the
        // acquire spin in the wake path, publishing everything prev did on
        // this CPU before any other CPU may run it.
        prev.set_on_cpu(false);
        self.smt_balance_check(cpu);
        next
    }

    /// Reward a task that blocks after only a short run streak.
    fn boost_on_block(&self, rq: &Runqueue, prev: &Arc<Task>) {
        if prev.is_realtime() {
            return;
        }
        let streak = rq.clock_task.saturating_sub(prev.dispatched_at());
        if streak < boost_threshold(self.shared.config.timeslice_ns, prev.boost_prio()) {
            prev.boost();
        }
    }

    /// Pick the next task: honour the yield hint, pull work if only idle is
    /// left, fall back to the resident idle task.
    fn choose_next(&self, rq: &mut Runqueue) -> Arc<Task> {
        let skip = rq.take_skip();
        let mut next = {
            let first = rq.pbq.first();
            match &skip {
                Some(s) if first.id() == s.id() => Arc::clone(rq.pbq.next_after(s)),
                _ => Arc::clone(first),
            }
        };
        if next.is_idle_task() && self.shared.online.load().contains(rq.cpu) {
            if self.pull_tasks(rq) > 0 {
                next = Arc::clone(rq.pbq.first());
            } else if skip.as_ref().is_some_and(|s| s.on_rq() == OnRq::Queued) {
                // Nothing better anywhere; the yielder keeps the CPU.
                next = Arc::clone(rq.pbq.first());
            }
        }
        next
    }

    // ===== Lifecycle =====

    /// Prepare a freshly forked task: pessimistic boost, half the parent's
    /// remaining slice. The child is not runnable until
    /// [`wake_up_new_task`](Self::wake_up_new_task).
    pub fn sched_fork(&self, child: &Arc<Task>, parent: &Arc<Task>, clone_flags: CloneFlags) {
        let _pi = child.pi_lock.lock();
        child.set_state(TaskState::New);
        child.set_on_rq(OnRq::Off);
        child.set_boost_prio(MAX_PRIORITY_ADJ);
        child.set_cpus_mask(parent.cpus_mask());
        child.recompute_prio();

        let mut rq = self.task_rq_lock(parent);
        rq.update_clock(&self.shared);
        if Arc::ptr_eq(&rq.curr, parent) {
            self.update_curr(&rq, parent);
        }
        let half = parent.time_slice() / 2;
        parent.set_time_slice(parent.time_slice() - half);
        child.set_time_slice(half);
        child.set_cpu(parent.cpu());
        trace!("fork: task {} from {} ({:?})", child.id(), parent.id(), clone_flags);
    }

    /// Activate a forked task on a chosen CPU.
    pub fn wake_up_new_task(&self, task: &Arc<Task>) {
        let _pi = task.pi_lock.lock();
        fence(Ordering::SeqCst);
        debug_assert_eq!(task.state(), TaskState::New);
        task.set_state(TaskState::Running);
        if task.time_slice() == 0 {
            // Not forked through sched_fork; start with a fresh slice.
            task.set_time_slice(self.shared.config.timeslice_ns);
        }
        let cpu = self.shared.select_target(task);
        task.set_cpu(cpu);

        let mut rq = self.rqs[cpu as usize].0.lock();
        rq.update_clock(&self.shared);
        rq.enqueue(task, EnqueueFlags::WAKEUP, &self.shared);
        task.set_on_rq(OnRq::Queued);
        task.stats.wakeups.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.record_wakeup();
        self.check_preempt(&rq, task);
    }

    /// Tear a task out of the scheduler. Final cleanup happens when the
    /// owning CPU switches away from it.
    pub fn sched_exit(&self, task: &Arc<Task>) {
        let _pi = task.pi_lock.lock();
        let mut rq = self.task_rq_lock(task);
        rq.update_clock(&self.shared);
        if Arc::ptr_eq(&rq.curr, task) {
            self.update_curr(&rq, task);
        }
        if task.on_rq() == OnRq::Queued {
            rq.dequeue(task, DequeueFlags::empty(), &self.shared);
            task.set_on_rq(OnRq::Off);
        }
        task.set_state(TaskState::Dead);
        if Arc::ptr_eq(&rq.curr, task) {
            self.resched_curr(rq.cpu);
        }
    }

    // ===== Tick =====

    /// Timer-interrupt hook, invoked at fixed HZ on each CPU.
    pub fn scheduler_tick(&self, cpu: CpuId) {
        let mut rq = self.rqs[cpu as usize].0.lock();
        rq.update_clock(&self.shared);
        let curr = Arc::clone(&rq.curr);
        if curr.is_idle_task() {
            return;
        }
        self.update_curr(&rq, &curr);
        if curr.policy() != SchedPolicy::Fifo
            && curr.time_slice() < self.shared.config.resched_ns
        {
            self.resched_curr(cpu);
        }
    }

    // ===== Parameter changes =====

    /// Change `task`'s policy and priority. Deadline requests are folded
    /// onto the top FIFO band.
    pub fn set_policy(
        &self,
        task: &Arc<Task>,
        policy: SchedPolicy,
        rt_priority: i32,
        nice: i32,
    ) -> SchedResult<()> {
        let (policy, rt_priority) = match policy {
            SchedPolicy::Deadline => (SchedPolicy::Fifo, MAX_RT_PRIO - 1),
            p => (p, rt_priority),
        };
        if policy.is_realtime() {
            if !(1..MAX_RT_PRIO).contains(&rt_priority) {
                return Err(SchedError::PriorityOutOfRange {
                    prio: rt_priority,
                    min: 1,
                    max: MAX_RT_PRIO - 1,
                });
            }
        } else if rt_priority != 0 {
            return Err(SchedError::PriorityOutOfRange {
                prio: rt_priority,
                min: 0,
                max: 0,
            });
        }
        if !(-20..=19).contains(&nice) {
            return Err(SchedError::NiceOutOfRange { nice });
        }
        if task.is_idle_task() {
            return Err(SchedError::PermissionDenied {
                operation: "change idle task policy",
            });
        }

        let _pi = task.pi_lock.lock();
        let mut rq = self.task_rq_lock(task);
        rq.update_clock(&self.shared);
        task.set_policy_fields(
            policy,
            nice_to_static_prio(nice),
            if policy.is_realtime() { rt_priority } else { 0 },
        );
        if policy.is_realtime() {
            task.set_boost_prio(0);
        } else if task.boost_prio() < policy.boost_floor() {
            task.set_boost_prio(policy.boost_floor());
        }
        task.recompute_prio();

        if task.on_rq() == OnRq::Queued {
            rq.requeue_lazy(task, &self.shared);
            if !Arc::ptr_eq(&rq.curr, task) {
                self.check_preempt(&rq, task);
            }
        }
        if Arc::ptr_eq(&rq.curr, task) && !rq.pbq.first_is(task) {
            self.resched_curr(rq.cpu);
        }
        Ok(())
    }

    /// Priority-inheritance hook: run `task` at the donor's priority, or
    /// drop back to its own when the donor is gone.
    pub fn set_effective_prio(&self, task: &Arc<Task>, donor: Option<&Task>) {
        let _pi = task.pi_lock.lock();
        let mut rq = self.task_rq_lock(task);
        task.set_donor_prio(donor.map(|d| d.prio()));
        task.recompute_prio();
        if task.on_rq() == OnRq::Queued {
            rq.requeue_lazy(task, &self.shared);
            if !Arc::ptr_eq(&rq.curr, task) {
                self.check_preempt(&rq, task);
            }
        }
        if Arc::ptr_eq(&rq.curr, task) && !rq.pbq.first_is(task) {
            self.resched_curr(rq.cpu);
        }
    }

    // ===== Yield =====

    /// Give up the CPU according to the configured yield behaviour, then
    /// reschedule. Returns the task now running on `cpu`.
    pub fn yield_current(&self, cpu: CpuId) -> Arc<Task> {
        {
            let mut rq = self.rqs[cpu as usize].0.lock();
            rq.update_clock(&self.shared);
            let curr = Arc::clone(&rq.curr);
            if !curr.is_idle_task() {
                match self.shared.config.yield_type {
                    YieldType::None => {}
                    YieldType::Deboost => {
                        if !curr.is_realtime() {
                            curr.set_boost_prio(MAX_PRIORITY_ADJ);
                        }
                        if curr.on_rq() == OnRq::Queued {
                            rq.requeue(&curr, &self.shared);
                        }
                    }
                    YieldType::SkipHint => {
                        rq.skip = Some(Arc::clone(&curr));
                    }
                }
            }
        }
        self.schedule(cpu)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;
    use crate::config::{watermark_level, IDLE_WM};

    struct NoopPlatform;

    impl Platform for NoopPlatform {
        fn now_ns(&self, _cpu: CpuId) -> u64 {
            0
        }
        fn send_reschedule_ipi(&self, _cpu: CpuId) {}
        fn hrtimer_start(&self, _cpu: CpuId, _ns: u64) {}
        fn hrtimer_cancel(&self, _cpu: CpuId) {}
        fn stop_one_cpu(&self, _cpu: CpuId, _req: crate::platform::StopRequest) {}
    }

    fn sched(nr_cpus: u32) -> Scheduler {
        Scheduler::new(
            SchedConfig::default(),
            &TopologyDesc::flat(nr_cpus),
            Arc::new(NoopPlatform),
        )
        .expect("construction")
    }

    fn pinned(sched: &Scheduler, id: u64, cpu: CpuId) -> Arc<Task> {
        let t = Arc::new(Task::new(id, "t", SchedPolicy::Normal, 0, 0));
        sched.set_affinity(&t, CpuMask::single(cpu)).unwrap();
        sched.wake_up_new_task(&t);
        t
    }

    #[test]
    fn boots_with_idle_advertised_everywhere() {
        let s = sched(3);
        for cpu in 0..3 {
            assert!(s.current_task(cpu).is_idle_task());
            assert_eq!(s.shared.watermark.level_of(cpu), Some(IDLE_WM));
            assert_eq!(s.nr_running(cpu), 0);
        }
        assert!(s.shared.pending.load().is_empty());
    }

    #[test]
    fn watermark_follows_the_best_bucket() {
        let s = sched(2);
        let t = Arc::new(Task::new(1, "rt", SchedPolicy::Fifo, 0, 10));
        s.wake_up_new_task(&t);
        let cpu = t.cpu();
        assert_eq!(s.shared.watermark.level_of(cpu), Some(watermark_level(0)));

        s.sched_exit(&t);
        assert_eq!(s.shared.watermark.level_of(cpu), Some(IDLE_WM));
    }

    #[test]
    fn pending_mask_tracks_queue_depth() {
        let s = sched(2);
        let a = pinned(&s, 1, 0);
        assert!(!s.shared.pending.load().contains(0));

        let b = pinned(&s, 2, 0);
        assert!(s.shared.pending.load().contains(0));

        s.sched_exit(&b);
        assert!(!s.shared.pending.load().contains(0));
        s.sched_exit(&a);
        assert!(!s.shared.pending.load().contains(0));
    }

    #[test]
    fn queue_membership_survives_parameter_churn() {
        let s = sched(1);
        let t = pinned(&s, 1, 0);
        for _ in 0..4 {
            s.set_policy(&t, SchedPolicy::Fifo, 20, 0).unwrap();
            s.set_policy(&t, SchedPolicy::Normal, 0, -5).unwrap();
            s.set_policy(&t, SchedPolicy::Batch, 0, 10).unwrap();
        }
        let rq = s.rqs[0].0.lock();
        rq.pbq.assert_consistent();
        assert!(rq.pbq.contains(1));
        assert_eq!(rq.nr_running, 1);
    }

    #[test]
    fn a_task_is_never_resident_on_two_runqueues() {
        let s = sched(2);
        let t = pinned(&s, 1, 0);
        s.set_affinity(&t, CpuMask::all(2)).unwrap();
        for _ in 0..4 {
            s.set_affinity(&t, CpuMask::single(1)).unwrap();
            s.set_affinity(&t, CpuMask::single(0)).unwrap();
        }
        let here = s.rqs[0].0.lock().pbq.contains(1);
        let there = s.rqs[1].0.lock().pbq.contains(1);
        assert!(here ^ there);
        assert_eq!(t.on_rq(), OnRq::Queued);
    }
}
