//! Task handle and priority arithmetic
//!
//! Tasks are externally owned `Arc<Task>` handles. The scheduler reads and
//! writes the contract fields below; it never owns the task itself. Queues
//! hold clones of the handle and refer back to CPUs by index only.
//!
//! Field protection follows a composite rule: `state`, `on_cpu`, `on_rq` and
//! `cpu` are atomics with explicit acquire/release ordering on the wakeup
//! fast path; the scheduling parameters change under the task's `pi_lock`
//! plus the owning runqueue lock; the slice bookkeeping changes only under
//! the owning runqueue lock.

use alloc::string::String;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::config::{IDLE_BUCKET, MAX_PRIO, MAX_PRIORITY_ADJ, MAX_RT_PRIO};
use crate::cpumask::{AtomicCpuMask, CpuId, CpuMask};

/// Stable task identifier assigned by the host.
pub type TaskId = u64;

/// Scheduling policy of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SchedPolicy {
    /// Interactive timesharing; boost floor `-MAX_PRIORITY_ADJ`.
    #[default]
    Normal = 0,
    /// Throughput-oriented timesharing; never boosted above its static level.
    Batch = 1,
    /// Background timesharing, weakest non-idle class.
    IdlePolicy = 2,
    /// Real-time round-robin.
    Rr = 3,
    /// Real-time FIFO.
    Fifo = 4,
    /// Deadline requests are folded onto FIFO at the top real-time priority
    /// when applied; no task ever stores this policy.
    Deadline = 5,
}

impl SchedPolicy {
    pub const fn is_realtime(self) -> bool {
        matches!(self, SchedPolicy::Rr | SchedPolicy::Fifo)
    }

    fn from_u8(raw: u8) -> SchedPolicy {
        match raw {
            0 => SchedPolicy::Normal,
            1 => SchedPolicy::Batch,
            2 => SchedPolicy::IdlePolicy,
            3 => SchedPolicy::Rr,
            4 => SchedPolicy::Fifo,
            _ => SchedPolicy::Deadline,
        }
    }

    /// Lowest `boost_prio` this policy may reach through blocking boosts.
    pub const fn boost_floor(self) -> i32 {
        match self {
            SchedPolicy::Normal => -MAX_PRIORITY_ADJ,
            _ => 0,
        }
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Interruptible = 1,
    Uninterruptible = 2,
    Waking = 3,
    New = 4,
    Dead = 5,
}

impl TaskState {
    fn from_u8(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::Running,
            1 => TaskState::Interruptible,
            2 => TaskState::Uninterruptible,
            3 => TaskState::Waking,
            4 => TaskState::New,
            _ => TaskState::Dead,
        }
    }
}

/// Queuedness of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OnRq {
    /// Not linked in any runqueue.
    Off = 0,
    /// Linked in exactly one runqueue's priority bitmap queue.
    Queued = 1,
    /// In flight between two runqueues; readers spin rather than lock.
    Migrating = 2,
}

impl OnRq {
    fn from_u8(raw: u8) -> OnRq {
        match raw {
            1 => OnRq::Queued,
            2 => OnRq::Migrating,
            _ => OnRq::Off,
        }
    }
}

bitflags! {
    /// Task attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Per-CPU idle task; permanently resident in the idle bucket.
        const IDLE = 1 << 0;
        /// Per-CPU kernel thread; never migrated, affinity locked.
        const PER_CPU_KTHREAD = 1 << 1;
        /// Task is sleeping in I/O wait; wakeups poke the frequency governor.
        const IN_IOWAIT = 1 << 2;
    }
}

bitflags! {
    /// State mask accepted by [`crate::Scheduler::wake_up`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WakeFlags: u8 {
        const INTERRUPTIBLE = 1 << 0;
        const UNINTERRUPTIBLE = 1 << 1;
        /// Either kind of sleep.
        const NORMAL = Self::INTERRUPTIBLE.bits() | Self::UNINTERRUPTIBLE.bits();
    }
}

impl WakeFlags {
    /// Whether a task in `state` is eligible for this wake.
    pub fn admits(self, state: TaskState) -> bool {
        match state {
            TaskState::Interruptible => self.contains(WakeFlags::INTERRUPTIBLE),
            TaskState::Uninterruptible => self.contains(WakeFlags::UNINTERRUPTIBLE),
            _ => false,
        }
    }
}

/// Task runtime statistics.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Total observed runtime in nanoseconds.
    pub runtime_ns: AtomicU64,
    /// Number of times dispatched.
    pub dispatches: AtomicU64,
    /// Voluntary context switches (block, yield).
    pub voluntary_switches: AtomicU64,
    /// Involuntary context switches (preemption, slice expiry).
    pub involuntary_switches: AtomicU64,
    /// Cross-CPU migrations.
    pub migrations: AtomicU64,
    /// Successful wakeups.
    pub wakeups: AtomicU64,
}

/// Sentinel for "no priority-inheritance donor".
const NO_DONOR: i32 = i32::MAX;

/// A schedulable entity.
///
/// Constructed by the host, handed to the scheduler as `Arc<Task>`.
pub struct Task {
    id: TaskId,
    name: String,
    flags: AtomicU32,

    policy: AtomicU8,
    static_prio: AtomicI32,
    rt_priority: AtomicI32,
    normal_prio: AtomicI32,
    prio: AtomicI32,
    boost_prio: AtomicI32,
    donor_prio: AtomicI32,

    queue_idx: AtomicUsize,
    time_slice: AtomicU64,
    last_ran: AtomicU64,
    dispatched_at: AtomicU64,

    state: AtomicU8,
    on_rq: AtomicU8,
    on_cpu: AtomicBool,
    cpu: AtomicU32,

    cpus_mask: AtomicCpuMask,
    nr_cpus_allowed: AtomicU32,

    /// Ordered outside every runqueue lock.
    pub pi_lock: Mutex<()>,
    pub stats: TaskStats,
}

impl Task {
    /// Create a task with the given policy parameters.
    ///
    /// `rt_priority` is meaningful only for RR/FIFO and must be in `[1, 99]`;
    /// `nice` must be in `[-20, 19]`. Range checking belongs to the policy
    /// entry points; this constructor clamps.
    pub fn new(id: TaskId, name: &str, policy: SchedPolicy, nice: i32, rt_priority: i32) -> Task {
        let policy = if policy == SchedPolicy::Deadline {
            SchedPolicy::Fifo
        } else {
            policy
        };
        let rt_priority = if policy.is_realtime() {
            rt_priority.clamp(1, MAX_RT_PRIO - 1)
        } else {
            0
        };
        let static_prio = nice_to_static_prio(nice.clamp(-20, 19));
        let normal = compute_normal_prio(policy, static_prio, rt_priority);
        Task {
            id,
            name: String::from(name),
            flags: AtomicU32::new(TaskFlags::empty().bits()),
            policy: AtomicU8::new(policy as u8),
            static_prio: AtomicI32::new(static_prio),
            rt_priority: AtomicI32::new(rt_priority),
            normal_prio: AtomicI32::new(normal),
            prio: AtomicI32::new(normal),
            boost_prio: AtomicI32::new(0),
            donor_prio: AtomicI32::new(NO_DONOR),
            queue_idx: AtomicUsize::new(0),
            time_slice: AtomicU64::new(0),
            last_ran: AtomicU64::new(0),
            dispatched_at: AtomicU64::new(0),
            state: AtomicU8::new(TaskState::New as u8),
            on_rq: AtomicU8::new(OnRq::Off as u8),
            on_cpu: AtomicBool::new(false),
            cpu: AtomicU32::new(0),
            cpus_mask: AtomicCpuMask::new(CpuMask::from_bits(!0)),
            nr_cpus_allowed: AtomicU32::new(64),
            pi_lock: Mutex::new(()),
            stats: TaskStats::default(),
        }
    }

    /// Create the idle task for `cpu`. It is pinned, permanently resident in
    /// the idle bucket, and runs at `MAX_PRIO`.
    pub fn new_idle(id: TaskId, cpu: CpuId) -> Task {
        let task = Task::new(id, "idle", SchedPolicy::IdlePolicy, 19, 0);
        task.flags.store(
            (TaskFlags::IDLE | TaskFlags::PER_CPU_KTHREAD).bits(),
            Ordering::Relaxed,
        );
        task.normal_prio.store(MAX_PRIO, Ordering::Relaxed);
        task.prio.store(MAX_PRIO, Ordering::Relaxed);
        task.queue_idx.store(IDLE_BUCKET, Ordering::Relaxed);
        task.cpu.store(cpu, Ordering::Relaxed);
        task.cpus_mask.store(CpuMask::single(cpu));
        task.nr_cpus_allowed.store(1, Ordering::Relaxed);
        task.state.store(TaskState::Running as u8, Ordering::Relaxed);
        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> TaskFlags {
        TaskFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: TaskFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn add_flags(&self, flags: TaskFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn remove_flags(&self, flags: TaskFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    pub fn is_idle_task(&self) -> bool {
        self.flags().contains(TaskFlags::IDLE)
    }

    // ===== Policy and priority =====

    pub fn policy(&self) -> SchedPolicy {
        SchedPolicy::from_u8(self.policy.load(Ordering::Relaxed))
    }

    pub(crate) fn set_policy_fields(&self, policy: SchedPolicy, static_prio: i32, rt_priority: i32) {
        self.policy.store(policy as u8, Ordering::Relaxed);
        self.static_prio.store(static_prio, Ordering::Relaxed);
        self.rt_priority.store(rt_priority, Ordering::Relaxed);
    }

    pub fn is_realtime(&self) -> bool {
        self.policy().is_realtime()
    }

    pub fn static_prio(&self) -> i32 {
        self.static_prio.load(Ordering::Relaxed)
    }

    pub fn rt_priority(&self) -> i32 {
        self.rt_priority.load(Ordering::Relaxed)
    }

    /// Effective priority; smaller is more urgent.
    pub fn prio(&self) -> i32 {
        self.prio.load(Ordering::Relaxed)
    }

    pub fn normal_prio(&self) -> i32 {
        self.normal_prio.load(Ordering::Relaxed)
    }

    pub fn boost_prio(&self) -> i32 {
        self.boost_prio.load(Ordering::Relaxed)
    }

    pub fn set_boost_prio(&self, boost: i32) {
        self.boost_prio
            .store(boost.clamp(-MAX_PRIORITY_ADJ, MAX_PRIORITY_ADJ), Ordering::Relaxed);
    }

    /// Priority donated by a priority-inheritance waiter, if any.
    pub fn donor_prio(&self) -> Option<i32> {
        match self.donor_prio.load(Ordering::Relaxed) {
            NO_DONOR => None,
            p => Some(p),
        }
    }

    pub(crate) fn set_donor_prio(&self, donor: Option<i32>) {
        self.donor_prio.store(donor.unwrap_or(NO_DONOR), Ordering::Relaxed);
    }

    /// Recompute `normal_prio` and `prio` from the current parameters and
    /// any PI donor. Caller holds `pi_lock` and the owning runqueue lock.
    pub(crate) fn recompute_prio(&self) {
        let normal = compute_normal_prio(self.policy(), self.static_prio(), self.rt_priority());
        self.normal_prio.store(normal, Ordering::Relaxed);
        let effective = match self.donor_prio() {
            Some(donor) => normal.min(donor),
            None => normal,
        };
        self.prio.store(effective, Ordering::Relaxed);
    }

    /// Bucket this task files under at its current priority.
    pub fn sched_prio(&self) -> usize {
        if self.is_idle_task() {
            return IDLE_BUCKET;
        }
        let prio = self.prio();
        if prio < MAX_RT_PRIO {
            return 0;
        }
        let idx = prio - MAX_RT_PRIO + self.boost_prio();
        idx.clamp(0, IDLE_BUCKET as i32 - 1) as usize
    }

    /// Deboost one step toward the ceiling. Slice-expiry path, non-RT only.
    pub(crate) fn deboost(&self) {
        let boost = self.boost_prio();
        self.set_boost_prio((boost + 1).min(MAX_PRIORITY_ADJ));
    }

    /// Boost one step toward this policy's floor. Blocking path, non-RT only.
    pub(crate) fn boost(&self) {
        let floor = self.policy().boost_floor();
        let boost = self.boost_prio();
        if boost > floor {
            self.set_boost_prio(boost - 1);
        }
    }

    // ===== Queue bookkeeping (owning runqueue lock held) =====

    pub fn queue_idx(&self) -> usize {
        self.queue_idx.load(Ordering::Relaxed)
    }

    pub(crate) fn set_queue_idx(&self, idx: usize) {
        self.queue_idx.store(idx, Ordering::Relaxed);
    }

    /// Remaining timeslice in nanoseconds.
    pub fn time_slice(&self) -> u64 {
        self.time_slice.load(Ordering::Relaxed)
    }

    pub fn set_time_slice(&self, ns: u64) {
        self.time_slice.store(ns, Ordering::Relaxed);
    }

    /// Task-clock timestamp of the last runtime accounting.
    pub fn last_ran(&self) -> u64 {
        self.last_ran.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_ran(&self, ts: u64) {
        self.last_ran.store(ts, Ordering::Relaxed);
    }

    /// Task-clock timestamp of the last dispatch.
    pub fn dispatched_at(&self) -> u64 {
        self.dispatched_at.load(Ordering::Relaxed)
    }

    pub(crate) fn set_dispatched_at(&self, ts: u64) {
        self.dispatched_at.store(ts, Ordering::Relaxed);
    }

    // ===== State machine =====

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn on_rq(&self) -> OnRq {
        OnRq::from_u8(self.on_rq.load(Ordering::Acquire))
    }

    pub(crate) fn set_on_rq(&self, on_rq: OnRq) {
        self.on_rq.store(on_rq as u8, Ordering::Release);
    }

    /// Whether the task is currently executing on some CPU.
    pub fn on_cpu(&self) -> bool {
        self.on_cpu.load(Ordering::Acquire)
    }

    pub(crate) fn set_on_cpu(&self, running: bool) {
        // The release store when clearing pairs with the waker's acquire
        // spin, publishing every side effect of the outgoing task.
        self.on_cpu.store(running, Ordering::Release);
    }

    /// CPU whose runqueue owns (or last owned) this task.
    pub fn cpu(&self) -> CpuId {
        self.cpu.load(Ordering::Acquire)
    }

    /// Move ownership to `cpu`. The release store is ordered before any
    /// subsequent store into the target runqueue.
    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Release);
    }

    // ===== Affinity =====

    pub fn cpus_mask(&self) -> CpuMask {
        self.cpus_mask.load()
    }

    pub fn nr_cpus_allowed(&self) -> u32 {
        self.nr_cpus_allowed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cpus_mask(&self, mask: CpuMask) {
        self.cpus_mask.store(mask);
        self.nr_cpus_allowed.store(mask.weight(), Ordering::Relaxed);
    }

    pub fn can_run_on(&self, cpu: CpuId) -> bool {
        self.cpus_mask().contains(cpu)
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy())
            .field("prio", &self.prio())
            .field("boost_prio", &self.boost_prio())
            .field("state", &self.state())
            .field("on_rq", &self.on_rq())
            .field("cpu", &self.cpu())
            .finish()
    }
}

/// Map a nice value onto the static priority scale.
pub const fn nice_to_static_prio(nice: i32) -> i32 {
    MAX_RT_PRIO + 20 + nice
}

/// Priority independent of PI boosting: real-time tasks invert their
/// `rt_priority`; timesharing tasks sit above the real-time band shifted by
/// the boost range so a fully boosted task cannot cross into it on its own.
pub const fn compute_normal_prio(policy: SchedPolicy, static_prio: i32, rt_priority: i32) -> i32 {
    if policy.is_realtime() {
        MAX_RT_PRIO - 1 - rt_priority
    } else {
        static_prio + MAX_PRIORITY_ADJ
    }
}

/// Run-streak threshold below which a blocking task earns a boost step.
///
/// The more boosted a task already is, the shorter the streak it must show;
/// deboosted tasks qualify with almost any streak.
pub(crate) fn boost_threshold(timeslice_ns: u64, boost_prio: i32) -> u64 {
    let shift = 10 - MAX_PRIORITY_ADJ - boost_prio;
    if shift >= 0 {
        timeslice_ns >> shift.min(63)
    } else {
        timeslice_ns.saturating_mul(1u64 << (-shift).min(20))
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;
    use crate::config::DEFAULT_TIMESLICE_NS;

    #[test]
    fn normal_prio_for_timesharing() {
        let t = Task::new(1, "worker", SchedPolicy::Normal, 0, 0);
        assert_eq!(t.static_prio(), 120);
        assert_eq!(t.normal_prio(), 120 + MAX_PRIORITY_ADJ);
        assert_eq!(t.prio(), t.normal_prio());
        assert!(!t.is_realtime());
    }

    #[test]
    fn normal_prio_for_realtime() {
        let t = Task::new(2, "rt", SchedPolicy::Fifo, 0, 80);
        assert_eq!(t.prio(), MAX_RT_PRIO - 1 - 80);
        assert_eq!(t.sched_prio(), 0);
        assert!(t.is_realtime());
    }

    #[test]
    fn deadline_folds_to_fifo() {
        let t = Task::new(3, "dl", SchedPolicy::Deadline, 0, 99);
        assert_eq!(t.policy(), SchedPolicy::Fifo);
        assert_eq!(t.prio(), 0);
    }

    #[test]
    fn bucket_tracks_boost() {
        let t = Task::new(4, "b", SchedPolicy::Normal, 0, 0);
        let base = t.sched_prio();
        t.set_boost_prio(3);
        assert_eq!(t.sched_prio(), base + 3);
        t.set_boost_prio(-3);
        assert_eq!(t.sched_prio(), base - 3);
    }

    #[test]
    fn boost_respects_policy_floor() {
        let batch = Task::new(5, "batch", SchedPolicy::Batch, 0, 0);
        batch.boost();
        assert_eq!(batch.boost_prio(), 0);

        let normal = Task::new(6, "normal", SchedPolicy::Normal, 0, 0);
        for _ in 0..(2 * MAX_PRIORITY_ADJ as usize) {
            normal.boost();
        }
        assert_eq!(normal.boost_prio(), -MAX_PRIORITY_ADJ);
    }

    #[test]
    fn deboost_saturates_at_ceiling() {
        let t = Task::new(7, "d", SchedPolicy::Normal, 0, 0);
        for _ in 0..(2 * MAX_PRIORITY_ADJ as usize) {
            t.deboost();
        }
        assert_eq!(t.boost_prio(), MAX_PRIORITY_ADJ);
    }

    #[test]
    fn pi_donor_overrides_normal_prio() {
        let t = Task::new(8, "victim", SchedPolicy::Normal, 10, 0);
        t.set_donor_prio(Some(19));
        t.recompute_prio();
        assert_eq!(t.prio(), 19);
        assert_eq!(t.sched_prio(), 0);
        t.set_donor_prio(None);
        t.recompute_prio();
        assert_eq!(t.prio(), t.normal_prio());
    }

    #[test]
    fn idle_task_is_pinned_to_idle_bucket() {
        let idle = Task::new_idle(0, 3);
        assert_eq!(idle.sched_prio(), IDLE_BUCKET);
        assert_eq!(idle.prio(), MAX_PRIO);
        assert_eq!(idle.cpus_mask(), CpuMask::single(3));
        assert!(idle.is_idle_task());
    }

    #[test]
    fn boost_threshold_shrinks_with_boost() {
        // A fully boosted task must show a much shorter streak than a fully
        // deboosted one.
        let hot = boost_threshold(DEFAULT_TIMESLICE_NS, -MAX_PRIORITY_ADJ);
        let cold = boost_threshold(DEFAULT_TIMESLICE_NS, MAX_PRIORITY_ADJ);
        assert!(hot < cold);
        assert!(hot > 0);
    }

    #[test]
    fn wake_flags_admit_matching_sleeps() {
        assert!(WakeFlags::NORMAL.admits(TaskState::Interruptible));
        assert!(WakeFlags::NORMAL.admits(TaskState::Uninterruptible));
        assert!(!WakeFlags::INTERRUPTIBLE.admits(TaskState::Uninterruptible));
        assert!(!WakeFlags::NORMAL.admits(TaskState::Running));
    }

    #[test]
    fn handle_is_shareable() {
        let t = Arc::new(Task::new(9, "shared", SchedPolicy::Normal, 0, 0));
        let t2 = Arc::clone(&t);
        t.set_state(TaskState::Interruptible);
        assert_eq!(t2.state(), TaskState::Interruptible);
    }
}
