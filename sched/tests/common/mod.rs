//! Shared harness for the integration suites
//!
//! `TestPlatform` stands in for the host kernel: a manually advanced
//! monotonic clock, recorded reschedule kicks and timer arms, and a stopper
//! queue the test body drains by hand.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bmq_sched::{
    CpuId, Platform, SchedConfig, SchedPolicy, Scheduler, StopRequest, Task, TaskId, TopologyDesc,
};

#[derive(Default)]
pub struct TestPlatform {
    clock: AtomicU64,
    pub ipis: Mutex<Vec<CpuId>>,
    pub timer_arms: Mutex<Vec<(CpuId, u64)>>,
    pub timer_cancels: Mutex<Vec<CpuId>>,
    pub freq_pokes: Mutex<Vec<CpuId>>,
    pub stops: Mutex<Vec<(CpuId, StopRequest)>>,
    pub pending_signals: Mutex<HashSet<TaskId>>,
}

impl TestPlatform {
    pub fn new() -> Arc<TestPlatform> {
        Arc::new(TestPlatform::default())
    }

    /// Move the clock forward for every CPU.
    pub fn advance(&self, ns: u64) {
        self.clock.fetch_add(ns, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute value, possibly backwards; the
    /// scheduler's clocks must clamp.
    pub fn set_clock(&self, ns: u64) {
        self.clock.store(ns, Ordering::SeqCst);
    }

    pub fn take_stops(&self) -> Vec<(CpuId, StopRequest)> {
        std::mem::take(&mut *self.stops.lock().unwrap())
    }

    pub fn ipis_to(&self, cpu: CpuId) -> usize {
        self.ipis.lock().unwrap().iter().filter(|&&c| c == cpu).count()
    }

    pub fn pokes_to(&self, cpu: CpuId) -> usize {
        self.freq_pokes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&c| c == cpu)
            .count()
    }

    pub fn raise_signal(&self, task: TaskId) {
        self.pending_signals.lock().unwrap().insert(task);
    }
}

impl Platform for TestPlatform {
    fn now_ns(&self, _cpu: CpuId) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        self.ipis.lock().unwrap().push(cpu);
    }

    fn hrtimer_start(&self, cpu: CpuId, ns: u64) {
        self.timer_arms.lock().unwrap().push((cpu, ns));
    }

    fn hrtimer_cancel(&self, cpu: CpuId) {
        self.timer_cancels.lock().unwrap().push(cpu);
    }

    fn stop_one_cpu(&self, cpu: CpuId, req: StopRequest) {
        self.stops.lock().unwrap().push((cpu, req));
    }

    fn signal_pending(&self, task: &Task) -> bool {
        self.pending_signals.lock().unwrap().contains(&task.id())
    }

    fn cpufreq_poke(&self, cpu: CpuId) {
        self.freq_pokes.lock().unwrap().push(cpu);
    }
}

/// Scheduler over a flat (non-SMT) machine.
pub fn new_sched(nr_cpus: u32) -> (Scheduler, Arc<TestPlatform>) {
    sched_with(nr_cpus, SchedConfig::default())
}

pub fn sched_with(nr_cpus: u32, config: SchedConfig) -> (Scheduler, Arc<TestPlatform>) {
    let platform = TestPlatform::new();
    let sched = Scheduler::new(config, &TopologyDesc::flat(nr_cpus), platform.clone())
        .expect("scheduler construction");
    (sched, platform)
}

/// Scheduler over SMT pairs: CPUs {0,1}, {2,3}, ... are siblings.
pub fn new_smt_sched(nr_cpus: u32) -> (Scheduler, Arc<TestPlatform>) {
    let platform = TestPlatform::new();
    let desc = TopologyDesc {
        nr_cpus,
        threads_per_core: 2,
        cores_per_llc: 2,
        llcs_per_die: 1,
    };
    let sched = Scheduler::new(SchedConfig::default(), &desc, platform.clone())
        .expect("scheduler construction");
    (sched, platform)
}

pub fn normal_task(id: TaskId, nice: i32) -> Arc<Task> {
    Arc::new(Task::new(id, "worker", SchedPolicy::Normal, nice, 0))
}

pub fn rt_task(id: TaskId, policy: SchedPolicy, rt_priority: i32) -> Arc<Task> {
    Arc::new(Task::new(id, "rt-worker", policy, 0, rt_priority))
}

/// Pin a freshly created task to `cpu` and make it runnable there.
pub fn spawn_on(sched: &Scheduler, task: &Arc<Task>, cpu: CpuId) {
    sched
        .set_affinity(task, bmq_sched::CpuMask::single(cpu))
        .expect("pin affinity");
    sched.wake_up_new_task(task);
    assert_eq!(task.cpu(), cpu);
}
