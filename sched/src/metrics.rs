//! Scheduler telemetry
//!
//! Lock-free counters recording scheduling activity. One instance per
//! scheduler; snapshots via [`SchedulerMetrics::summary`].

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler activity counters.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Total context switches.
    pub context_switches: AtomicU64,
    /// Switches where the outgoing task blocked or yielded.
    pub voluntary_switches: AtomicU64,
    /// Switches forced by preemption or slice expiry.
    pub involuntary_switches: AtomicU64,
    /// Times the idle task was dispatched.
    pub idle_scheduled: AtomicU64,
    /// Successful wakeups.
    pub wakeups: AtomicU64,
    /// Wakeups that found the task still queued on a runqueue.
    pub remote_wakeups: AtomicU64,
    /// Wakeups placed onto a CPU that was idle.
    pub wake_to_idle: AtomicU64,
    /// Tasks moved between CPUs for any reason.
    pub task_migrations: AtomicU64,
    /// Idle pulls that moved at least one task.
    pub pulls: AtomicU64,
    /// SMT active-balance stoppers dispatched.
    pub active_balances: AtomicU64,
}

impl SchedulerMetrics {
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            voluntary_switches: AtomicU64::new(0),
            involuntary_switches: AtomicU64::new(0),
            idle_scheduled: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            remote_wakeups: AtomicU64::new(0),
            wake_to_idle: AtomicU64::new(0),
            task_migrations: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
            active_balances: AtomicU64::new(0),
        }
    }

    pub fn record_context_switch(&self, voluntary: bool) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
        if voluntary {
            self.voluntary_switches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.involuntary_switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_idle_scheduled(&self) {
        self.idle_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_wakeup(&self) {
        self.remote_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wake_to_idle(&self) {
        self.wake_to_idle.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_migration(&self) {
        self.task_migrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pull(&self) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_active_balance(&self) {
        self.active_balances.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of every counter.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            voluntary_switches: self.voluntary_switches.load(Ordering::Relaxed),
            involuntary_switches: self.involuntary_switches.load(Ordering::Relaxed),
            idle_scheduled: self.idle_scheduled.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            remote_wakeups: self.remote_wakeups.load(Ordering::Relaxed),
            wake_to_idle: self.wake_to_idle.load(Ordering::Relaxed),
            task_migrations: self.task_migrations.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            active_balances: self.active_balances.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.context_switches.store(0, Ordering::Relaxed);
        self.voluntary_switches.store(0, Ordering::Relaxed);
        self.involuntary_switches.store(0, Ordering::Relaxed);
        self.idle_scheduled.store(0, Ordering::Relaxed);
        self.wakeups.store(0, Ordering::Relaxed);
        self.remote_wakeups.store(0, Ordering::Relaxed);
        self.wake_to_idle.store(0, Ordering::Relaxed);
        self.task_migrations.store(0, Ordering::Relaxed);
        self.pulls.store(0, Ordering::Relaxed);
        self.active_balances.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSummary {
    pub context_switches: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub idle_scheduled: u64,
    pub wakeups: u64,
    pub remote_wakeups: u64,
    pub wake_to_idle: u64,
    pub task_migrations: u64,
    pub pulls: u64,
    pub active_balances: u64,
}
