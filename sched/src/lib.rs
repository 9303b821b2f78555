//! Priority-bitmap multi-queue CPU scheduler
//!
//! The core of a BMQ-style scheduler: per-CPU runqueues indexed by a
//! priority bitmap queue, a process-wide watermark index advertising each
//! CPU's lightest queued priority, watermark-and-topology-driven task
//! placement, discrete timeslice accounting with dynamic boost/deboost, and
//! a topology-aware balancer that pulls work to idle CPUs and un-strands
//! lone runners on half-busy SMT pairs.
//!
//! The host kernel owns the tasks and the CPUs; it hands in an
//! `Arc<dyn Platform>` for time, cross-CPU kicks and the stopper, calls
//! [`Scheduler::schedule`] from the CPU being scheduled, and drives ticks
//! and wakeups through the entry points on [`Scheduler`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use bmq_sched::{
//!     CpuId, Platform, SchedConfig, SchedPolicy, Scheduler, StopRequest, Task, TopologyDesc,
//! };
//!
//! struct NullPlatform;
//! impl Platform for NullPlatform {
//!     fn now_ns(&self, _cpu: CpuId) -> u64 { 0 }
//!     fn send_reschedule_ipi(&self, _cpu: CpuId) {}
//!     fn hrtimer_start(&self, _cpu: CpuId, _ns: u64) {}
//!     fn hrtimer_cancel(&self, _cpu: CpuId) {}
//!     fn stop_one_cpu(&self, _cpu: CpuId, _req: StopRequest) {}
//! }
//!
//! let sched = Scheduler::new(
//!     SchedConfig::default(),
//!     &TopologyDesc::flat(4),
//!     Arc::new(NullPlatform),
//! )
//! .unwrap();
//! let task = Arc::new(Task::new(1, "worker", SchedPolicy::Normal, 0, 0));
//! sched.wake_up_new_task(&task);
//! assert_eq!(sched.schedule(task.cpu()).id(), 1);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod balance;
pub mod config;
mod cpumask;
mod error;
mod metrics;
mod pbq;
mod placement;
mod platform;
mod rq;
mod scheduler;
mod task;
mod topology;
mod watermark;
mod wake;

pub use config::{SchedConfig, YieldType};
pub use cpumask::{CpuId, CpuMask, CpuMaskIter};
pub use error::{SchedError, SchedResult};
pub use metrics::{MetricsSummary, SchedulerMetrics};
pub use platform::{Platform, StopRequest};
pub use rq::{DequeueFlags, EnqueueFlags};
pub use scheduler::{CloneFlags, Scheduler, IDLE_TASK_ID_BASE};
pub use task::{
    OnRq, SchedPolicy, Task, TaskFlags, TaskId, TaskState, TaskStats, WakeFlags,
};
pub use topology::{CpuTopology, TopologyDesc};
