//! Task placement
//!
//! Picks a target CPU for a waking or forking task by combining the
//! watermark index (who is lightest) with the topology masks (who is
//! closest). CPUs that the task would *preempt* are preferred over CPUs
//! that would merely run it later; ties break toward cache locality.
//!
//! Reads are optimistic: a stale watermark only costs a slightly worse
//! placement, which the target runqueue corrects under its own lock.

use alloc::sync::Arc;

use log::warn;

use crate::config::watermark_level;
use crate::cpumask::{CpuId, CpuMask};
use crate::scheduler::SchedShared;
use crate::task::Task;

impl SchedShared {
    /// Choose a CPU for `task` to run on.
    pub(crate) fn select_target(&self, task: &Arc<Task>) -> CpuId {
        let allowed = task.cpus_mask().and(self.online.load());
        if allowed.is_empty() {
            return self.fallback_cpu(task);
        }

        // Prefer a CPU whose lightest queued work the task outranks.
        let task_level = watermark_level(task.sched_prio());
        for level in self.watermark.levels_below(task_level) {
            let candidates = self.watermark.mask_at(level).and(allowed);
            if candidates.is_empty() {
                continue;
            }
            if let Some(cpu) = self.topology.best_mask_cpu(task.cpu(), candidates) {
                return cpu;
            }
        }

        // Nobody to preempt; stay as close as the affinity allows.
        match self.topology.best_mask_cpu(task.cpu(), allowed) {
            Some(cpu) => cpu,
            None => self.fallback_cpu(task),
        }
    }

    /// Last-ditch selection when the allowed set has no online CPU: probe
    /// the local node, then any allowed active CPU, then escalate through
    /// the external cpuset fallback. A task with no online CPU even after
    /// escalation is a configuration bug.
    fn fallback_cpu(&self, task: &Arc<Task>) -> CpuId {
        let active = self.active.load();
        let allowed = task.cpus_mask();

        let node = self.topology.node_mask(task.cpu());
        if let Some(cpu) = node.and(allowed).and(active).first() {
            return cpu;
        }
        if let Some(cpu) = allowed.and(active).first() {
            return cpu;
        }

        let possible = CpuMask::all(self.topology.nr_cpus());
        let relaxed = self.platform.cpuset_fallback(task).and(possible);
        task.set_cpus_mask(relaxed);
        warn!(
            "task {} affinity disjoint from online CPUs, relaxed to {:?}",
            task.id(),
            relaxed
        );
        if let Some(cpu) = relaxed.and(self.online.load()).first() {
            return cpu;
        }
        panic!("task {} has no online CPU to run on", task.id());
    }
}
