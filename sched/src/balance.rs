//! Migration and SMT balancing
//!
//! Idle CPUs pull batches of queued work from loaded CPUs, walking the
//! topology outward and never blocking on a remote lock. A CPU whose whole
//! SMT sibling group is idle additionally hunts for lone runners on
//! half-busy sibling groups and force-migrates them over, which a pull can
//! never do because a lone runner keeps its queue length at one.
//!
//! Cross-runqueue moves release the source lock before taking the
//! destination lock, with the task marked in-flight in between; readers
//! spin on that marker instead of locking.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use log::{debug, trace};

use crate::cpumask::{CpuId, CpuMask};
use crate::error::{SchedError, SchedResult};
use crate::platform::StopRequest;
use crate::rq::{DequeueFlags, EnqueueFlags, Runqueue};
use crate::scheduler::Scheduler;
use crate::task::{OnRq, Task, TaskFlags};

impl Scheduler {
    /// Pull queued work onto `dst`, whose pick is about to fall through to
    /// the idle task. Sources are visited from cache-warmest to coldest and
    /// only try-locked; a contended source is skipped, not waited on.
    /// Returns the number of tasks moved.
    pub(crate) fn pull_tasks(&self, dst: &mut Runqueue) -> u32 {
        let pending = self
            .shared
            .pending
            .load()
            .and(self.shared.online.load());
        if pending.is_empty() {
            return 0;
        }
        for level in self.shared.topology.search_levels(dst.cpu) {
            for src_cpu in level.and(pending).iter() {
                let Some(mut src) = self.rqs[src_cpu as usize].0.try_lock() else {
                    continue;
                };
                let moved = self.migrate_batch(&mut src, dst);
                if moved > 0 {
                    drop(src);
                    self.shared.metrics.record_pull();
                    self.shared.platform.cpufreq_poke(dst.cpu);
                    return moved;
                }
            }
        }
        0
    }

    /// Move up to half of `src`'s queue (capped) onto `dst`, most urgent
    /// first. The running task, pinned tasks and tasks the destination's
    /// affinity forbids stay put. Both locks are held.
    fn migrate_batch(&self, src: &mut Runqueue, dst: &mut Runqueue) -> u32 {
        let quota = ((src.nr_running as usize + 1) / 2).min(self.shared.config.migration_cap);
        let mut picks: Vec<Arc<Task>> = Vec::new();
        for task in src.pbq.iter() {
            if picks.len() >= quota {
                break;
            }
            if task.is_idle_task() || Arc::ptr_eq(task, &src.curr) || task.on_cpu() {
                continue;
            }
            if task.flags().contains(TaskFlags::PER_CPU_KTHREAD) || task.nr_cpus_allowed() == 1 {
                continue;
            }
            if !task.can_run_on(dst.cpu) {
                continue;
            }
            picks.push(Arc::clone(task));
        }

        for task in &picks {
            src.dequeue(task, DequeueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Migrating);
            task.set_cpu(dst.cpu);
            dst.enqueue(task, EnqueueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Queued);
            task.stats.migrations.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_migration();
        }
        if !picks.is_empty() {
            trace!(
                "pulled {} tasks from cpu {} to cpu {}",
                picks.len(),
                src.cpu,
                dst.cpu
            );
        }
        picks.len() as u32
    }

    /// After a context switch: if this CPU sits in a fully idle sibling
    /// group, look for a half-busy group whose lone runner could move here
    /// and dispatch a one-shot stopper for it.
    pub(crate) fn smt_balance_check(&self, cpu: CpuId) {
        let shared = &self.shared;
        if !shared.topology.has_smt() {
            return;
        }
        if !shared.watermark.sibling_idle_mask().contains(cpu) {
            return;
        }
        let own_group = shared.topology.smt_mask(cpu);
        let mut scanned = own_group;
        for other in shared.online.load().iter() {
            if scanned.contains(other) {
                continue;
            }
            let group = shared.topology.smt_mask(other);
            scanned = scanned.or(group);
            if group.weight() < 2 {
                continue;
            }
            let busy: CpuMask = CpuMask::from_bits(
                group
                    .iter()
                    .filter(|&m| !shared.watermark.cpu_is_idle(m))
                    .fold(0u64, |acc, m| acc | (1u64 << m)),
            );
            // Interesting only when exactly one thread of the pair works
            // while its siblings idle.
            if busy.weight() != 1 {
                continue;
            }
            let Some(busy_cpu) = busy.first() else { continue };
            let Some(src) = self.rqs[busy_cpu as usize].0.try_lock() else {
                continue;
            };
            if src.nr_running != 1 {
                continue;
            }
            let runner = Arc::clone(&src.curr);
            if runner.is_idle_task()
                || runner.flags().contains(TaskFlags::PER_CPU_KTHREAD)
                || runner.nr_cpus_allowed() == 1
                || !runner.can_run_on(cpu)
            {
                continue;
            }
            drop(src);
            if shared.active_balance[busy_cpu as usize].swap(true, Ordering::AcqRel) {
                continue;
            }
            shared.metrics.record_active_balance();
            debug!(
                "smt balance: moving lone runner {} from cpu {} to cpu {}",
                runner.id(),
                busy_cpu,
                cpu
            );
            shared.platform.stop_one_cpu(
                busy_cpu,
                StopRequest::ActiveBalance {
                    task: runner,
                    src_cpu: busy_cpu,
                    dest_cpu: cpu,
                },
            );
            return;
        }
    }

    /// Stopper callback. The platform invokes this on `cpu` at a priority
    /// above any scheduler-controlled task, so a task this CPU was running
    /// is suspended for the duration.
    pub fn run_stopper(&self, cpu: CpuId, req: StopRequest) {
        trace!("stopper on cpu {}: {:?}", cpu, req);
        match req {
            StopRequest::MigrateTask { task, dest_cpu } => {
                self.force_migrate(&task, dest_cpu);
            }
            StopRequest::ActiveBalance {
                task,
                src_cpu,
                dest_cpu,
            } => {
                self.force_migrate(&task, dest_cpu);
                self.shared.active_balance[src_cpu as usize].store(false, Ordering::Release);
            }
        }
    }

    /// Force `task` off its current runqueue onto `dest_cpu`, re-validating
    /// everything under the owning lock; the destination is re-selected if
    /// the original choice went stale.
    fn force_migrate(&self, task: &Arc<Task>, dest_cpu: CpuId) {
        let mut src = self.task_rq_lock(task);
        let src_cpu = src.cpu;
        if task.on_rq() != OnRq::Queued {
            // Blocked (or exited) in the meantime; the wake path will place
            // it under the new constraints.
            return;
        }
        let dest_cpu = if task.can_run_on(dest_cpu)
            && self.shared.online.load().contains(dest_cpu)
            && dest_cpu != src_cpu
        {
            dest_cpu
        } else {
            self.shared.select_target(task)
        };
        if dest_cpu == src_cpu {
            return;
        }

        src.update_clock(&self.shared);
        if Arc::ptr_eq(&src.curr, task) {
            // The stopper displaced the runner; hand the CPU back through
            // the idle task until the next pick.
            self.update_curr(&src, task);
            src.curr = Arc::clone(&src.idle);
            src.switch_count += 1;
            task.stats.involuntary_switches.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_context_switch(false);
            task.set_on_cpu(false);
            self.resched_curr(src_cpu);
        }
        src.dequeue(task, DequeueFlags::MIGRATED, &self.shared);
        task.set_on_rq(OnRq::Migrating);
        task.set_cpu(dest_cpu);
        drop(src);

        let mut dst = self.rqs[dest_cpu as usize].0.lock();
        dst.update_clock(&self.shared);
        dst.enqueue(task, EnqueueFlags::MIGRATED, &self.shared);
        task.set_on_rq(OnRq::Queued);
        task.stats.migrations.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.record_migration();
        self.check_preempt(&dst, task);
    }

    /// Change `task`'s allowed CPU set. A running task that loses its CPU
    /// is pushed off through the stopper; a queued one is re-filed directly.
    pub fn set_affinity(&self, task: &Arc<Task>, mask: CpuMask) -> SchedResult<()> {
        if task.flags().contains(TaskFlags::PER_CPU_KTHREAD) {
            return Err(SchedError::PinnedThread { task: task.id() });
        }
        let mask = mask.and(CpuMask::all(self.nr_cpus()));
        if mask.is_empty() || mask.and(self.shared.online.load()).is_empty() {
            return Err(SchedError::AffinityEmpty { task: task.id() });
        }

        let _pi = task.pi_lock.lock();
        let mut rq = self.task_rq_lock(task);
        task.set_cpus_mask(mask);
        let cur_cpu = rq.cpu;
        if mask.contains(cur_cpu) {
            return Ok(());
        }

        if Arc::ptr_eq(&rq.curr, task) {
            let dest = self.shared.select_target(task);
            drop(rq);
            self.shared.platform.stop_one_cpu(
                cur_cpu,
                StopRequest::MigrateTask {
                    task: Arc::clone(task),
                    dest_cpu: dest,
                },
            );
        } else if task.on_rq() == OnRq::Queued {
            let dest = self.shared.select_target(task);
            rq.update_clock(&self.shared);
            rq.dequeue(task, DequeueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Migrating);
            task.set_cpu(dest);
            drop(rq);

            let mut dst = self.rqs[dest as usize].0.lock();
            dst.update_clock(&self.shared);
            dst.enqueue(task, EnqueueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Queued);
            task.stats.migrations.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_migration();
            self.check_preempt(&dst, task);
        }
        Ok(())
    }

    // ===== Hotplug =====

    /// Bring `cpu` back into service.
    pub fn cpu_up(&self, cpu: CpuId) -> SchedResult<()> {
        if cpu >= self.nr_cpus() {
            return Err(SchedError::InvalidArgument { name: "cpu" });
        }
        self.shared.online.set(cpu);
        self.shared.active.set(cpu);
        let mut rq = self.rqs[cpu as usize].0.lock();
        rq.update_clock(&self.shared);
        rq.refresh_watermark(&self.shared);
        debug!("cpu {} online", cpu);
        Ok(())
    }

    /// Take `cpu` out of service, draining its queue to the remaining
    /// online CPUs. The current task, if any, is pushed off through the
    /// stopper.
    pub fn cpu_down(&self, cpu: CpuId) -> SchedResult<()> {
        if cpu >= self.nr_cpus() {
            return Err(SchedError::InvalidArgument { name: "cpu" });
        }
        if self.shared.online.load().and_not(CpuMask::single(cpu)).is_empty() {
            return Err(SchedError::InvalidArgument { name: "cpu" });
        }
        self.shared.active.clear(cpu);
        self.shared.online.clear(cpu);
        self.shared.pending.clear(cpu);
        self.shared
            .watermark
            .retire(cpu, &self.shared.topology);

        // Drain queued tasks one at a time, releasing the source lock
        // before taking the destination lock.
        loop {
            let mut rq = self.rqs[cpu as usize].0.lock();
            let Some(task) = rq
                .pbq
                .iter()
                .find(|t| {
                    !t.is_idle_task()
                        && !Arc::ptr_eq(*t, &rq.curr)
                        && !t.flags().contains(TaskFlags::PER_CPU_KTHREAD)
                })
                .map(Arc::clone)
            else {
                break;
            };
            rq.update_clock(&self.shared);
            rq.dequeue(&task, DequeueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Migrating);
            drop(rq);

            let dest = self.shared.select_target(&task);
            task.set_cpu(dest);
            let mut dst = self.rqs[dest as usize].0.lock();
            dst.update_clock(&self.shared);
            dst.enqueue(&task, EnqueueFlags::MIGRATED, &self.shared);
            task.set_on_rq(OnRq::Queued);
            task.stats.migrations.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_migration();
            self.check_preempt(&dst, &task);
        }

        let curr = self.current_task(cpu);
        if !curr.is_idle_task() {
            let dest = self.shared.select_target(&curr);
            self.shared.platform.stop_one_cpu(
                cpu,
                StopRequest::MigrateTask {
                    task: curr,
                    dest_cpu: dest,
                },
            );
        }
        self.resched_curr(cpu);
        debug!("cpu {} offline", cpu);
        Ok(())
    }
}
