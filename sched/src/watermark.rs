//! Watermark index
//!
//! Process-wide advertisement of each CPU's lightest queued priority: one
//! CPU mask per level plus a top bitmap of non-empty levels. A CPU's slot is
//! mutated only under that CPU's runqueue lock when its best bucket changes;
//! the placement engine and balancer read lock-free and tolerate staleness,
//! because the chosen CPU re-validates under its own lock on arrival.
//!
//! Level 0 is reserved for CPUs whose whole SMT sibling group is idle.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::{watermark_level, IDLE_WM, NUM_WM_LEVELS};
use crate::cpumask::{AtomicCpuMask, CpuId, CpuMask};
use crate::topology::CpuTopology;

/// Cached level for a CPU that is offline or not yet advertised.
const LEVEL_NONE: usize = usize::MAX;

pub struct WatermarkIndex {
    /// CPUs advertising each level.
    levels: Vec<AtomicCpuMask>,
    /// Bit per level, set when the level's mask may be non-empty.
    nonempty: [AtomicU64; 2],
    /// Per-CPU currently advertised level.
    cached: Vec<AtomicUsize>,
}

impl WatermarkIndex {
    pub fn new(nr_cpus: u32) -> Self {
        let levels = (0..NUM_WM_LEVELS).map(|_| AtomicCpuMask::default()).collect();
        let cached = (0..nr_cpus)
            .map(|_| AtomicUsize::new(LEVEL_NONE))
            .collect();
        Self {
            levels,
            nonempty: [AtomicU64::new(0), AtomicU64::new(0)],
            cached,
        }
    }

    fn mark_nonempty(&self, level: usize) {
        self.nonempty[level / 64].fetch_or(1u64 << (level % 64), Ordering::Relaxed);
    }

    fn mark_empty(&self, level: usize) {
        self.nonempty[level / 64].fetch_and(!(1u64 << (level % 64)), Ordering::Relaxed);
    }

    /// Advertise that `cpu`'s best bucket now maps to `bucket`.
    ///
    /// Caller holds `cpu`'s runqueue lock. Sibling bits at level 0 may race
    /// with a sibling's own advertisement; stale group bits are tolerated
    /// and corrected by the next advertisement from the group.
    pub fn advertise_bucket(&self, cpu: CpuId, bucket: usize, topo: &CpuTopology) {
        self.advertise(cpu, watermark_level(bucket), topo);
    }

    fn advertise(&self, cpu: CpuId, level: usize, topo: &CpuTopology) {
        debug_assert!(level < NUM_WM_LEVELS && level != 0);
        let old = self.cached[cpu as usize].swap(level, Ordering::AcqRel);
        if old != level {
            if old != LEVEL_NONE {
                let prev = self.levels[old].clear(cpu);
                if prev.and_not(CpuMask::single(cpu)).is_empty() {
                    self.mark_empty(old);
                }
            }
            self.levels[level].set(cpu);
            self.mark_nonempty(level);
        }
        if topo.has_smt() {
            self.update_sibling_idle(cpu, level, topo);
        }
    }

    fn update_sibling_idle(&self, cpu: CpuId, level: usize, topo: &CpuTopology) {
        let group = topo.smt_mask(cpu);
        let group_idle = level == IDLE_WM
            && group
                .iter()
                .all(|c| self.cached[c as usize].load(Ordering::Acquire) == IDLE_WM);
        if group_idle {
            self.levels[0].set_all(group);
            self.mark_nonempty(0);
        } else {
            let prev = self.levels[0].clear_all(group);
            if prev.and_not(group).is_empty() {
                self.mark_empty(0);
            }
        }
    }

    /// Withdraw an offlined CPU from the index entirely.
    pub fn retire(&self, cpu: CpuId, topo: &CpuTopology) {
        let old = self.cached[cpu as usize].swap(LEVEL_NONE, Ordering::AcqRel);
        if old != LEVEL_NONE {
            let prev = self.levels[old].clear(cpu);
            if prev.and_not(CpuMask::single(cpu)).is_empty() {
                self.mark_empty(old);
            }
        }
        if topo.has_smt() {
            let group = topo.smt_mask(cpu);
            let prev = self.levels[0].clear_all(group);
            if prev.and_not(group).is_empty() {
                self.mark_empty(0);
            }
        }
    }

    /// CPUs currently advertising `level`. Lock-free, possibly stale.
    pub fn mask_at(&self, level: usize) -> CpuMask {
        self.levels[level].load()
    }

    /// Level `cpu` currently advertises, or `None` when offline.
    pub fn level_of(&self, cpu: CpuId) -> Option<usize> {
        match self.cached[cpu as usize].load(Ordering::Acquire) {
            LEVEL_NONE => None,
            level => Some(level),
        }
    }

    /// Whether `cpu` advertises nothing more urgent than its idle task.
    pub fn cpu_is_idle(&self, cpu: CpuId) -> bool {
        self.level_of(cpu) == Some(IDLE_WM)
    }

    /// CPUs belonging to fully idle SMT sibling groups.
    pub fn sibling_idle_mask(&self) -> CpuMask {
        self.levels[0].load()
    }

    /// Iterate the possibly non-empty levels strictly below `limit`, in
    /// ascending order (lightest first).
    pub fn levels_below(&self, limit: usize) -> impl Iterator<Item = usize> + '_ {
        let words = [
            self.nonempty[0].load(Ordering::Relaxed),
            self.nonempty[1].load(Ordering::Relaxed),
        ];
        (0..limit.min(NUM_WM_LEVELS)).filter(move |l| (words[l / 64] >> (l % 64)) & 1 != 0)
    }
}
