//! CPU topology masks
//!
//! Built once at start-of-day from the host's description. Each CPU gets an
//! ordered sequence of proximity masks (SMT siblings, LLC peers, die peers,
//! everything else) that bounds placement and pull searches: walking the
//! sequence visits CPUs from cache-warmest to coldest.

use alloc::vec::Vec;

use crate::cpumask::{CpuId, CpuMask};

/// Host-provided shape of the machine.
#[derive(Debug, Clone)]
pub struct TopologyDesc {
    pub nr_cpus: u32,
    /// SMT width; 1 means no SMT.
    pub threads_per_core: u32,
    /// Cores sharing a last-level cache.
    pub cores_per_llc: u32,
    /// LLC groups per die; everything beyond one die is "other".
    pub llcs_per_die: u32,
}

impl TopologyDesc {
    /// A flat machine: no SMT, one cache domain per CPU.
    pub fn flat(nr_cpus: u32) -> Self {
        Self {
            nr_cpus,
            threads_per_core: 1,
            cores_per_llc: 1,
            llcs_per_die: 1,
        }
    }
}

/// Per-CPU proximity masks in search order.
struct CpuMasks {
    /// SMT siblings including the CPU itself.
    smt_group: CpuMask,
    /// Search levels, nearest first, excluding the CPU itself.
    levels: [CpuMask; 4],
}

pub struct CpuTopology {
    nr_cpus: u32,
    has_smt: bool,
    per_cpu: Vec<CpuMasks>,
}

impl CpuTopology {
    pub fn build(desc: &TopologyDesc) -> Self {
        let nr = desc.nr_cpus;
        let tpc = desc.threads_per_core.max(1);
        let cpl = desc.cores_per_llc.max(1);
        let lpd = desc.llcs_per_die.max(1);
        let cpus_per_llc = tpc * cpl;
        let cpus_per_die = cpus_per_llc * lpd;

        let all = CpuMask::all(nr);
        let mut per_cpu = Vec::with_capacity(nr as usize);
        for cpu in 0..nr {
            let me = CpuMask::single(cpu);
            let core = group_mask(cpu, tpc, nr);
            let llc = group_mask(cpu, cpus_per_llc, nr);
            let die = group_mask(cpu, cpus_per_die, nr);
            per_cpu.push(CpuMasks {
                smt_group: core,
                levels: [
                    core.and_not(me),
                    llc.and_not(core),
                    die.and_not(llc),
                    all.and_not(die),
                ],
            });
        }
        Self {
            nr_cpus: nr,
            has_smt: tpc > 1,
            per_cpu,
        }
    }

    pub fn nr_cpus(&self) -> u32 {
        self.nr_cpus
    }

    pub fn has_smt(&self) -> bool {
        self.has_smt
    }

    /// SMT sibling group of `cpu`, including `cpu` itself.
    pub fn smt_mask(&self, cpu: CpuId) -> CpuMask {
        self.per_cpu[cpu as usize].smt_group
    }

    /// Die-local CPUs of `cpu`; used as the node-local probe in placement
    /// fallback.
    pub fn node_mask(&self, cpu: CpuId) -> CpuMask {
        let masks = &self.per_cpu[cpu as usize];
        masks.levels[0]
            .or(masks.levels[1])
            .or(masks.levels[2])
            .or(CpuMask::single(cpu))
    }

    /// Proximity levels of `cpu`, nearest first, excluding `cpu`.
    pub fn search_levels(&self, cpu: CpuId) -> &[CpuMask; 4] {
        &self.per_cpu[cpu as usize].levels
    }

    /// Pick the member of `candidates` closest to `from`, preferring `from`
    /// itself, then walking the proximity levels outward.
    pub fn best_mask_cpu(&self, from: CpuId, candidates: CpuMask) -> Option<CpuId> {
        if candidates.contains(from) {
            return Some(from);
        }
        for level in self.search_levels(from) {
            if let Some(cpu) = level.and(candidates).first() {
                return Some(cpu);
            }
        }
        candidates.first()
    }
}

/// Mask of the aligned group of `width` CPUs containing `cpu`.
fn group_mask(cpu: CpuId, width: u32, nr_cpus: u32) -> CpuMask {
    let base = (cpu / width) * width;
    let mut mask = CpuMask::EMPTY;
    for c in base..(base + width).min(nr_cpus) {
        mask.set(c);
    }
    mask
}
