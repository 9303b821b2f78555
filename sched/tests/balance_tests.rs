//! Migration and balancing integration tests
//!
//! Idle pulls, SMT active balance, forced affinity moves and CPU hotplug,
//! with the stopper queue drained by the test body the way a host kernel
//! would run it.

mod common;

use std::sync::Arc;

use bmq_sched::{
    CpuMask, SchedError, StopRequest, Task, TaskState, WakeFlags,
};
use common::{new_sched, new_smt_sched, normal_task, spawn_on, TestPlatform};

/// Queue `n` tasks on `cpu`, then widen their affinity to `mask` so the
/// balancer may move them.
fn load_cpu(
    sched: &bmq_sched::Scheduler,
    first_id: u64,
    n: u64,
    cpu: u32,
    mask: CpuMask,
) -> Vec<Arc<Task>> {
    (0..n)
        .map(|i| {
            let t = normal_task(first_id + i, 0);
            spawn_on(sched, &t, cpu);
            sched.set_affinity(&t, mask).unwrap();
            t
        })
        .collect()
}

fn drain_stops(sched: &bmq_sched::Scheduler, plat: &TestPlatform) {
    for (cpu, req) in plat.take_stops() {
        sched.run_stopper(cpu, req);
    }
}

// ===== Idle pull =====

#[test]
fn idle_cpu_pulls_half_the_backlog() {
    let (sched, plat) = new_sched(2);
    load_cpu(&sched, 1, 5, 1, CpuMask::from_bits(0b11));
    assert_eq!(sched.nr_running(1), 5);

    let next = sched.schedule(0);
    assert!(!next.is_idle_task());
    // ceil(5 / 2) = 3 moved over, one of them now running here.
    assert_eq!(sched.nr_running(0), 3);
    assert_eq!(sched.nr_running(1), 2);
    assert_eq!(sched.metrics().pulls, 1);
    assert_eq!(sched.metrics().task_migrations, 3);
    assert!(plat.pokes_to(0) >= 1);
}

#[test]
fn pull_stops_once_the_source_is_down_to_its_runner() {
    let (sched, _plat) = new_sched(3);
    load_cpu(&sched, 1, 2, 1, CpuMask::from_bits(0b111));

    // First idle CPU pulls the source down to a single queued task...
    let next = sched.schedule(0);
    assert!(!next.is_idle_task());
    assert_eq!(sched.nr_running(1), 1);

    // ...which clears it from the pending set, so the next idle CPU finds
    // nothing to take.
    assert!(sched.schedule(2).is_idle_task());
    assert_eq!(sched.nr_running(1), 1);
}

#[test]
fn pull_skips_pinned_tasks() {
    let (sched, _plat) = new_sched(2);
    for id in 1..=2 {
        let t = normal_task(id, 0);
        spawn_on(&sched, &t, 1);
    }
    assert!(sched.schedule(0).is_idle_task());
    assert_eq!(sched.nr_running(1), 2);
    assert_eq!(sched.metrics().task_migrations, 0);
}

#[test]
fn pull_takes_the_most_urgent_queued_work_first() {
    let (sched, _plat) = new_sched(2);
    let bg = normal_task(1, 10);
    spawn_on(&sched, &bg, 1);
    sched.set_affinity(&bg, CpuMask::from_bits(0b11)).unwrap();
    let fg = normal_task(2, -10);
    spawn_on(&sched, &fg, 1);
    sched.set_affinity(&fg, CpuMask::from_bits(0b11)).unwrap();

    let next = sched.schedule(0);
    assert_eq!(next.id(), 2);
}

// ===== Forced affinity moves =====

#[test]
fn affinity_shrink_pushes_the_runner_off_through_the_stopper() {
    let (sched, plat) = new_sched(3);
    let t = normal_task(1, 0);
    spawn_on(&sched, &t, 2);
    assert_eq!(sched.schedule(2).id(), 1);

    sched.set_affinity(&t, CpuMask::from_bits(0b11)).unwrap();
    assert_eq!(t.cpus_mask(), CpuMask::from_bits(0b11));

    let stops = plat.take_stops();
    assert_eq!(stops.len(), 1);
    let (stop_cpu, req) = stops.into_iter().next().unwrap();
    assert_eq!(stop_cpu, 2);
    match &req {
        StopRequest::MigrateTask { task, dest_cpu } => {
            assert_eq!(task.id(), 1);
            assert!(*dest_cpu == 0 || *dest_cpu == 1);
        }
        other => panic!("unexpected stop request {:?}", other),
    }

    sched.run_stopper(2, req);
    assert!(t.cpu() == 0 || t.cpu() == 1);
    assert_eq!(t.on_rq(), bmq_sched::OnRq::Queued);
    assert!(sched.current_task(2).is_idle_task());
    assert!(sched.need_resched(2));
    assert!(sched.need_resched(t.cpu()));
    assert_eq!(sched.schedule(t.cpu()).id(), 1);
}

#[test]
fn affinity_shrink_refiles_a_queued_task_directly() {
    let (sched, plat) = new_sched(2);
    let runner = normal_task(1, 0);
    spawn_on(&sched, &runner, 1);
    sched.schedule(1);
    let queued = normal_task(2, 0);
    spawn_on(&sched, &queued, 1);

    sched.set_affinity(&queued, CpuMask::single(0)).unwrap();
    assert!(plat.take_stops().is_empty());
    assert_eq!(queued.cpu(), 0);
    assert_eq!(sched.nr_running(0), 1);
    assert_eq!(sched.nr_running(1), 1);
}

#[test]
fn affinity_rejects_empty_and_pinned() {
    let (sched, _plat) = new_sched(2);
    let t = normal_task(1, 0);
    spawn_on(&sched, &t, 0);
    assert!(matches!(
        sched.set_affinity(&t, CpuMask::EMPTY),
        Err(SchedError::AffinityEmpty { .. })
    ));

    let idle = sched.current_task(1);
    assert!(idle.is_idle_task());
    assert!(matches!(
        sched.set_affinity(&idle, CpuMask::from_bits(0b11)),
        Err(SchedError::PinnedThread { .. })
    ));
}

// ===== SMT active balance =====

#[test]
fn fully_idle_sibling_group_steals_a_lone_runner() {
    // CPUs {0,1} and {2,3} are SMT pairs.
    let (sched, plat) = new_smt_sched(4);
    let runner = normal_task(1, 0);
    spawn_on(&sched, &runner, 0);
    sched.set_affinity(&runner, CpuMask::from_bits(0b1111)).unwrap();
    assert_eq!(sched.schedule(0).id(), 1);

    // A task briefly visits CPU 2, then blocks; the switch back to idle
    // runs the sibling balance check with group {2,3} fully idle.
    let visitor = normal_task(2, 0);
    spawn_on(&sched, &visitor, 2);
    assert_eq!(sched.schedule(2).id(), 2);
    visitor.set_state(TaskState::Interruptible);
    assert!(sched.schedule(2).is_idle_task());

    assert_eq!(sched.metrics().active_balances, 1);
    let stops = plat.take_stops();
    assert_eq!(stops.len(), 1);
    let (stop_cpu, req) = stops.into_iter().next().unwrap();
    assert_eq!(stop_cpu, 0);
    match &req {
        StopRequest::ActiveBalance {
            task,
            src_cpu,
            dest_cpu,
        } => {
            assert_eq!(task.id(), 1);
            assert_eq!(*src_cpu, 0);
            assert_eq!(*dest_cpu, 2);
        }
        other => panic!("unexpected stop request {:?}", other),
    }

    sched.run_stopper(0, req);
    assert_eq!(runner.cpu(), 2);
    assert!(sched.current_task(0).is_idle_task());
    assert_eq!(sched.schedule(2).id(), 1);
}

#[test]
fn busy_sibling_pair_is_left_alone() {
    let (sched, plat) = new_smt_sched(4);
    // Both threads of the pair work; nothing to un-strand.
    for (id, cpu) in [(1, 0), (2, 1)] {
        let t = normal_task(id, 0);
        spawn_on(&sched, &t, cpu);
        sched.set_affinity(&t, CpuMask::from_bits(0b1111)).unwrap();
        sched.schedule(cpu);
    }

    let visitor = normal_task(3, 0);
    spawn_on(&sched, &visitor, 2);
    sched.schedule(2);
    visitor.set_state(TaskState::Interruptible);
    sched.schedule(2);

    assert_eq!(sched.metrics().active_balances, 0);
    assert!(plat.take_stops().is_empty());
}

// ===== Hotplug =====

#[test]
fn cpu_down_drains_the_queue_to_surviving_cpus() {
    let (sched, plat) = new_sched(3);
    let tasks = load_cpu(&sched, 1, 3, 1, CpuMask::from_bits(0b111));

    sched.cpu_down(1).unwrap();
    assert!(!sched.online_mask().contains(1));
    assert_eq!(sched.nr_running(1), 0);
    assert_eq!(sched.nr_running(0) + sched.nr_running(2), 3);
    for t in &tasks {
        assert_ne!(t.cpu(), 1);
    }
    drain_stops(&sched, &plat);

    // New work refuses a mask with no online CPU, and placement avoids the
    // offline CPU even for a wide mask.
    let late = normal_task(9, 0);
    assert!(matches!(
        sched.set_affinity(&late, CpuMask::single(1)),
        Err(SchedError::AffinityEmpty { .. })
    ));
    sched.wake_up_new_task(&late);
    assert_ne!(late.cpu(), 1);

    sched.cpu_up(1).unwrap();
    assert!(sched.online_mask().contains(1));
    let pinned = normal_task(10, 0);
    spawn_on(&sched, &pinned, 1);
}

#[test]
fn cpu_down_pushes_its_runner_off_via_stopper() {
    let (sched, plat) = new_sched(2);
    let t = normal_task(1, 0);
    spawn_on(&sched, &t, 1);
    sched.set_affinity(&t, CpuMask::from_bits(0b11)).unwrap();
    sched.schedule(1);

    sched.cpu_down(1).unwrap();
    let stops = plat.take_stops();
    assert_eq!(stops.len(), 1);
    for (cpu, req) in stops {
        sched.run_stopper(cpu, req);
    }
    assert_eq!(t.cpu(), 0);
    assert_eq!(sched.schedule(0).id(), 1);
}

#[test]
fn last_online_cpu_cannot_go_down() {
    let (sched, _plat) = new_sched(2);
    sched.cpu_down(1).unwrap();
    assert!(matches!(
        sched.cpu_down(0),
        Err(SchedError::InvalidArgument { .. })
    ));
}

#[test]
fn wake_with_fully_offline_affinity_escalates() {
    let (sched, _plat) = new_sched(2);
    let t = normal_task(1, 0);
    sched.set_affinity(&t, CpuMask::single(1)).unwrap();
    sched.cpu_down(1).unwrap();

    // The allowed set is entirely offline; the wake relaxes it through the
    // fallback and still finds a CPU.
    sched.wake_up_new_task(&t);
    assert_eq!(t.cpu(), 0);
    assert!(t.cpus_mask().contains(0));
}

// ===== End to end =====

#[test]
fn wake_heavy_churn_keeps_single_residency() {
    let (sched, plat) = new_sched(2);
    let tasks: Vec<_> = (1..=4).map(|id| normal_task(id, 0)).collect();
    for t in &tasks {
        sched.wake_up_new_task(t);
    }
    for _ in 0..20 {
        for cpu in 0..2 {
            plat.advance(500_000);
            sched.scheduler_tick(cpu);
            let curr = sched.schedule_preempted(cpu);
            if !curr.is_idle_task() && curr.id() % 2 == 0 {
                curr.set_state(TaskState::Interruptible);
                sched.schedule(cpu);
                assert!(sched.wake_up(&curr, WakeFlags::NORMAL));
            }
        }
        drain_stops(&sched, &plat);
    }
    // Every task is accounted for exactly once: queued on one runqueue or
    // currently running somewhere.
    let total = sched.nr_running_total();
    assert_eq!(total, 4);
}
