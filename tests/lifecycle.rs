// Process lifecycle: sleeping, exiting, killing and reaping
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use prisched::syscalls::{SyscallArgs, SyscallNumber};
use prisched::{Current, ProcessId, ProcessService, ProcessState, Relinquish, WaitChannel};

type Reaped = Arc<Mutex<Vec<(ProcessId, i32)>>>;

/// Waits for one child, records it, then exits
fn reaper(reaped: Reaped) -> impl FnMut(&mut Current<'_>) -> Relinquish + Send + 'static {
    move |cur: &mut Current<'_>| match cur.service().wait(cur.pid()) {
        Ok(Some(child)) => {
            reaped.lock().unwrap().push(child);
            Relinquish::Exit(0)
        }
        Ok(None) => Relinquish::Sleep(WaitChannel::Child(cur.pid())),
        Err(_) => Relinquish::Exit(1),
    }
}

fn run_until_empty(service: &ProcessService, budget: usize) {
    let mut cpu = service.cpu(0).unwrap();
    for _ in 0..budget {
        if service.stats().total_processes == 0 {
            return;
        }
        cpu.schedule();
    }
    panic!("processes left behind: {:?}", service.procdump());
}

#[test]
fn parent_collects_exit_status_of_its_child() {
    let service = ProcessService::new(1);
    let reaped: Reaped = Arc::default();
    let spawned = Arc::new(AtomicU32::new(0));

    let mut wait_for_child = reaper(Arc::clone(&reaped));
    let child_pid = Arc::clone(&spawned);
    service
        .spawn("parent", None, move |cur: &mut Current<'_>| {
            if child_pid.load(Ordering::SeqCst) == 0 {
                let mut left = 3;
                let child = cur
                    .service()
                    .spawn("child", Some(cur.pid()), move |_: &mut Current<'_>| {
                        left -= 1;
                        if left == 0 {
                            Relinquish::Exit(7)
                        } else {
                            Relinquish::Yield
                        }
                    })
                    .unwrap();
                child_pid.store(child, Ordering::SeqCst);
                return Relinquish::Yield;
            }
            wait_for_child(cur)
        })
        .unwrap();

    run_until_empty(&service, 100);
    let child = spawned.load(Ordering::SeqCst);
    assert_ne!(child, 0);
    assert_eq!(*reaped.lock().unwrap(), [(child, 7)]);
}

#[test]
fn wait_without_children_is_an_error() {
    let service = ProcessService::new(1);
    let pid = service
        .spawn("lonely", None, |_: &mut Current<'_>| Relinquish::Yield)
        .unwrap();
    assert_eq!(service.wait(pid), Err(prisched::ProcessError::NoChildren));
}

#[test]
fn killed_process_exits_with_minus_one_at_its_next_slice() {
    let service = ProcessService::new(1);
    let reaped: Reaped = Arc::default();
    let watcher = service
        .spawn("watcher", None, reaper(Arc::clone(&reaped)))
        .unwrap();
    service.set_priority(watcher as i32, 5);

    let victim = service
        .spawn("victim", Some(watcher), |_: &mut Current<'_>| Relinquish::Yield)
        .unwrap();
    service.set_priority(victim as i32, 4);

    let killer = service
        .spawn("killer", None, move |cur: &mut Current<'_>| {
            let args = SyscallArgs::new([victim as u64, 0, 0, 0, 0, 0]);
            assert_eq!(cur.syscall(SyscallNumber::Kill as u64, args), 0);
            Relinquish::Exit(0)
        })
        .unwrap();
    service.set_priority(killer as i32, 2);

    let mut cpu = service.cpu(0).unwrap();
    assert_eq!(cpu.schedule(), Some(killer));
    assert_eq!(cpu.schedule(), Some(victim));
    assert_eq!(service.state_of(victim), Some(ProcessState::Zombie));
    assert_eq!(cpu.schedule(), Some(watcher));

    assert_eq!(*reaped.lock().unwrap(), [(victim, -1)]);
    assert_eq!(service.stats().total_processes, 0);
}

#[test]
fn killing_a_sleeper_wakes_it_to_exit() {
    let service = ProcessService::new(1);
    let checked = Arc::new(AtomicBool::new(false));
    let saw_kill = Arc::clone(&checked);
    let sleeper = service
        .spawn("sleeper", None, move |cur: &mut Current<'_>| {
            if cur.killed() {
                saw_kill.store(true, Ordering::SeqCst);
                return Relinquish::Exit(-1);
            }
            Relinquish::Sleep(WaitChannel::Event(99))
        })
        .unwrap();

    let mut cpu = service.cpu(0).unwrap();
    assert_eq!(cpu.schedule(), Some(sleeper));
    assert_eq!(service.state_of(sleeper), Some(ProcessState::Sleeping));
    assert_eq!(cpu.schedule(), None);

    service.kill(sleeper).unwrap();
    assert_eq!(service.state_of(sleeper), Some(ProcessState::Runnable));
    assert_eq!(cpu.schedule(), Some(sleeper));
    assert!(checked.load(Ordering::SeqCst));
    assert_eq!(service.state_of(sleeper), None);
    assert!(service.kill(sleeper).is_err());
}

#[test]
fn wakeup_racing_a_sleep_on_another_cpu_is_not_lost() {
    const TARGET: u32 = 500;
    let service = ProcessService::new(2);
    let produced = Arc::new(AtomicU32::new(0));

    let seen = Arc::clone(&produced);
    service
        .spawn("consumer", None, move |_: &mut Current<'_>| {
            if seen.load(Ordering::SeqCst) >= TARGET {
                Relinquish::Exit(0)
            } else {
                Relinquish::Sleep(WaitChannel::Event(1))
            }
        })
        .unwrap();
    let counter = Arc::clone(&produced);
    service
        .spawn("producer", None, move |cur: &mut Current<'_>| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            cur.service().wakeup(WaitChannel::Event(1));
            if n >= TARGET {
                Relinquish::Exit(0)
            } else {
                Relinquish::Yield
            }
        })
        .unwrap();

    let service = &service;
    thread::scope(|s| {
        for id in 0..2 {
            s.spawn(move || {
                let mut cpu = service.cpu(id).unwrap();
                for _ in 0..200_000 {
                    if service.stats().total_processes == 0 {
                        break;
                    }
                    cpu.schedule();
                }
            });
        }
    });

    assert_eq!(service.stats().total_processes, 0, "{:?}", service.procdump());
    assert_eq!(produced.load(Ordering::SeqCst), TARGET);
}

#[test]
fn pids_are_not_reused_after_exit() {
    let service = ProcessService::new(1);
    let mut cpu = service.cpu(0).unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let pid = service
            .spawn("short", None, |_: &mut Current<'_>| Relinquish::Exit(0))
            .unwrap();
        assert_eq!(cpu.schedule(), Some(pid));
        assert!(!seen.contains(&pid));
        seen.push(pid);
    }
    assert_eq!(service.set_priority(seen[0] as i32, 2), -1);
}

#[test]
fn exited_parent_cannot_adopt_new_children() {
    let service = ProcessService::new(1);
    let reaped: Reaped = Arc::default();
    let grandparent = service
        .spawn("grandparent", None, reaper(Arc::clone(&reaped)))
        .unwrap();
    service.set_priority(grandparent as i32, 5);
    let parent = service
        .spawn("parent", Some(grandparent), |_: &mut Current<'_>| Relinquish::Exit(0))
        .unwrap();
    service.set_priority(parent as i32, 1);

    let mut cpu = service.cpu(0).unwrap();
    assert_eq!(cpu.schedule(), Some(parent));
    assert_eq!(service.state_of(parent), Some(ProcessState::Zombie));

    let late = service.spawn("late", Some(parent), |_: &mut Current<'_>| Relinquish::Exit(0));
    assert_eq!(late, Err(prisched::ProcessError::InvalidState));

    run_until_empty(&service, 10);
    assert_eq!(*reaped.lock().unwrap(), [(parent, 0)]);
}

/// Records whether the table lock was free when the owning routine was dropped
struct DropWitness {
    service: Arc<ProcessService>,
    lock_was_free: Arc<AtomicBool>,
}

impl Drop for DropWitness {
    fn drop(&mut self) {
        let free = self.service.table().try_lock().is_some();
        self.lock_was_free.store(free, Ordering::SeqCst);
    }
}

#[test]
fn exited_routine_is_dropped_outside_the_table_lock() {
    let service = Arc::new(ProcessService::new(1));
    let lock_was_free = Arc::new(AtomicBool::new(false));
    let guard = DropWitness {
        service: Arc::clone(&service),
        lock_was_free: Arc::clone(&lock_was_free),
    };
    let pid = service
        .spawn("finisher", None, move |_: &mut Current<'_>| {
            let _keep = &guard;
            Relinquish::Exit(0)
        })
        .unwrap();

    let mut cpu = service.cpu(0).unwrap();
    assert_eq!(cpu.schedule(), Some(pid));
    assert_eq!(service.state_of(pid), None);
    assert!(lock_was_free.load(Ordering::SeqCst));
}
