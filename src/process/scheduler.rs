// Per-CPU scheduler loop with strict priority selection
use log::trace;

use crate::config::NPROC;
use crate::process::context::{ContextSwitch, Direct};
use crate::process::pcb::{CpuId, Priority, ProcessId, ProcessState};
use crate::process::table::{ProcessTable, Slot};
use crate::process::trace::Dispatch;
use crate::services::process_service::ProcessService;

/// One execution unit running the scheduler loop
pub struct Cpu<'k, S: ContextSwitch = Direct> {
    id: CpuId,
    service: &'k ProcessService,
    switcher: S,
    stats: SchedulerStats,
}

/// Scheduler statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes: u64,
    pub dispatches: u64,
    pub idle_passes: u64,
}

impl<'k> Cpu<'k, Direct> {
    pub fn new(id: CpuId, service: &'k ProcessService) -> Self {
        Self::with_switch(id, service, Direct)
    }
}

impl<'k, S: ContextSwitch> Cpu<'k, S> {
    pub fn with_switch(id: CpuId, service: &'k ProcessService, switcher: S) -> Self {
        debug_assert!(id < service.ncpu(), "cpu {} out of range", id);
        Self {
            id,
            service,
            switcher,
            stats: SchedulerStats::default(),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// The scheduler loop proper. Never returns; an idle pass spins and
    /// rescans, relying on interrupts to make something runnable.
    pub fn scheduler(&mut self) -> ! {
        loop {
            if self.schedule().is_none() {
                core::hint::spin_loop();
            }
        }
    }

    /// One pass of the loop: pick, switch in, take the CPU back.
    ///
    /// Returns the pid that ran, or `None` for an idle pass. The table lock
    /// is held from selection until the process side takes it over inside
    /// the context switch, so no other CPU can commit to the same PCB.
    pub fn schedule(&mut self) -> Option<ProcessId> {
        self.stats.passes += 1;

        let mut table = self.service.table().lock();
        let Some(slot) = pick_next(&mut table) else {
            drop(table);
            self.stats.idle_passes += 1;
            return None;
        };

        let (pid, priority) = {
            let pcb = table.get(slot);
            (pcb.pid, pcb.priority)
        };
        let Some(mut context) = table.dispatch(slot, self.id) else {
            drop(table);
            self.stats.idle_passes += 1;
            return None;
        };
        self.service.trace().record(Dispatch { cpu: self.id, pid, priority });
        trace!("cpu {} -> pid {} (priority {})", self.id, pid, priority);

        let (mut table, outcome) =
            self.switcher
                .switch(self.service, table, self.id, pid, &mut context);
        let retired = table.relinquish(slot, context, outcome);
        drop(table);
        // routine state may call back into the service when dropped
        drop(retired);

        self.stats.dispatches += 1;
        Some(pid)
    }
}

/// Strict priority selection.
///
/// Levels are scanned from the most urgent. At the first level holding a
/// runnable PCB, the table is scanned in slot order starting just after the
/// slot last chosen at that level, so equal-priority processes take turns
/// across passes. `O(levels * NPROC)`.
pub(crate) fn pick_next(table: &mut ProcessTable) -> Option<Slot> {
    for priority in Priority::levels() {
        let start = table.cursor(priority);
        let found = (0..NPROC)
            .map(|offset| Slot((start + offset) % NPROC))
            .find(|&slot| {
                let pcb = table.get(slot);
                pcb.state == ProcessState::Runnable
                    && pcb.priority == priority
                    && pcb.context.is_some()
            });
        if let Some(slot) = found {
            table.set_cursor(priority, slot);
            return Some(slot);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::context::{Context, Current, Relinquish};

    fn spawn_at(table: &mut ProcessTable, priority: u8) -> Slot {
        let slot = table.allocate().unwrap();
        table
            .make_runnable(slot, Context::new(|_: &mut Current<'_>| Relinquish::Yield))
            .unwrap();
        table.get_mut(slot).priority = Priority::new(priority as i32).unwrap();
        slot
    }

    #[test]
    fn empty_table_picks_nothing() {
        let mut table = ProcessTable::new();
        assert_eq!(pick_next(&mut table), None);
    }

    #[test]
    fn most_urgent_level_wins_regardless_of_slot_order() {
        let mut table = ProcessTable::new();
        let _low = spawn_at(&mut table, 5);
        let _mid = spawn_at(&mut table, 3);
        let high = spawn_at(&mut table, 2);
        assert_eq!(pick_next(&mut table), Some(high));
    }

    #[test]
    fn equal_priorities_rotate_in_table_order() {
        let mut table = ProcessTable::new();
        let a = spawn_at(&mut table, 3);
        let b = spawn_at(&mut table, 3);
        let c = spawn_at(&mut table, 3);
        let picks: alloc::vec::Vec<Slot> = (0..6).map(|_| pick_next(&mut table).unwrap()).collect();
        assert_eq!(picks, [a, b, c, a, b, c]);
    }

    #[test]
    fn non_runnable_slots_are_skipped() {
        let mut table = ProcessTable::new();
        let sleeping = spawn_at(&mut table, 1);
        let ready = spawn_at(&mut table, 4);
        table.get_mut(sleeping).state = ProcessState::Sleeping;
        assert_eq!(pick_next(&mut table), Some(ready));
    }

    #[test]
    fn schedule_runs_one_slice_and_counts_it() {
        let service = ProcessService::new(1);
        let pid = service
            .spawn("spin", None, |_: &mut Current<'_>| Relinquish::Yield)
            .unwrap();
        let mut cpu = Cpu::new(0, &service);
        assert_eq!(cpu.schedule(), Some(pid));
        assert_eq!(service.ticks_of(pid), Some(1));
        assert_eq!(service.state_of(pid), Some(ProcessState::Runnable));
        assert_eq!(cpu.stats().dispatches, 1);
    }

    #[test]
    fn every_pass_is_either_a_dispatch_or_idle() {
        let service = ProcessService::new(1);
        let mut left = 3;
        service
            .spawn("short", None, move |_: &mut Current<'_>| {
                left -= 1;
                if left == 0 {
                    Relinquish::Exit(0)
                } else {
                    Relinquish::Sleep(crate::process::pcb::WaitChannel::Event(0))
                }
            })
            .unwrap();
        let mut cpu = Cpu::new(0, &service);
        for _ in 0..8 {
            if cpu.schedule().is_none() {
                service.wakeup(crate::process::pcb::WaitChannel::Event(0));
            }
        }
        let stats = cpu.stats();
        assert_eq!(stats.dispatches, 3);
        assert_eq!(stats.passes, stats.dispatches + stats.idle_passes);
    }

    #[test]
    fn idle_pass_reports_none() {
        let service = ProcessService::new(1);
        let mut cpu = Cpu::new(0, &service);
        assert_eq!(cpu.schedule(), None);
        assert_eq!(cpu.stats(), SchedulerStats { passes: 1, dispatches: 0, idle_passes: 1 });
    }
}
