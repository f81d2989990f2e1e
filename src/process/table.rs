// Process table shared by every scheduler loop
//
// None of the methods here take the lock: they are reachable only through a
// `MutexGuard<ProcessTable>`, so a caller can chain lookups and mutations into
// one atomic step.
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info};
use spin::Mutex;

use crate::config::{NPRIORITY, NPROC};
use crate::process::context::{Context, Relinquish};
use crate::process::pcb::{
    CpuId, MissedWakeup, Priority, ProcName, ProcessControlBlock, ProcessError, ProcessId,
    ProcessState, WaitChannel,
};

/// The process table behind its single kernel-wide lock
pub type Ptable = Mutex<ProcessTable>;

/// Handle to one slot of the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub(crate) usize);

impl Slot {
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct ProcessTable {
    procs: [ProcessControlBlock; NPROC],
    next_pid: ProcessId,
    /// Per level, the slot the next round-robin scan starts from
    cursors: [usize; NPRIORITY],
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            procs: core::array::from_fn(|_| ProcessControlBlock::unused()),
            next_pid: 1,
            cursors: [0; NPRIORITY],
        }
    }

    /// Claim a free slot: `Unused -> Embryo` with the default priority
    pub fn allocate(&mut self) -> Result<Slot, ProcessError> {
        let index = self
            .procs
            .iter()
            .position(|p| p.state == ProcessState::Unused)
            .ok_or(ProcessError::TableFull)?;

        let pid = self.next_pid;
        self.next_pid += 1;

        let pcb = &mut self.procs[index];
        *pcb = ProcessControlBlock::unused();
        pcb.pid = pid;
        pcb.state = ProcessState::Embryo;
        Ok(Slot(index))
    }

    /// Return a slot to `Unused`
    pub fn free(&mut self, slot: Slot) {
        debug_assert_ne!(self.procs[slot.0].state, ProcessState::Running);
        self.procs[slot.0] = ProcessControlBlock::unused();
    }

    pub fn lookup(&self, pid: ProcessId) -> Result<Slot, ProcessError> {
        self.procs
            .iter()
            .position(|p| p.is_live() && p.pid == pid)
            .map(Slot)
            .ok_or(ProcessError::NotFound)
    }

    pub fn get(&self, slot: Slot) -> &ProcessControlBlock {
        &self.procs[slot.0]
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> &mut ProcessControlBlock {
        &mut self.procs[slot.0]
    }

    /// Every non-`Unused` slot in table order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &ProcessControlBlock)> {
        self.procs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_live())
            .map(|(i, p)| (Slot(i), p))
    }

    pub fn count(&self, state: ProcessState) -> usize {
        self.procs.iter().filter(|p| p.state == state).count()
    }

    /// Finish setup: `Embryo -> Runnable`
    pub fn make_runnable(&mut self, slot: Slot, context: Context) -> Result<(), ProcessError> {
        let pcb = &mut self.procs[slot.0];
        if pcb.state != ProcessState::Embryo {
            return Err(ProcessError::InvalidState);
        }
        pcb.context = Some(context);
        pcb.state = ProcessState::Runnable;
        Ok(())
    }

    pub(crate) fn cursor(&self, priority: Priority) -> usize {
        self.cursors[priority.level()]
    }

    pub(crate) fn set_cursor(&mut self, priority: Priority, slot: Slot) {
        self.cursors[priority.level()] = (slot.0 + 1) % NPROC;
    }

    /// `Runnable -> Running` on `cpu`. The context moves to the CPU.
    pub(crate) fn dispatch(&mut self, slot: Slot, cpu: CpuId) -> Option<Context> {
        debug_assert!(self.running_on(cpu).is_none(), "cpu {} is already running a process", cpu);
        let pcb = &mut self.procs[slot.0];
        debug_assert_eq!(pcb.state, ProcessState::Runnable);
        let context = pcb.context.take()?;
        pcb.state = ProcessState::Running;
        pcb.cpu = Some(cpu);
        pcb.missed = MissedWakeup::Nothing;
        Some(context)
    }

    /// Take the CPU back from a running process and apply how it stopped.
    /// A killed process is turned into a zombie whatever it asked for, and a
    /// sleep on a channel that was signalled during the slice does not block.
    ///
    /// The context of an exiting process is handed back so the caller can drop
    /// it after releasing the table lock.
    pub(crate) fn relinquish(
        &mut self,
        slot: Slot,
        context: Context,
        outcome: Relinquish,
    ) -> Option<Context> {
        let pcb = &mut self.procs[slot.0];
        debug_assert_eq!(pcb.state, ProcessState::Running);
        pcb.cpu = None;
        pcb.ticks += 1;

        let outcome = match outcome {
            Relinquish::Exit(_) => outcome,
            _ if pcb.killed => Relinquish::Exit(-1),
            _ => outcome,
        };

        match outcome {
            Relinquish::Yield => pcb.state = ProcessState::Runnable,
            Relinquish::Sleep(chan) if pcb.missed.covers(chan) => {
                pcb.state = ProcessState::Runnable;
            }
            Relinquish::Sleep(chan) => {
                pcb.chan = Some(chan);
                pcb.state = ProcessState::Sleeping;
            }
            Relinquish::Exit(status) => {
                self.exit(slot, status);
                return Some(context);
            }
        }
        pcb.context = Some(context);
        None
    }

    /// `Running -> Zombie`, hand children over and wake the parent
    fn exit(&mut self, slot: Slot, status: i32) {
        let (pid, parent) = {
            let pcb = &mut self.procs[slot.0];
            pcb.state = ProcessState::Zombie;
            pcb.exit_status = Some(status);
            (pcb.pid, pcb.parent)
        };
        info!("pid {} exited with status {}", pid, status);

        for index in 0..NPROC {
            let child = &mut self.procs[index];
            if child.is_live() && child.parent == Some(pid) {
                child.parent = None;
                if child.state == ProcessState::Zombie {
                    debug!("reclaiming orphaned zombie pid {}", child.pid);
                    self.free(Slot(index));
                }
            }
        }

        match parent {
            Some(parent) => {
                self.wakeup(WaitChannel::Child(parent));
            }
            None => self.free(slot),
        }
    }

    /// `Sleeping -> Runnable` for everything waiting on `chan`. Processes
    /// currently on a CPU latch the wakeup instead.
    pub fn wakeup(&mut self, chan: WaitChannel) -> usize {
        let mut woken = 0;
        for pcb in self.procs.iter_mut() {
            match pcb.state {
                ProcessState::Sleeping if pcb.chan == Some(chan) => {
                    pcb.chan = None;
                    pcb.state = ProcessState::Runnable;
                    woken += 1;
                }
                ProcessState::Running => pcb.missed.note(chan),
                _ => {}
            }
        }
        woken
    }

    /// Mark `pid` for death; a sleeper is woken so it can exit
    pub fn kill(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        let slot = self.lookup(pid)?;
        let pcb = &mut self.procs[slot.0];
        if pcb.state == ProcessState::Zombie {
            return Err(ProcessError::InvalidState);
        }
        pcb.killed = true;
        if pcb.state == ProcessState::Sleeping {
            pcb.chan = None;
            pcb.state = ProcessState::Runnable;
        }
        Ok(())
    }

    /// Collect one exited child of `parent`: `Zombie -> Unused`.
    ///
    /// `Ok(None)` means children exist but none has exited yet.
    pub fn reap(&mut self, parent: ProcessId) -> Result<Option<(ProcessId, i32)>, ProcessError> {
        let mut have_children = false;
        for index in 0..NPROC {
            let child = &self.procs[index];
            if !child.is_live() || child.parent != Some(parent) {
                continue;
            }
            have_children = true;
            if child.state == ProcessState::Zombie {
                let reaped = (child.pid, child.exit_status.unwrap_or(-1));
                self.free(Slot(index));
                debug!("pid {} reaped child {}", parent, reaped.0);
                return Ok(Some(reaped));
            }
        }
        if have_children {
            Ok(None)
        } else {
            Err(ProcessError::NoChildren)
        }
    }

    /// Overwrite the priority of `pid`, returning the one it replaced
    pub fn set_priority(&mut self, pid: ProcessId, priority: Priority) -> Result<Priority, ProcessError> {
        let slot = self.lookup(pid)?;
        Ok(core::mem::replace(&mut self.procs[slot.0].priority, priority))
    }

    pub fn running_on(&self, cpu: CpuId) -> Option<Slot> {
        self.procs
            .iter()
            .position(|p| p.state == ProcessState::Running && p.cpu == Some(cpu))
            .map(Slot)
    }

    /// One row per live process, in table order
    pub fn snapshot(&self) -> Vec<ProcInfo> {
        self.iter()
            .map(|(_, p)| ProcInfo {
                pid: p.pid,
                parent: p.parent,
                name: p.name,
                state: p.state,
                priority: p.priority,
                ticks: p.ticks,
            })
            .collect()
    }

    /// Check the structural invariants every transition must preserve
    pub fn check_invariants(&self) -> Result<(), Violation> {
        for (slot, p) in self.iter() {
            if self.iter().any(|(other, q)| other != slot && q.pid == p.pid) {
                return Err(Violation::DuplicatePid(p.pid));
            }
            match (p.state, p.cpu) {
                (ProcessState::Running, Some(cpu)) => {
                    let on_cpu = self
                        .iter()
                        .filter(|(_, q)| q.state == ProcessState::Running && q.cpu == Some(cpu))
                        .count();
                    if on_cpu > 1 {
                        return Err(Violation::CpuDoubleBooked(cpu));
                    }
                }
                (ProcessState::Running, None) | (_, Some(_)) => {
                    return Err(Violation::CpuMismatch(p.pid));
                }
                _ => {}
            }
            let needs_context = matches!(p.state, ProcessState::Runnable | ProcessState::Sleeping);
            if needs_context && p.context.is_none() {
                return Err(Violation::MissingContext(p.pid));
            }
        }
        Ok(())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A broken process-table invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    DuplicatePid(ProcessId),
    /// `cpu` is set on a PCB that is not running, or missing on one that is
    CpuMismatch(ProcessId),
    CpuDoubleBooked(CpuId),
    MissingContext(ProcessId),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Violation::DuplicatePid(pid) => write!(f, "pid {} appears in two slots", pid),
            Violation::CpuMismatch(pid) => write!(f, "pid {} has an inconsistent cpu binding", pid),
            Violation::CpuDoubleBooked(cpu) => write!(f, "cpu {} runs two processes", cpu),
            Violation::MissingContext(pid) => write!(f, "pid {} has no saved context", pid),
        }
    }
}

/// Process listing row, as printed by procdump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: ProcName,
    pub state: ProcessState,
    pub priority: Priority,
    pub ticks: u64,
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:>4} {:<8} {} {:>8} {}",
            self.pid, self.state, self.priority, self.ticks, self.name
        )
    }
}
