// Context switching for the priority scheduler
use alloc::boxed::Box;
use core::fmt;
use spin::MutexGuard;

use crate::process::pcb::{CpuId, ProcessId, WaitChannel};
use crate::process::table::ProcessTable;
use crate::services::process_service::ProcessService;
use crate::syscalls::{self, SyscallArgs, SyscallNumber};

/// How a process gave its CPU back to the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relinquish {
    /// Preempted by the timer or yielded voluntarily; stays runnable
    Yield,
    /// Blocked until `wakeup` on the channel
    Sleep(WaitChannel),
    /// Terminated with an exit status
    Exit(i32),
}

/// Code a process runs each time a CPU switches to it.
///
/// One call to `resume` is one slice: it runs until the process is
/// preempted, blocks or exits, and reports which through the return value.
pub trait Routine: Send {
    fn resume(&mut self, current: &mut Current<'_>) -> Relinquish;
}

impl<F> Routine for F
where
    F: FnMut(&mut Current<'_>) -> Relinquish + Send,
{
    fn resume(&mut self, current: &mut Current<'_>) -> Relinquish {
        self(current)
    }
}

/// Saved execution state of a process that is not on a CPU
pub struct Context {
    routine: Box<dyn Routine>,
    resumes: u64,
}

impl Context {
    pub fn new(routine: impl Routine + 'static) -> Self {
        Self {
            routine: Box::new(routine),
            resumes: 0,
        }
    }

    /// Number of times a CPU has switched into this context
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    pub(crate) fn resume(&mut self, current: &mut Current<'_>) -> Relinquish {
        self.resumes += 1;
        self.routine.resume(current)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("resumes", &self.resumes)
            .finish_non_exhaustive()
    }
}

/// The running process's view of the kernel during one slice
pub struct Current<'k> {
    service: &'k ProcessService,
    pid: ProcessId,
    cpu: CpuId,
}

impl<'k> Current<'k> {
    pub(crate) fn new(service: &'k ProcessService, pid: ProcessId, cpu: CpuId) -> Self {
        Self { service, pid, cpu }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn service(&self) -> &'k ProcessService {
        self.service
    }

    /// Whether another process has asked this one to die
    pub fn killed(&self) -> bool {
        let table = self.service.table().lock();
        table
            .lookup(self.pid)
            .map(|slot| table.get(slot).killed)
            .unwrap_or(true)
    }

    /// Trap into the kernel on behalf of this process
    pub fn syscall(&mut self, number: u64, args: SyscallArgs) -> i64 {
        syscalls::dispatch(self.service, self.pid, number, args).into()
    }

    /// `nice(pid, value)`: previous priority, or `-1`
    pub fn nice(&mut self, pid: i32, value: i32) -> i32 {
        let args = SyscallArgs::new([pid as i64 as u64, value as i64 as u64, 0, 0, 0, 0]);
        self.syscall(SyscallNumber::SetPriority as u64, args) as i32
    }
}

/// Architecture-specific transfer of control from a scheduler loop to a process.
///
/// `switch` receives the table lock still held by the scheduler loop. The
/// process side releases it once it is running and re-acquires it before
/// handing the CPU back, so the guard returned is the one the loop continues
/// with. The call returns only when the process yields back.
pub trait ContextSwitch {
    fn switch<'k>(
        &self,
        service: &'k ProcessService,
        held: MutexGuard<'k, ProcessTable>,
        cpu: CpuId,
        pid: ProcessId,
        context: &mut Context,
    ) -> (MutexGuard<'k, ProcessTable>, Relinquish);
}

/// Runs the process's slice on the calling execution unit.
///
/// This is the cooperative-fiber form of a context switch used on hosted
/// targets: the scheduler's stack is suspended for exactly the length of
/// one `Routine::resume` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl ContextSwitch for Direct {
    fn switch<'k>(
        &self,
        service: &'k ProcessService,
        held: MutexGuard<'k, ProcessTable>,
        cpu: CpuId,
        pid: ProcessId,
        context: &mut Context,
    ) -> (MutexGuard<'k, ProcessTable>, Relinquish) {
        // The process releases the table lock on entry.
        drop(held);
        let mut current = Current::new(service, pid, cpu);
        let outcome = context.resume(&mut current);
        (service.table().lock(), outcome)
    }
}
