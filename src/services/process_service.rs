// Process Management Service - owns the process table and exposes the
// priority control interface
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use log::{debug, info, warn};
use spin::Mutex;

use crate::config::{NCPU, TRACE_CAPACITY};
use crate::process::context::{Context, Routine};
use crate::process::pcb::{
    CpuId, NiceError, Priority, ProcName, ProcessError, ProcessId, ProcessState, WaitChannel,
};
use crate::process::scheduler::Cpu;
use crate::process::table::{ProcInfo, Ptable};
use crate::process::trace::DispatchTrace;

/// Returned by the control interface for every kind of failure
pub const NICE_FAILED: i32 = -1;

/// The kernel's single process table plus everything that operates on it.
///
/// Scheduler loops and system calls receive a reference to one instance;
/// nothing in here reaches for global state.
pub struct ProcessService {
    ptable: Ptable,
    trace: DispatchTrace,
    ncpu: usize,
}

/// Process counts by state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemStats {
    pub total_processes: usize,
    pub embryo_processes: usize,
    pub runnable_processes: usize,
    pub running_processes: usize,
    pub sleeping_processes: usize,
    pub zombie_processes: usize,
}

impl ProcessService {
    /// A service driving `ncpu` execution units, clamped to `[1, NCPU]`
    pub fn new(ncpu: usize) -> Self {
        Self {
            ptable: Mutex::new(Default::default()),
            trace: DispatchTrace::new(TRACE_CAPACITY),
            ncpu: ncpu.clamp(1, NCPU),
        }
    }

    pub fn table(&self) -> &Ptable {
        &self.ptable
    }

    pub fn trace(&self) -> &DispatchTrace {
        &self.trace
    }

    pub fn ncpu(&self) -> usize {
        self.ncpu
    }

    /// Scheduler loop handle for execution unit `id`
    pub fn cpu(&self, id: CpuId) -> Option<Cpu<'_>> {
        (id < self.ncpu).then(|| Cpu::new(id, self))
    }

    /// Create a process: `Unused -> Embryo -> Runnable` under one lock hold
    pub fn spawn<R: Routine + 'static>(
        &self,
        name: &str,
        parent: Option<ProcessId>,
        routine: R,
    ) -> Result<ProcessId, ProcessError> {
        let mut table = self.ptable.lock();
        if let Some(parent) = parent {
            // an exited parent has already handed its children over
            let slot = table.lookup(parent)?;
            if table.get(slot).state == ProcessState::Zombie {
                return Err(ProcessError::InvalidState);
            }
        }
        let slot = table.allocate()?;
        {
            let pcb = table.get_mut(slot);
            pcb.name = ProcName::new(name);
            pcb.parent = parent;
        }
        table.make_runnable(slot, Context::new(routine))?;
        let pid = table.get(slot).pid;
        drop(table);

        info!("created process '{}' with pid {}", name, pid);
        Ok(pid)
    }

    /// `setPriority`: previous priority on success, `-1` on any failure
    pub fn set_priority(&self, pid: i32, value: i32) -> i32 {
        match self.try_set_priority(pid, value) {
            Ok(previous) => previous.into(),
            Err(e) => {
                warn!("nice({}, {}) rejected: {}", pid, value, e);
                NICE_FAILED
            }
        }
    }

    /// `setPriority` with the failure cause kept
    pub fn try_set_priority(&self, pid: i32, value: i32) -> Result<Priority, NiceError> {
        let priority = Priority::try_from(value)?;
        let pid = ProcessId::try_from(pid).map_err(|_| NiceError::NotFound)?;

        let previous = self
            .ptable
            .lock()
            .set_priority(pid, priority)
            .map_err(|_| NiceError::NotFound)?;

        debug!("pid {} priority {} -> {}", pid, previous, priority);
        Ok(previous)
    }

    /// Current priority of `pid`, or `-1`
    pub fn get_priority(&self, pid: i32) -> i32 {
        ProcessId::try_from(pid)
            .ok()
            .and_then(|pid| self.priority_of(pid))
            .map_or(NICE_FAILED, i32::from)
    }

    pub fn priority_of(&self, pid: ProcessId) -> Option<Priority> {
        let table = self.ptable.lock();
        let slot = table.lookup(pid).ok()?;
        Some(table.get(slot).priority)
    }

    pub fn state_of(&self, pid: ProcessId) -> Option<ProcessState> {
        let table = self.ptable.lock();
        let slot = table.lookup(pid).ok()?;
        Some(table.get(slot).state)
    }

    /// Slices `pid` has run so far
    pub fn ticks_of(&self, pid: ProcessId) -> Option<u64> {
        let table = self.ptable.lock();
        let slot = table.lookup(pid).ok()?;
        Some(table.get(slot).ticks)
    }

    pub fn kill(&self, pid: ProcessId) -> Result<(), ProcessError> {
        self.ptable.lock().kill(pid)?;
        info!("killed pid {}", pid);
        Ok(())
    }

    pub fn wakeup(&self, chan: WaitChannel) -> usize {
        self.ptable.lock().wakeup(chan)
    }

    /// Collect one exited child of `parent`; `Ok(None)` if none has exited yet
    pub fn wait(&self, parent: ProcessId) -> Result<Option<(ProcessId, i32)>, ProcessError> {
        self.ptable.lock().reap(parent)
    }

    pub fn procdump(&self) -> Vec<ProcInfo> {
        self.ptable.lock().snapshot()
    }

    pub fn stats(&self) -> SystemStats {
        let table = self.ptable.lock();
        SystemStats {
            total_processes: table.iter().count(),
            embryo_processes: table.count(ProcessState::Embryo),
            runnable_processes: table.count(ProcessState::Runnable),
            running_processes: table.count(ProcessState::Running),
            sleeping_processes: table.count(ProcessState::Sleeping),
            zombie_processes: table.count(ProcessState::Zombie),
        }
    }
}

static PROCESS_SERVICE: OnceCell<ProcessService> = OnceCell::uninit();

/// Install the kernel-wide process service. Called once at boot.
pub fn init_process_service(ncpu: usize) -> Result<&'static ProcessService, ProcessError> {
    PROCESS_SERVICE
        .try_init_once(|| ProcessService::new(ncpu))
        .map_err(|_| ProcessError::AlreadyInitialized)?;
    let service = process_service()?;
    info!("process service initialized for {} cpu(s)", service.ncpu());
    Ok(service)
}

/// The kernel-wide process service installed by `init_process_service`
pub fn process_service() -> Result<&'static ProcessService, ProcessError> {
    PROCESS_SERVICE
        .try_get()
        .map_err(|_| ProcessError::NotInitialized)
}

pub fn set_process_priority(pid: i32, value: i32) -> i32 {
    process_service().map_or(NICE_FAILED, |service| service.set_priority(pid, value))
}

pub fn get_process_priority(pid: i32) -> i32 {
    process_service().map_or(NICE_FAILED, |service| service.get_priority(pid))
}
