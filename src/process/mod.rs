// Process management: PCBs, the process table and the scheduler loop
pub mod context;
pub mod pcb;
pub mod scheduler;
pub mod table;
pub mod trace;

pub use context::{Context, ContextSwitch, Current, Direct, Relinquish, Routine};
pub use pcb::{
    CpuId, MissedWakeup, NiceError, Priority, ProcName, ProcessControlBlock, ProcessError,
    ProcessId, ProcessState, WaitChannel,
};
pub use scheduler::{Cpu, SchedulerStats};
pub use table::{ProcInfo, ProcessTable, Ptable, Slot, Violation};
pub use trace::{Dispatch, DispatchTrace};
