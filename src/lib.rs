// Priority scheduler and process-state core for a small monolithic kernel
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod nice;
pub mod process;
pub mod services;
pub mod syscalls;

pub use process::{
    Context, ContextSwitch, Cpu, CpuId, Current, Direct, NiceError, Priority, ProcessError,
    ProcessId, ProcessState, Relinquish, WaitChannel,
};
pub use services::process_service::ProcessService;
