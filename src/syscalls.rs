// System call entry for the process core
use core::fmt;
use log::debug;

use crate::process::pcb::{NiceError, ProcessId};
use crate::services::process_service::{process_service, ProcessService};

/// System call numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Kill = 6,
    GetPid = 11,
    SetPriority = 22,
    GetPriority = 23,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = SyscallError;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        match number {
            6 => Ok(SyscallNumber::Kill),
            11 => Ok(SyscallNumber::GetPid),
            22 => Ok(SyscallNumber::SetPriority),
            23 => Ok(SyscallNumber::GetPriority),
            _ => Err(SyscallError::InvalidSyscall),
        }
    }
}

/// System call arguments (up to 6 arguments in x86_64)
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
    pub arg2: u64, // rdx
    pub arg3: u64, // r10
    pub arg4: u64, // r8
    pub arg5: u64, // r9
}

impl SyscallArgs {
    pub const fn new(regs: [u64; 6]) -> Self {
        Self {
            arg0: regs[0],
            arg1: regs[1],
            arg2: regs[2],
            arg3: regs[3],
            arg4: regs[4],
            arg5: regs[5],
        }
    }

    fn get(&self, n: usize) -> Option<u64> {
        match n {
            0 => Some(self.arg0),
            1 => Some(self.arg1),
            2 => Some(self.arg2),
            3 => Some(self.arg3),
            4 => Some(self.arg4),
            5 => Some(self.arg5),
            _ => None,
        }
    }

    /// The `n`th argument as a C `int`; the register must hold a
    /// sign-extended 32-bit value
    pub fn int(&self, n: usize) -> Result<i32, SyscallError> {
        let reg = self.get(n).ok_or(SyscallError::InvalidArgument)?;
        i32::try_from(reg as i64).map_err(|_| SyscallError::InvalidArgument)
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(i64),
    Error(SyscallError),
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall,
    InvalidArgument,
    OutOfRange,
    ProcessNotFound,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::InvalidSyscall => write!(f, "Invalid syscall number"),
            SyscallError::InvalidArgument => write!(f, "Invalid argument"),
            SyscallError::OutOfRange => write!(f, "Argument out of range"),
            SyscallError::ProcessNotFound => write!(f, "Process not found"),
        }
    }
}

impl From<NiceError> for SyscallError {
    fn from(e: NiceError) -> Self {
        match e {
            NiceError::Argument => SyscallError::InvalidArgument,
            NiceError::Range => SyscallError::OutOfRange,
            NiceError::NotFound => SyscallError::ProcessNotFound,
        }
    }
}

/// Every failure reaches user space as `-1`
impl From<SyscallResult> for i64 {
    fn from(result: SyscallResult) -> i64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(_) => -1,
        }
    }
}

/// Handle a system call made by `caller` against `service`
pub fn dispatch(
    service: &ProcessService,
    caller: ProcessId,
    number: u64,
    args: SyscallArgs,
) -> SyscallResult {
    let outcome = SyscallNumber::try_from(number).and_then(|number| match number {
        SyscallNumber::Kill => sys_kill(service, args),
        SyscallNumber::GetPid => Ok(caller as i64),
        SyscallNumber::SetPriority => sys_nice(service, args),
        SyscallNumber::GetPriority => sys_getpriority(service, args),
    });
    match outcome {
        Ok(value) => SyscallResult::Success(value),
        Err(e) => {
            debug!("syscall {} from pid {} failed: {}", number, caller, e);
            SyscallResult::Error(e)
        }
    }
}

/// Trap entry for the kernel-wide process service
pub fn handle_syscall(caller: ProcessId, number: u64, args: SyscallArgs) -> i64 {
    match process_service() {
        Ok(service) => dispatch(service, caller, number, args).into(),
        Err(_) => -1,
    }
}

/// `kill(pid)`
fn sys_kill(service: &ProcessService, args: SyscallArgs) -> Result<i64, SyscallError> {
    let pid = args.int(0)?;
    let pid = ProcessId::try_from(pid).map_err(|_| SyscallError::ProcessNotFound)?;
    service
        .kill(pid)
        .map_err(|_| SyscallError::ProcessNotFound)?;
    Ok(0)
}

/// `nice(pid, priority)`: previous priority
fn sys_nice(service: &ProcessService, args: SyscallArgs) -> Result<i64, SyscallError> {
    let pid = args.int(0)?;
    let value = args.int(1)?;
    let previous = service.try_set_priority(pid, value)?;
    Ok(previous.get() as i64)
}

/// `getpriority(pid)`
fn sys_getpriority(service: &ProcessService, args: SyscallArgs) -> Result<i64, SyscallError> {
    let pid = args.int(0)?;
    let pid = ProcessId::try_from(pid).map_err(|_| SyscallError::ProcessNotFound)?;
    service
        .priority_of(pid)
        .map(|p| p.get() as i64)
        .ok_or(SyscallError::ProcessNotFound)
}
