// The `nice` command: argument handling around the priority syscall
use alloc::format;
use alloc::string::{String, ToString};

use crate::process::context::Current;
use crate::process::pcb::NiceError;
use crate::syscalls::{SyscallArgs, SyscallNumber};

pub const USAGE: &str = "usage: nice [pid] priority";
pub const FAILED: &str = "nice: failed";

/// Which process a `nice` invocation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The process running the command
    Caller,
    Pid(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NiceCommand {
    pub target: Target,
    pub value: i32,
}

/// Parse `nice <value>` or `nice <pid> <value>` (program name excluded)
pub fn parse(args: &[&str]) -> Result<NiceCommand, NiceError> {
    let number = |s: &str| s.trim().parse::<i32>().map_err(|_| NiceError::Argument);
    match args {
        [value] => Ok(NiceCommand {
            target: Target::Caller,
            value: number(*value)?,
        }),
        [pid, value] => Ok(NiceCommand {
            target: Target::Pid(number(*pid)?),
            value: number(*value)?,
        }),
        _ => Err(NiceError::Argument),
    }
}

/// Run `nice` inside the calling process and return the line it prints.
///
/// Success prints the target pid and its previous priority. Every failure
/// prints the same message; the cause is not visible at this layer.
pub fn run(args: &[&str], current: &mut Current<'_>) -> String {
    if args.is_empty() || args.len() > 2 {
        return USAGE.to_string();
    }
    let Ok(command) = parse(args) else {
        return FAILED.to_string();
    };

    let pid = match command.target {
        Target::Caller => {
            current.syscall(SyscallNumber::GetPid as u64, SyscallArgs::default()) as i32
        }
        Target::Pid(pid) => pid,
    };

    match current.nice(pid, command.value) {
        previous if previous < 0 => FAILED.to_string(),
        previous => format!("{} {}", pid, previous),
    }
}
