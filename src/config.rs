// Kernel-wide scheduling constants

/// Number of slots in the process table.
pub const NPROC: usize = 64;

/// Upper bound on execution units the process service will drive.
pub const NCPU: usize = 8;

/// Highest scheduling precedence.
pub const PRIORITY_HIGHEST: u8 = 1;

/// Lowest scheduling precedence.
pub const PRIORITY_LOWEST: u8 = 5;

/// Priority assigned at process creation.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Number of distinct priority levels.
pub const NPRIORITY: usize = (PRIORITY_LOWEST - PRIORITY_HIGHEST + 1) as usize;

/// Bytes kept of a process name, as in a fixed-size PCB field.
pub const NAME_LEN: usize = 16;

/// Dispatch records retained by the trace before the oldest are dropped.
pub const TRACE_CAPACITY: usize = 1024;
