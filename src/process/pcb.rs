// Process Control Block (PCB) for the priority scheduler
use core::fmt;

use crate::config::{DEFAULT_PRIORITY, NAME_LEN, PRIORITY_HIGHEST, PRIORITY_LOWEST};
use crate::process::context::Context;

/// Process ID type
pub type ProcessId = u32;

/// Index of an execution unit (CPU) running a scheduler loop
pub type CpuId = usize;

/// Process state enumeration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    #[default]
    Unused,   // Free slot
    Embryo,   // Allocated, setup not finished
    Runnable, // Ready to run, waiting for a CPU
    Running,  // Currently executing on exactly one CPU
    Sleeping, // Waiting on a channel
    Zombie,   // Exited, waiting for the parent to collect it
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProcessState::Unused => "unused",
            ProcessState::Embryo => "embryo",
            ProcessState::Runnable => "runnable",
            ProcessState::Running => "running",
            ProcessState::Sleeping => "sleeping",
            ProcessState::Zombie => "zombie",
        };
        f.pad(name)
    }
}

/// Scheduling priority in `[1, 5]`.
///
/// A smaller number means higher precedence, so the derived ordering sorts
/// the most urgent level first. Values outside the range cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(PRIORITY_HIGHEST);
    pub const LOWEST: Priority = Priority(PRIORITY_LOWEST);
    pub const DEFAULT: Priority = Priority(DEFAULT_PRIORITY);

    /// Validate a raw priority value
    pub const fn new(value: i32) -> Option<Priority> {
        if value >= PRIORITY_HIGHEST as i32 && value <= PRIORITY_LOWEST as i32 {
            Some(Priority(value as u8))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based level index, `0` for the highest precedence
    pub(crate) const fn level(self) -> usize {
        (self.0 - PRIORITY_HIGHEST) as usize
    }

    /// All levels, most urgent first
    pub fn levels() -> impl Iterator<Item = Priority> {
        (PRIORITY_HIGHEST..=PRIORITY_LOWEST).map(Priority)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl TryFrom<i32> for Priority {
    type Error = NiceError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or(NiceError::Range)
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> i32 {
        priority.0 as i32
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size process name stored inline in the PCB
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProcName {
    bytes: [u8; NAME_LEN],
    len: u8,
}

impl ProcName {
    pub const EMPTY: ProcName = ProcName { bytes: [0; NAME_LEN], len: 0 };

    /// Keeps as much of `name` as fits without splitting a character
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self { bytes, len: end as u8 }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

impl fmt::Debug for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What a sleeping process is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitChannel {
    /// A child of this process exits
    Child(ProcessId),
    /// An arbitrary kernel event
    Event(usize),
}

/// Wakeups that arrived while the process was on a CPU.
///
/// A process decides to sleep without holding the table lock, so a wakeup
/// can land between that decision and the sleep being committed. The latch
/// remembers it; more than one distinct channel degrades to "any".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MissedWakeup {
    #[default]
    Nothing,
    One(WaitChannel),
    Several,
}

impl MissedWakeup {
    pub fn note(&mut self, chan: WaitChannel) {
        *self = match *self {
            MissedWakeup::Nothing => MissedWakeup::One(chan),
            MissedWakeup::One(seen) if seen == chan => MissedWakeup::One(seen),
            _ => MissedWakeup::Several,
        };
    }

    pub fn covers(&self, chan: WaitChannel) -> bool {
        match self {
            MissedWakeup::Nothing => false,
            MissedWakeup::One(seen) => *seen == chan,
            MissedWakeup::Several => true,
        }
    }
}

/// Process Control Block (PCB) - one slot of the process table
#[derive(Debug)]
pub struct ProcessControlBlock {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: ProcName,
    pub state: ProcessState,
    pub priority: Priority,
    /// Saved execution state; `None` while the process is on a CPU
    pub context: Option<Context>,
    pub chan: Option<WaitChannel>,
    pub missed: MissedWakeup,
    /// Set iff `state == Running`
    pub cpu: Option<CpuId>,
    pub killed: bool,
    pub exit_status: Option<i32>,
    /// Slices this process has been given
    pub ticks: u64,
}

impl ProcessControlBlock {
    pub(crate) const fn unused() -> Self {
        Self {
            pid: 0,
            parent: None,
            name: ProcName::EMPTY,
            state: ProcessState::Unused,
            priority: Priority::DEFAULT,
            context: None,
            chan: None,
            missed: MissedWakeup::Nothing,
            cpu: None,
            killed: false,
            exit_status: None,
            ticks: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ProcessState::Unused
    }
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    NotFound,
    InvalidState,
    NoChildren,
    AlreadyInitialized,
    NotInitialized,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "Process table exhausted"),
            ProcessError::NotFound => write!(f, "Process not found"),
            ProcessError::InvalidState => write!(f, "Invalid process state for this transition"),
            ProcessError::NoChildren => write!(f, "No children to wait for"),
            ProcessError::AlreadyInitialized => write!(f, "Process service already initialized"),
            ProcessError::NotInitialized => write!(f, "Process service not initialized"),
        }
    }
}

/// Why a priority change was rejected.
///
/// The `-1` sentinel of the control interface does not carry these; they are
/// only visible through `try_set_priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiceError {
    /// Missing or malformed arguments
    Argument,
    /// Priority outside `[1, 5]`
    Range,
    /// No live process has that identity
    NotFound,
}

impl fmt::Display for NiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NiceError::Argument => write!(f, "Malformed priority request"),
            NiceError::Range => write!(f, "Priority out of range"),
            NiceError::NotFound => write!(f, "No such process"),
        }
    }
}
