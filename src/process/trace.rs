// Bounded record of scheduling decisions
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam_queue::ArrayQueue;

use crate::process::pcb::{CpuId, Priority, ProcessId};

/// One scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub cpu: CpuId,
    pub pid: ProcessId,
    pub priority: Priority,
}

/// Lock-free ring of the most recent dispatches.
///
/// Records are pushed while the table lock is held, so queue order is the
/// global order in which processes were committed to a CPU. When full, the
/// oldest record is dropped.
pub struct DispatchTrace {
    queue: ArrayQueue<Dispatch>,
    dropped: AtomicU64,
}

impl DispatchTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record(&self, dispatch: Dispatch) {
        if self.queue.force_push(dispatch).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove and return everything recorded so far, oldest first
    pub fn drain(&self) -> Vec<Dispatch> {
        core::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Records lost to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(pid: ProcessId) -> Dispatch {
        Dispatch { cpu: 0, pid, priority: Priority::DEFAULT }
    }

    #[test]
    fn drain_returns_oldest_first() {
        let trace = DispatchTrace::new(8);
        trace.record(at(1));
        trace.record(at(2));
        let pids: Vec<ProcessId> = trace.drain().iter().map(|d| d.pid).collect();
        assert_eq!(pids, [1, 2]);
        assert!(trace.is_empty());
    }

    #[test]
    fn overflow_keeps_newest() {
        let trace = DispatchTrace::new(2);
        for pid in 1..=5 {
            trace.record(at(pid));
        }
        assert_eq!(trace.dropped(), 3);
        let pids: Vec<ProcessId> = trace.drain().iter().map(|d| d.pid).collect();
        assert_eq!(pids, [4, 5]);
    }
}
