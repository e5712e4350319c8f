//! Process identity, as provided by the scheduler.

use core::fmt;

/// Identifies a user process.
///
/// Frame table entries are tagged with the owning process so that eviction can reach the
/// right hardware page table and the right virtual page table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Creates a process identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The scheduler's view of which process is running on this thread.
pub trait Scheduler {
    /// Returns the process on whose behalf the current thread runs.
    fn current_process(&self) -> ProcessId;
}
