//! Paging activity counters.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Counters updated as the subsystem pages data in and out.
#[derive(Debug, Default)]
pub struct VmStats {
    pub(crate) faults: AtomicU64,
    pub(crate) stack_growths: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) swap_outs: AtomicU64,
    pub(crate) swap_ins: AtomicU64,
    pub(crate) file_reads: AtomicU64,
    pub(crate) write_backs: AtomicU64,
    pub(crate) discards: AtomicU64,
}

/// A point-in-time copy of [`VmStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub faults: u64,
    pub stack_growths: u64,
    pub evictions: u64,
    pub swap_outs: u64,
    pub swap_ins: u64,
    pub file_reads: u64,
    pub write_backs: u64,
    pub discards: u64,
}

impl VmStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            faults: load(&self.faults),
            stack_growths: load(&self.stack_growths),
            evictions: load(&self.evictions),
            swap_outs: load(&self.swap_outs),
            swap_ins: load(&self.swap_ins),
            file_reads: load(&self.file_reads),
            write_backs: load(&self.write_backs),
            discards: load(&self.discards),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} stack_growths={} evictions={} swap_outs={} swap_ins={} \
             file_reads={} write_backs={} discards={}",
            self.faults,
            self.stack_growths,
            self.evictions,
            self.swap_outs,
            self.swap_ins,
            self.file_reads,
            self.write_backs,
            self.discards
        )
    }
}
