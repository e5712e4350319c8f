//! The hardware page table, seen as an opaque capability.
//!
//! The subsystem never walks page tables itself. It installs and clears translations and
//! samples the accessed and dirty bits the CPU maintains, all through [`Mmu`].
//!
//! Under `cfg(test)` or the `software-emulation` feature, [`SoftwareMmu`] provides a host
//! emulation with per-process page directories.

use crate::{FrameNumber, PageNumber, process::ProcessId};

#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::{PageDirectory, PageEntry, PageFlags, SoftwareMmu};

/// Operations the subsystem needs from the hardware page tables.
///
/// Implementations are shared by every thread that faults, so all methods take `&self`
/// and must synchronise internally.
pub trait Mmu: Send + Sync {
    /// Installs a translation from `page` to `frame` in `process`'s page table.
    ///
    /// Returns false, leaving the table unchanged, if `page` is already mapped.
    fn map(
        &self,
        process: ProcessId,
        page: PageNumber,
        frame: FrameNumber,
        writable: bool,
    ) -> bool;

    /// Removes the translation for `page`, if any. Later accesses fault.
    fn unmap(&self, process: ProcessId, page: PageNumber);

    /// Returns the frame `page` is mapped to, if it is mapped.
    fn translate(&self, process: ProcessId, page: PageNumber) -> Option<FrameNumber>;

    /// Returns the hardware accessed bit for `page`. Unmapped pages report false.
    fn is_accessed(&self, process: ProcessId, page: PageNumber) -> bool;

    /// Clears the hardware accessed bit for `page`.
    fn clear_accessed(&self, process: ProcessId, page: PageNumber);

    /// Returns the hardware dirty bit for `page`. Unmapped pages report false.
    fn is_dirty(&self, process: ProcessId, page: PageNumber) -> bool;

    /// Sets or clears the hardware dirty bit for `page`, if it is mapped.
    fn set_dirty(&self, process: ProcessId, page: PageNumber, dirty: bool);

    /// Records an access the CPU made through the mapping of `page`.
    ///
    /// Real hardware sets the accessed and dirty bits on its own; only emulations need
    /// to do anything here.
    fn record_access(&self, process: ProcessId, page: PageNumber, write: bool) {
        let _ = (process, page, write);
    }

    /// Discards every translation belonging to `process`.
    fn destroy(&self, process: ProcessId);
}
