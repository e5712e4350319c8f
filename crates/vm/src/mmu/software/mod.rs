//! Software emulation of the hardware page tables.
//!
//! Each process gets a [`PageDirectory`] of [`PageEntry`] values. The CPU's side of the
//! contract (setting accessed and dirty bits) is played by [`Mmu::record_access`], which
//! the emulated user-memory accessors call on every copy.

mod entry;
mod flags;
mod page_directory;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use page_directory::PageDirectory;

use alloc::collections::BTreeMap;

use spin::Mutex;

use super::Mmu;
use crate::{FrameNumber, PageNumber, process::ProcessId};

/// Host emulation of the MMU.
#[derive(Default)]
pub struct SoftwareMmu {
    directories: Mutex<BTreeMap<ProcessId, PageDirectory>>,
}

impl SoftwareMmu {
    /// Creates an MMU with no page tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the entry for `page`, if present.
    pub fn entry(&self, process: ProcessId, page: PageNumber) -> Option<PageEntry> {
        self.directories.lock().get(&process)?.entry(page)
    }

    /// Number of pages currently mapped for `process`.
    pub fn mapped_count(&self, process: ProcessId) -> usize {
        self.directories
            .lock()
            .get(&process)
            .map_or(0, PageDirectory::len)
    }

    /// Sets or clears the accessed bit directly, as the CPU would.
    pub fn set_accessed(&self, process: ProcessId, page: PageNumber, accessed: bool) {
        self.update(process, page, |flags| flags.set_accessed(accessed));
    }

    fn update(&self, process: ProcessId, page: PageNumber, f: impl FnOnce(&mut PageFlags)) {
        let mut directories = self.directories.lock();
        if let Some(entry) = directories
            .get_mut(&process)
            .and_then(|dir| dir.entry_mut(page))
        {
            let mut flags = entry.flags();
            f(&mut flags);
            entry.set_flags(flags);
        }
    }

    fn flags(&self, process: ProcessId, page: PageNumber) -> PageFlags {
        self.entry(process, page)
            .map_or(PageFlags::empty(), PageEntry::flags)
    }
}

impl Mmu for SoftwareMmu {
    fn map(
        &self,
        process: ProcessId,
        page: PageNumber,
        frame: FrameNumber,
        writable: bool,
    ) -> bool {
        self.directories
            .lock()
            .entry(process)
            .or_default()
            .map(page, frame, PageFlags::user_page(writable))
    }

    fn unmap(&self, process: ProcessId, page: PageNumber) {
        if let Some(dir) = self.directories.lock().get_mut(&process) {
            dir.unmap(page);
        }
    }

    fn translate(&self, process: ProcessId, page: PageNumber) -> Option<FrameNumber> {
        self.entry(process, page)?.frame()
    }

    fn is_accessed(&self, process: ProcessId, page: PageNumber) -> bool {
        self.flags(process, page).is_accessed()
    }

    fn clear_accessed(&self, process: ProcessId, page: PageNumber) {
        self.set_accessed(process, page, false);
    }

    fn is_dirty(&self, process: ProcessId, page: PageNumber) -> bool {
        self.flags(process, page).is_dirty()
    }

    fn set_dirty(&self, process: ProcessId, page: PageNumber, dirty: bool) {
        self.update(process, page, |flags| flags.set_dirty(dirty));
    }

    fn record_access(&self, process: ProcessId, page: PageNumber, write: bool) {
        self.update(process, page, |flags| {
            flags.set_accessed(true);
            if write {
                flags.set_dirty(true);
            }
        });
    }

    fn destroy(&self, process: ProcessId) {
        self.directories.lock().remove(&process);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PID: ProcessId = ProcessId::new(1);

    #[test]
    fn map_and_translate() {
        let mmu = SoftwareMmu::new();
        assert!(mmu.map(PID, PageNumber::new(3), FrameNumber::new(7), true));
        assert_eq!(mmu.translate(PID, PageNumber::new(3)), Some(FrameNumber::new(7)));
        assert_eq!(mmu.translate(ProcessId::new(2), PageNumber::new(3)), None);
    }

    #[test]
    fn map_fails_when_already_mapped() {
        let mmu = SoftwareMmu::new();
        assert!(mmu.map(PID, PageNumber::new(3), FrameNumber::new(7), true));
        assert!(!mmu.map(PID, PageNumber::new(3), FrameNumber::new(8), true));
    }

    #[test]
    fn access_bits_follow_recorded_accesses() {
        let mmu = SoftwareMmu::new();
        let page = PageNumber::new(3);
        mmu.map(PID, page, FrameNumber::new(7), true);
        assert!(!mmu.is_accessed(PID, page));

        mmu.record_access(PID, page, false);
        assert!(mmu.is_accessed(PID, page));
        assert!(!mmu.is_dirty(PID, page));

        mmu.record_access(PID, page, true);
        assert!(mmu.is_dirty(PID, page));

        mmu.clear_accessed(PID, page);
        assert!(!mmu.is_accessed(PID, page));
        assert!(mmu.is_dirty(PID, page));

        mmu.set_dirty(PID, page, false);
        assert!(!mmu.is_dirty(PID, page));
    }

    #[test]
    fn unmap_and_destroy() {
        let mmu = SoftwareMmu::new();
        mmu.map(PID, PageNumber::new(1), FrameNumber::new(1), false);
        mmu.map(PID, PageNumber::new(2), FrameNumber::new(2), false);

        mmu.unmap(PID, PageNumber::new(1));
        assert!(!mmu.is_accessed(PID, PageNumber::new(1)));
        assert_eq!(mmu.mapped_count(PID), 1);

        mmu.destroy(PID);
        assert_eq!(mmu.mapped_count(PID), 0);
    }
}
