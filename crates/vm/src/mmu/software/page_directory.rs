//! Emulated per-process page directory.

use alloc::collections::BTreeMap;

use crate::{FrameNumber, PageNumber};

use super::{entry::PageEntry, flags::PageFlags};

/// The emulated page table of one process.
///
/// Only present entries are stored; a missing key is a non-present entry.
#[derive(Debug, Default)]
pub struct PageDirectory {
    entries: BTreeMap<PageNumber, PageEntry>,
}

impl PageDirectory {
    /// Creates an empty page directory.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Maps `page` to `frame` with the given flags.
    ///
    /// Returns false if `page` is already mapped.
    pub fn map(&mut self, page: PageNumber, frame: FrameNumber, flags: PageFlags) -> bool {
        if self.entries.contains_key(&page) {
            return false;
        }

        let mut new_flags = flags;
        new_flags.set_present(true);
        self.entries.insert(page, PageEntry::new(frame, new_flags));
        true
    }

    /// Unmaps `page`, returning the frame that was mapped, or None if the page was not
    /// mapped.
    pub fn unmap(&mut self, page: PageNumber) -> Option<FrameNumber> {
        self.entries.remove(&page).and_then(PageEntry::frame)
    }

    /// Returns the entry for `page`, if present.
    pub fn entry(&self, page: PageNumber) -> Option<PageEntry> {
        self.entries.get(&page).copied()
    }

    /// Returns a mutable reference to the entry for `page`, if present.
    pub fn entry_mut(&mut self, page: PageNumber) -> Option<&mut PageEntry> {
        self.entries.get_mut(&page)
    }

    /// Number of present entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_single_page() {
        let mut dir = PageDirectory::new();
        assert!(dir.map(PageNumber::new(1), FrameNumber::new(2), PageFlags::user_page(true)));

        let entry = dir.entry(PageNumber::new(1)).unwrap();
        assert_eq!(entry.frame(), Some(FrameNumber::new(2)));
        assert!(entry.is_present());
    }

    #[test]
    fn refuses_double_map() {
        let mut dir = PageDirectory::new();
        assert!(dir.map(PageNumber::new(1), FrameNumber::new(2), PageFlags::empty()));
        assert!(!dir.map(PageNumber::new(1), FrameNumber::new(3), PageFlags::empty()));
        assert_eq!(
            dir.entry(PageNumber::new(1)).unwrap().frame(),
            Some(FrameNumber::new(2))
        );
    }

    #[test]
    fn unmap_mapped_page() {
        let mut dir = PageDirectory::new();
        dir.map(PageNumber::new(4), FrameNumber::new(9), PageFlags::user_page(false));
        assert_eq!(dir.unmap(PageNumber::new(4)), Some(FrameNumber::new(9)));
        assert!(dir.is_empty());
    }

    #[test]
    fn unmap_unmapped_page() {
        let mut dir = PageDirectory::new();
        assert_eq!(dir.unmap(PageNumber::new(4)), None);
    }

    #[test]
    fn map_multiple_pages() {
        let mut dir = PageDirectory::new();
        for i in 1..=10 {
            assert!(dir.map(PageNumber::new(i), FrameNumber::new(i * 2), PageFlags::empty()));
        }
        assert_eq!(dir.len(), 10);
    }
}
