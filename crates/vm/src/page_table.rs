//! Per-process virtual page table.
//!
//! Maps every page a process may touch to its [`PageDescriptor`]. Registering a page is
//! pure bookkeeping: no frame or swap slot is consumed until the page faults.

use alloc::collections::BTreeMap;
use alloc::collections::btree_map::Entry;
use alloc::vec::Vec;

use crate::{PageDescriptor, PageNumber, PageStateKind, VirtualAddress};

/// The virtual page table of one process.
#[derive(Debug, Default)]
pub struct PageTable {
    pages: BTreeMap<PageNumber, PageDescriptor>,
}

impl PageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Adds `descriptor` under its page.
    ///
    /// Returns None, leaving the table unchanged, if the page already has a descriptor.
    pub fn register(&mut self, descriptor: PageDescriptor) -> Option<&mut PageDescriptor> {
        match self.pages.entry(descriptor.page()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(descriptor)),
        }
    }

    /// Returns the descriptor for the page containing `addr`.
    pub fn lookup(&self, addr: VirtualAddress) -> Option<&PageDescriptor> {
        self.pages.get(&addr.page_number())
    }

    /// Returns the descriptor for `page`.
    pub fn get(&self, page: PageNumber) -> Option<&PageDescriptor> {
        self.pages.get(&page)
    }

    /// Returns the descriptor for `page` mutably.
    pub fn get_mut(&mut self, page: PageNumber) -> Option<&mut PageDescriptor> {
        self.pages.get_mut(&page)
    }

    /// Returns the first page in `[first, first + count)` that has a descriptor.
    pub fn any_in_range(&self, first: PageNumber, count: usize) -> Option<PageNumber> {
        self.pages
            .range(first..first + count)
            .next()
            .map(|(page, _)| *page)
    }

    /// Removes and returns the descriptor for `page`.
    pub fn remove(&mut self, page: PageNumber) -> Option<PageDescriptor> {
        self.pages.remove(&page)
    }

    /// Removes every descriptor, returning them in page order.
    pub fn take_all(&mut self) -> Vec<PageDescriptor> {
        core::mem::take(&mut self.pages).into_values().collect()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if the table holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Number of descriptors in the given state.
    pub fn count(&self, kind: PageStateKind) -> usize {
        self.pages.values().filter(|d| d.kind() == kind).count()
    }

    /// Iterates over descriptors in page order.
    pub fn iter(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.pages.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PAGE_SIZE, PageState, SwapSlot};

    #[test]
    fn register_rejects_duplicates() {
        let mut table = PageTable::new();
        assert!(table.register(PageDescriptor::uninitialized(PageNumber::new(4))).is_some());

        let duplicate = PageDescriptor::new(
            PageNumber::new(4),
            PageState::InSwap(SwapSlot::new(0)),
            false,
        );
        assert!(table.register(duplicate).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(PageNumber::new(4)).map(PageDescriptor::kind),
            Some(PageStateKind::Uninitialized)
        );
    }

    #[test]
    fn lookup_finds_containing_page() {
        let mut table = PageTable::new();
        table.register(PageDescriptor::uninitialized(PageNumber::new(4)));

        assert!(table.lookup(VirtualAddress::new(4 * PAGE_SIZE + 123)).is_some());
        assert!(table.lookup(VirtualAddress::new(5 * PAGE_SIZE)).is_none());
    }

    #[test]
    fn range_queries() {
        let mut table = PageTable::new();
        table.register(PageDescriptor::uninitialized(PageNumber::new(10)));

        assert_eq!(table.any_in_range(PageNumber::new(5), 5), None);
        assert_eq!(
            table.any_in_range(PageNumber::new(5), 6),
            Some(PageNumber::new(10))
        );
    }

    #[test]
    fn take_all_empties_the_table() {
        let mut table = PageTable::new();
        for i in 0..3 {
            table.register(PageDescriptor::uninitialized(PageNumber::new(i)));
        }
        let taken = table.take_all();
        assert_eq!(taken.len(), 3);
        assert!(table.is_empty());
        assert_eq!(table.count(PageStateKind::Uninitialized), 0);
    }
}
