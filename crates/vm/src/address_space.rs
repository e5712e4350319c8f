//! Address space management.
//!
//! An [`AddressSpace`] bundles a process's virtual page table with its memory-mapped
//! regions. The subsystem keeps a registry of live address spaces keyed by process so
//! that eviction, which runs on behalf of any process, can find the owner of a frame.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard, RwLock};

use crate::file::FileHandle;
use crate::{MapId, MmapRegion, PageDescriptor, PageNumber, PageTable, VirtualAddress};
use crate::process::ProcessId;

/// The virtual address space of one process.
pub struct AddressSpace {
    pid: ProcessId,
    pages: Mutex<PageTable>,
    regions: Mutex<Vec<MmapRegion>>,
    next_map_id: AtomicU32,
}

impl AddressSpace {
    pub(crate) fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            pages: Mutex::new(PageTable::new()),
            regions: Mutex::new(Vec::new()),
            next_map_id: AtomicU32::new(0),
        }
    }

    /// The owning process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Locks and returns the virtual page table.
    ///
    /// Eviction takes this lock while holding the frame table lock, so callers must not
    /// allocate frames while holding the guard.
    pub fn pages(&self) -> MutexGuard<'_, PageTable> {
        self.pages.lock()
    }

    /// Returns a copy of the descriptor for the page containing `addr`.
    pub fn descriptor(&self, addr: VirtualAddress) -> Option<PageDescriptor> {
        self.pages.lock().lookup(addr).cloned()
    }

    /// Returns the memory-mapped regions, in creation order.
    pub fn regions(&self) -> Vec<MmapRegion> {
        self.regions.lock().clone()
    }

    pub(crate) fn add_region(
        &self,
        file: FileHandle,
        start: PageNumber,
        page_count: usize,
    ) -> MapId {
        let id = MapId::new(self.next_map_id.fetch_add(1, Ordering::Relaxed));
        self.regions.lock().push(MmapRegion {
            id,
            file,
            start,
            page_count,
        });
        id
    }

    pub(crate) fn take_region(&self, id: MapId) -> Option<MmapRegion> {
        let mut regions = self.regions.lock();
        let index = regions.iter().position(|region| region.id == id)?;
        Some(regions.remove(index))
    }

    pub(crate) fn take_regions(&self) -> Vec<MmapRegion> {
        core::mem::take(&mut *self.regions.lock())
    }
}

/// Live address spaces, keyed by process.
#[derive(Default)]
pub(crate) struct SpaceRegistry {
    spaces: RwLock<BTreeMap<ProcessId, Arc<AddressSpace>>>,
}

impl SpaceRegistry {
    /// Registers a new space for `pid`, or returns the one already registered.
    pub fn create(&self, pid: ProcessId) -> Arc<AddressSpace> {
        self.spaces
            .write()
            .entry(pid)
            .or_insert_with(|| Arc::new(AddressSpace::new(pid)))
            .clone()
    }

    pub fn get(&self, pid: ProcessId) -> Option<Arc<AddressSpace>> {
        self.spaces.read().get(&pid).cloned()
    }

    pub fn remove(&self, pid: ProcessId) -> Option<Arc<AddressSpace>> {
        self.spaces.write().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }
}
