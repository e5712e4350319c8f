//! The virtual memory subsystem as a whole.
//!
//! [`VirtualMemory`] owns the shared state: the user frame pool and its frame table, the
//! swap manager, and the registry of live address spaces. Fault resolution lives in
//! [`fault`](crate::fault) and region setup in [`mmap`](crate::mmap); this module covers
//! construction, process lifecycle and the emulated user-memory accessors.

use alloc::sync::Arc;

use crate::address_space::SpaceRegistry;
use crate::block::BlockDevice;
use crate::frame::FramePool;
use crate::frame_allocator::Reclaimer;
use crate::mmu::Mmu;
use crate::{
    AddressSpace, Backing, Exhaustion, FrameAllocator, FrameNumber, PAGE_SIZE, PageDescriptor,
    PageState, SwapManager, VirtualAddress, VmConfig, VmError, VmStats, process::ProcessId,
};

/// How many times a user copy faults a page back in before giving up on it.
const MAX_USER_FAULTS: usize = 16;

/// Demand-paged virtual memory for every user process.
pub struct VirtualMemory<M: Mmu, D: BlockDevice> {
    config: VmConfig,
    mmu: M,
    frames: FramePool,
    allocator: FrameAllocator,
    swap: SwapManager<D>,
    spaces: SpaceRegistry,
    stats: VmStats,
}

impl<M: Mmu, D: BlockDevice> VirtualMemory<M, D> {
    /// Creates the subsystem with `config.user_frames` frames and `swap_device` as the
    /// swap store.
    pub fn new(config: VmConfig, mmu: M, swap_device: D) -> Self {
        let vm = Self {
            config,
            mmu,
            frames: FramePool::new(config.user_frames),
            allocator: FrameAllocator::new(config.user_frames),
            swap: SwapManager::new(swap_device),
            spaces: SpaceRegistry::default(),
            stats: VmStats::default(),
        };
        log::info!(
            "Virtual memory initialised: {} user frames ({} KiB), {} swap slots",
            vm.frames.len(),
            vm.frames.len() * PAGE_SIZE / 1024,
            vm.swap.capacity()
        );
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    pub fn swap(&self) -> &SwapManager<D> {
        &self.swap
    }

    pub fn frame_allocator(&self) -> &FrameAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    pub(crate) fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub(crate) fn reclaimer(&self) -> Reclaimer<'_, M, D> {
        Reclaimer {
            mmu: &self.mmu,
            frames: &self.frames,
            swap: &self.swap,
            spaces: &self.spaces,
            stats: &self.stats,
        }
    }

    /// Creates an empty address space for `pid`, or returns the existing one.
    pub fn create_address_space(&self, pid: ProcessId) -> Arc<AddressSpace> {
        let space = self.spaces.create(pid);
        log::debug!("Process {}: address space created", pid);
        space
    }

    /// Returns the address space of `pid`, if it has one.
    pub fn address_space(&self, pid: ProcessId) -> Option<Arc<AddressSpace>> {
        self.spaces.get(pid)
    }

    /// Number of live address spaces.
    pub fn process_count(&self) -> usize {
        self.spaces.len()
    }

    /// Tears down `space` when its process exits.
    ///
    /// The space is unregistered first so that eviction stops selecting its frames. Mapped
    /// regions are unmapped with write-back, resident frames are released and swap slots
    /// are freed without being read. The process must not fault or unmap concurrently.
    pub fn destroy_table(&self, space: &AddressSpace) {
        let pid = space.pid();
        self.spaces.remove(pid);

        for region in space.take_regions() {
            self.release_region(space, &region);
        }
        let descriptors = space.pages().take_all();
        let count = descriptors.len();
        for descriptor in descriptors {
            self.discard_descriptor(pid, descriptor);
        }
        self.mmu.destroy(pid);

        log::debug!("Process {}: address space destroyed ({} pages)", pid, count);
    }

    /// Releases whatever `descriptor` holds. The descriptor must already be detached from
    /// its page table.
    ///
    /// Dirty mapped pages are written back to their file first.
    pub(crate) fn discard_descriptor(&self, pid: ProcessId, descriptor: PageDescriptor) {
        let page = descriptor.page();
        match descriptor.state() {
            PageState::InFrame { frame, origin } => {
                let dirty = self.mmu.is_dirty(pid, page);
                self.mmu.unmap(pid, page);
                if let Backing::Mmap(source) = origin {
                    if dirty {
                        match source.store(&self.frames.data(*frame)) {
                            Ok(()) => VmStats::bump(&self.stats.write_backs),
                            Err(err) => log::warn!(
                                "Process {}: write-back of page {} failed: {}",
                                pid,
                                page,
                                err
                            ),
                        }
                    }
                }
                self.allocator.release(*frame);
            }
            PageState::InSwap(slot) => self.swap.swap_free(*slot),
            PageState::FileBacked(_) | PageState::MmapBacked(_) | PageState::Uninitialized => {}
        }
    }

    /// Evicts one resident page and returns its now free frame.
    pub fn reclaim_frame(&self) -> Result<FrameNumber, VmError> {
        Ok(self.allocator.evict_one(&self.reclaimer())?)
    }

    /// Copies user memory at `addr` into `buffer`, faulting pages in as needed.
    pub fn read_user(
        &self,
        space: &AddressSpace,
        addr: VirtualAddress,
        buffer: &mut [u8],
    ) -> Result<(), VmError> {
        self.copy_user(space, addr, buffer.len(), false, |frame, range| {
            buffer[range].copy_from_slice(frame);
        })
    }

    /// Copies `data` into user memory at `addr`, faulting pages in as needed.
    ///
    /// Writing to a read-only page fails with [`VmError::InvalidAccess`].
    pub fn write_user(
        &self,
        space: &AddressSpace,
        addr: VirtualAddress,
        data: &[u8],
    ) -> Result<(), VmError> {
        self.copy_user(space, addr, data.len(), true, |frame, range| {
            frame.copy_from_slice(&data[range]);
        })
    }

    /// Walks `len` bytes from `addr` page by page, handing each pinned frame slice to
    /// `copy` along with the matching range of the caller's buffer.
    fn copy_user(
        &self,
        space: &AddressSpace,
        addr: VirtualAddress,
        len: usize,
        write: bool,
        mut copy: impl FnMut(&mut [u8], core::ops::Range<usize>),
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < len {
            let cursor = addr.checked_add(done).ok_or(VmError::InvalidAccess(addr))?;
            let offset = cursor.page_offset();
            let chunk = (PAGE_SIZE - offset).min(len - done);

            let frame = self.pin_resident(space, cursor, write)?;
            self.mmu.record_access(space.pid(), cursor.page_number(), write);
            copy(
                &mut self.frames.data(frame)[offset..offset + chunk],
                done..done + chunk,
            );
            if let Some(descriptor) = space.pages().get_mut(cursor.page_number()) {
                descriptor.set_pinned(false);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Pins the resident page containing `addr`, resolving it first if necessary.
    ///
    /// A page pinned by another thread is waited on by spinning. Pins are only held for
    /// the length of one fill or one page copy, so the wait ends once that thread's
    /// resolution or copy finishes; the calling thread must not itself hold a pin on the
    /// page. Re-faults after eviction are bounded by `MAX_USER_FAULTS`.
    fn pin_resident(
        &self,
        space: &AddressSpace,
        addr: VirtualAddress,
        write: bool,
    ) -> Result<FrameNumber, VmError> {
        let page = addr.page_number();
        let mut faults = 0;
        loop {
            {
                let mut pages = space.pages();
                let descriptor = pages.get_mut(page).ok_or(VmError::InvalidAccess(addr))?;
                if write && !descriptor.is_writable() {
                    return Err(VmError::InvalidAccess(addr));
                }
                if descriptor.is_pinned() {
                    drop(pages);
                    core::hint::spin_loop();
                    continue;
                }
                if let Some(frame) = descriptor.frame() {
                    descriptor.set_pinned(true);
                    return Ok(frame);
                }
            }

            if faults == MAX_USER_FAULTS {
                log::warn!(
                    "Process {}: page {} evicted {} times before it could be used",
                    space.pid(),
                    page,
                    faults
                );
                return Err(VmError::ResourceExhausted(Exhaustion::NoFrames));
            }
            faults += 1;
            self.resolve_fault(space, addr)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::block::MemoryDisk;
    use crate::file::{FileHandle, MemoryFile};
    use crate::mmu::SoftwareMmu;
    use crate::swap::SECTORS_PER_SLOT;
    use crate::{PageNumber, PageStateKind};

    const PID: ProcessId = ProcessId::new(1);
    const HEAP: VirtualAddress = VirtualAddress::new(0x1000_0000);

    fn vm(frames: usize, slots: usize) -> VirtualMemory<SoftwareMmu, MemoryDisk> {
        VirtualMemory::new(
            VmConfig::new().with_user_frames(frames),
            SoftwareMmu::new(),
            MemoryDisk::new(slots * SECTORS_PER_SLOT),
        )
    }

    /// Registers `count` zero pages starting at `start`.
    fn anonymous(space: &AddressSpace, start: VirtualAddress, count: usize) {
        let mut pages = space.pages();
        for i in 0..count {
            pages.register(PageDescriptor::uninitialized(start.page_number() + i));
        }
    }

    fn patterned(seed: u8) -> Vec<u8> {
        (0..PAGE_SIZE).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect()
    }

    fn page_at(index: usize) -> VirtualAddress {
        HEAP + index * PAGE_SIZE
    }

    fn kind(space: &AddressSpace, addr: VirtualAddress) -> PageStateKind {
        space.descriptor(addr).unwrap().kind()
    }

    #[test]
    fn user_copy_spans_pages() {
        let vm = vm(4, 4);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 2);

        let data: Vec<u8> = (0..200).collect();
        let addr = HEAP + (PAGE_SIZE - 100);
        vm.write_user(&space, addr, &data).unwrap();

        let mut back = vec![0; 200];
        vm.read_user(&space, addr, &mut back).unwrap();
        assert_eq!(back, data);
        assert_eq!(vm.frame_allocator().resident_count(), 2);
        assert!(vm.mmu().is_dirty(PID, HEAP.page_number()));
    }

    #[test]
    fn evicted_page_round_trips_through_swap() {
        let vm = vm(2, 8);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 6);

        for i in 0..6 {
            vm.write_user(&space, page_at(i), &patterned(i as u8)).unwrap();
        }
        assert!(vm.stats().snapshot().swap_outs >= 4);
        assert_eq!(kind(&space, page_at(0)), PageStateKind::InSwap);

        for i in 0..6 {
            let mut page = vec![0; PAGE_SIZE];
            vm.read_user(&space, page_at(i), &mut page).unwrap();
            assert_eq!(page, patterned(i as u8), "page {i}");
        }
        assert!(vm.stats().snapshot().swap_ins >= 4);
    }

    #[test]
    fn swap_slots_match_swapped_descriptors() {
        let vm = vm(3, 16);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 10);

        for round in 0..3 {
            for i in 0..10 {
                vm.write_user(&space, page_at(i), &[round as u8; 16]).unwrap();
            }
            let swapped = space.pages().count(PageStateKind::InSwap);
            assert_eq!(vm.swap().used_slots(), swapped);
        }
    }

    #[test]
    fn every_resident_frame_has_exactly_one_owner() {
        let vm = vm(4, 16);
        let a = vm.create_address_space(PID);
        let b = vm.create_address_space(ProcessId::new(2));
        anonymous(&a, HEAP, 6);
        anonymous(&b, HEAP, 6);

        for i in 0..6 {
            vm.write_user(&a, page_at(i), &[1]).unwrap();
            vm.write_user(&b, page_at(i), &[2]).unwrap();
        }

        let entries = vm.frame_allocator().entries();
        assert_eq!(entries.len(), 4);
        for entry in entries {
            let space = vm.address_space(entry.owner).unwrap();
            let descriptor = space.pages().get(entry.page).cloned().unwrap();
            assert_eq!(descriptor.frame(), Some(entry.frame));
            assert_eq!(vm.mmu().translate(entry.owner, entry.page), Some(entry.frame));
        }
        let resident = a.pages().count(PageStateKind::InFrame)
            + b.pages().count(PageStateKind::InFrame);
        assert_eq!(resident, 4);
    }

    #[test]
    fn teardown_frees_swap_without_reading_it() {
        let vm = vm(1, 4);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 3);
        for i in 0..3 {
            vm.write_user(&space, page_at(i), &[7; 8]).unwrap();
        }
        assert_eq!(vm.swap().used_slots(), 2);

        let reads = vm.swap().with_device(MemoryDisk::reads);
        vm.destroy_table(&space);

        assert_eq!(vm.swap().used_slots(), 0);
        assert_eq!(vm.swap().with_device(MemoryDisk::reads), reads);
        assert_eq!(vm.frame_allocator().resident_count(), 0);
        assert_eq!(vm.frame_allocator().free_count(), 1);
        assert_eq!(vm.mmu().mapped_count(PID), 0);
        assert!(vm.address_space(PID).is_none());
        assert!(space.pages().is_empty());
    }

    #[test]
    fn small_file_maps_one_zero_padded_page() {
        let vm = vm(4, 4);
        let space = vm.create_address_space(PID);
        let contents: Vec<u8> = (0..100).collect();
        let file = FileHandle::new(MemoryFile::new(contents.clone()));

        vm.register_file_backed_region(&space, file, HEAP, true).unwrap();
        assert_eq!(space.pages().len(), 1);
        let descriptor = space.descriptor(HEAP).unwrap();
        let source = descriptor.source().unwrap();
        assert_eq!((source.read_bytes, source.zero_bytes), (100, PAGE_SIZE - 100));

        let mut page = vec![0xFF; PAGE_SIZE];
        vm.read_user(&space, HEAP, &mut page).unwrap();
        assert_eq!(&page[..100], &contents[..]);
        assert!(page[100..].iter().all(|b| *b == 0));
        assert_eq!(vm.stats().snapshot().file_reads, 1);
    }

    #[test]
    fn mapped_writes_reach_the_file_on_unmap() {
        let vm = vm(4, 4);
        let space = vm.create_address_space(PID);
        let file = MemoryFile::new(vec![0u8; PAGE_SIZE + 10]);
        let id = vm
            .register_file_backed_region(&space, FileHandle::new(file.clone()), HEAP, true)
            .unwrap();

        vm.write_user(&space, HEAP + PAGE_SIZE, b"tail").unwrap();
        vm.read_user(&space, HEAP, &mut [0u8; 4]).unwrap();
        vm.unmap_region(&space, id).unwrap();

        let contents = file.contents();
        assert_eq!(contents.len(), PAGE_SIZE + 10);
        assert_eq!(&contents[PAGE_SIZE..PAGE_SIZE + 4], b"tail");
        assert!(contents[..PAGE_SIZE].iter().all(|b| *b == 0));
        assert_eq!(vm.stats().snapshot().write_backs, 1);
        assert!(space.pages().is_empty());
        assert_eq!(vm.frame_allocator().resident_count(), 0);
        assert_eq!(vm.unmap_region(&space, id), Err(VmError::UnknownMapping(id)));
    }

    #[test]
    fn evicted_mapped_page_reloads_from_file() {
        let vm = vm(1, 1);
        let space = vm.create_address_space(PID);
        let file = MemoryFile::new(vec![0u8; 64]);
        vm.register_file_backed_region(&space, FileHandle::new(file.clone()), HEAP, true)
            .unwrap();
        anonymous(&space, page_at(4), 1);

        vm.write_user(&space, HEAP, b"dirty").unwrap();
        vm.write_user(&space, page_at(4), b"other").unwrap();
        assert_eq!(kind(&space, HEAP), PageStateKind::MmapBacked);
        assert_eq!(&file.contents()[..5], b"dirty");
        assert_eq!(vm.swap().used_slots(), 0);

        let mut back = [0; 5];
        vm.read_user(&space, HEAP, &mut back).unwrap();
        assert_eq!(&back, b"dirty");
    }

    #[test]
    fn teardown_writes_back_mapped_regions() {
        let vm = vm(2, 2);
        let space = vm.create_address_space(PID);
        let file = MemoryFile::new(vec![0u8; 16]);
        vm.register_file_backed_region(&space, FileHandle::new(file.clone()), HEAP, true)
            .unwrap();
        vm.write_user(&space, HEAP, b"bye").unwrap();

        vm.destroy_table(&space);
        assert_eq!(&file.contents()[..3], b"bye");
        assert!(space.regions().is_empty());
        assert_eq!(vm.frame_allocator().resident_count(), 0);
    }

    #[test]
    fn read_only_segment_rejects_writes() {
        let vm = vm(2, 2);
        let space = vm.create_address_space(PID);
        let file = FileHandle::new(MemoryFile::new(vec![3u8; 32]));
        vm.register_segment(&space, file, 0, HEAP, 32, PAGE_SIZE - 32, false)
            .unwrap();

        assert_eq!(
            vm.write_user(&space, HEAP, &[1]),
            Err(VmError::InvalidAccess(HEAP))
        );
        let mut back = [0; 4];
        vm.read_user(&space, HEAP, &mut back).unwrap();
        assert_eq!(back, [3; 4]);
    }

    #[test]
    fn unregistered_address_is_invalid() {
        let vm = vm(2, 2);
        let space = vm.create_address_space(PID);
        assert_eq!(
            vm.read_user(&space, HEAP, &mut [0u8; 1]),
            Err(VmError::InvalidAccess(HEAP))
        );
    }

    #[test]
    fn reclaim_frame_evicts_to_the_free_list() {
        let vm = vm(2, 2);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 2);
        vm.write_user(&space, page_at(0), &[1]).unwrap();
        vm.write_user(&space, page_at(1), &[2]).unwrap();

        let frame = vm.reclaim_frame().unwrap();
        assert_eq!(vm.frame_allocator().entry(frame), None);
        assert_eq!(vm.frame_allocator().free_count(), 1);
        assert_eq!(vm.swap().used_slots(), 1);
    }

    #[test]
    fn pinned_page_survives_pressure() {
        let vm = vm(2, 4);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 4);
        vm.write_user(&space, page_at(0), &[9]).unwrap();
        space
            .pages()
            .get_mut(PageNumber::from(page_at(0)))
            .unwrap()
            .set_pinned(true);

        for i in 1..4 {
            vm.write_user(&space, page_at(i), &[i as u8]).unwrap();
        }
        assert_eq!(kind(&space, page_at(0)), PageStateKind::InFrame);
    }

    #[test]
    fn copy_waits_for_another_threads_pin() {
        let vm = vm(2, 4);
        let space = vm.create_address_space(PID);
        anonymous(&space, HEAP, 1);
        vm.write_user(&space, HEAP, &[1]).unwrap();
        let set_pinned = |pinned| {
            space
                .pages()
                .get_mut(HEAP.page_number())
                .unwrap()
                .set_pinned(pinned);
        };
        set_pinned(true);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                set_pinned(false);
            });
            vm.write_user(&space, HEAP, &[2]).unwrap();
        });

        let mut byte = [0u8];
        vm.read_user(&space, HEAP, &mut byte).unwrap();
        assert_eq!(byte, [2]);
        assert!(!space.descriptor(HEAP).unwrap().is_pinned());
    }
}
