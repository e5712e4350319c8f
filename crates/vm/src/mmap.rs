//! Lazily loaded regions: memory-mapped files and executable segments.
//!
//! Both are bulk registration. Each page of the region gets a descriptor that says how to
//! read it from the file; nothing is read until the page faults.

use core::fmt;

use crate::block::BlockDevice;
use crate::file::FileHandle;
use crate::mmu::Mmu;
use crate::{
    AddressSpace, FileSource, PAGE_SIZE, PageDescriptor, PageNumber, PageState, VirtualAddress,
    VirtualMemory, VmError,
};

/// Identifies a memory-mapped region within its address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MapId(u32);

impl MapId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file mapped into an address space.
#[derive(Debug, Clone)]
pub struct MmapRegion {
    pub id: MapId,
    pub file: FileHandle,
    /// First mapped page.
    pub start: PageNumber,
    /// Number of pages spanned by the file.
    pub page_count: usize,
}

impl MmapRegion {
    /// Iterates over the pages of the region.
    pub fn pages(&self) -> impl Iterator<Item = PageNumber> + use<> {
        let start = self.start;
        (0..self.page_count).map(move |i| start + i)
    }
}

/// Splits `length` file bytes starting at page `index` into the read/zero pair for that page.
fn page_split(length: usize, index: usize) -> (usize, usize) {
    let read = length.saturating_sub(index * PAGE_SIZE).min(PAGE_SIZE);
    (read, PAGE_SIZE - read)
}

impl<M: Mmu, D: BlockDevice> VirtualMemory<M, D> {
    /// Maps the whole of `file` at `addr` for lazy loading.
    ///
    /// The last page is zero-filled past the end of the file. Pages are written back to
    /// the file, not to swap, when evicted dirty and when the region is unmapped.
    pub fn register_file_backed_region(
        &self,
        space: &AddressSpace,
        file: FileHandle,
        addr: VirtualAddress,
        writable: bool,
    ) -> Result<MapId, VmError> {
        if addr.is_null() || !addr.is_page_aligned() {
            return Err(VmError::Misaligned(addr));
        }
        let length = usize::try_from(file.length()).map_err(|_| VmError::InvalidAccess(addr))?;
        if length == 0 {
            return Err(VmError::EmptyMapping);
        }
        let page_count = length.div_ceil(PAGE_SIZE);
        let start = addr.page_number();
        match addr.checked_add(page_count * PAGE_SIZE) {
            Some(end) if end <= self.config().stack_limit() => {}
            _ => return Err(VmError::InvalidAccess(addr)),
        }

        let mut pages = space.pages();
        if let Some(conflict) = pages.any_in_range(start, page_count) {
            return Err(VmError::AlreadyMapped(conflict.start()));
        }
        for index in 0..page_count {
            let (read, zero) = page_split(length, index);
            let source = FileSource::new(file.clone(), (index * PAGE_SIZE) as u64, read, zero);
            pages.register(PageDescriptor::new(
                start + index,
                PageState::MmapBacked(source),
                writable,
            ));
        }
        drop(pages);

        let id = space.add_region(file, start, page_count);
        log::debug!(
            "Process {}: mapped {} bytes at {} as region {}",
            space.pid(),
            length,
            addr,
            id
        );
        Ok(id)
    }

    /// Unmaps region `id`, writing dirty resident pages back to the file.
    pub fn unmap_region(&self, space: &AddressSpace, id: MapId) -> Result<(), VmError> {
        let region = space.take_region(id).ok_or(VmError::UnknownMapping(id))?;
        self.release_region(space, &region);
        log::debug!("Process {}: unmapped region {}", space.pid(), id);
        Ok(())
    }

    pub(crate) fn release_region(&self, space: &AddressSpace, region: &MmapRegion) {
        for page in region.pages() {
            let descriptor = space.pages().remove(page);
            if let Some(descriptor) = descriptor {
                self.discard_descriptor(space.pid(), descriptor);
            }
        }
    }

    /// Registers an executable segment for lazy loading.
    ///
    /// `read_bytes` bytes are read from `file` starting at `offset` into the pages from
    /// `addr` on, followed by `zero_bytes` zeros. Pages with nothing to read start out as
    /// zero pages. On failure no descriptor is left behind.
    #[allow(clippy::too_many_arguments)]
    pub fn register_segment(
        &self,
        space: &AddressSpace,
        file: FileHandle,
        offset: u64,
        addr: VirtualAddress,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        let span = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::InvalidAccess(addr))?;
        if addr.is_null() || !addr.is_page_aligned() || span % PAGE_SIZE != 0 {
            return Err(VmError::Misaligned(addr));
        }
        match addr.checked_add(span) {
            Some(end) if end <= self.config().stack_limit() => {}
            _ => return Err(VmError::InvalidAccess(addr)),
        }
        let page_count = span / PAGE_SIZE;
        let start = addr.page_number();

        let mut pages = space.pages();
        if let Some(conflict) = pages.any_in_range(start, page_count) {
            return Err(VmError::AlreadyMapped(conflict.start()));
        }
        for index in 0..page_count {
            let (read, zero) = page_split(read_bytes, index);
            let state = if read == 0 {
                PageState::Uninitialized
            } else {
                let page_offset = offset + (index * PAGE_SIZE) as u64;
                PageState::FileBacked(FileSource::new(file.clone(), page_offset, read, zero))
            };
            pages.register(PageDescriptor::new(start + index, state, writable));
        }

        log::debug!(
            "Process {}: segment of {} pages at {} ({} bytes from file offset {:#x})",
            space.pid(),
            page_count,
            addr,
            read_bytes,
            offset
        );
        Ok(())
    }
}
