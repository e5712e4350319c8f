//! Page descriptors: where a virtual page's data lives and how to rebuild it.

use crate::file::FileHandle;
use crate::frame::FrameData;
use crate::{BackingStoreFailure, FrameNumber, PAGE_SIZE, PageNumber, SwapSlot, VirtualAddress};

/// How to reconstruct a page from a file.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// The file holding the page's contents.
    pub file: FileHandle,
    /// Byte offset of the page's contents within the file.
    pub offset: u64,
    /// Bytes to read from the file.
    pub read_bytes: usize,
    /// Bytes to zero after the read ones.
    pub zero_bytes: usize,
}

impl FileSource {
    /// Describes a page read from `file` at `offset`.
    ///
    /// # Panics
    /// Panics if `read_bytes + zero_bytes` is not exactly one page.
    pub fn new(file: FileHandle, offset: u64, read_bytes: usize, zero_bytes: usize) -> Self {
        assert_eq!(
            read_bytes + zero_bytes,
            PAGE_SIZE,
            "file source must cover exactly one page"
        );
        Self {
            file,
            offset,
            read_bytes,
            zero_bytes,
        }
    }

    /// Fills `page` from the file: `read_bytes` from `offset`, then zeros.
    pub(crate) fn load(&self, page: &mut FrameData) -> Result<(), BackingStoreFailure> {
        let actual = self.file.read_at(self.offset, &mut page[..self.read_bytes]);
        if actual != self.read_bytes {
            return Err(BackingStoreFailure::FileRead {
                expected: self.read_bytes,
                actual,
            });
        }
        page[self.read_bytes..].fill(0);
        Ok(())
    }

    /// Writes the file-backed part of `page` back to `offset`.
    pub(crate) fn store(&self, page: &FrameData) -> Result<(), BackingStoreFailure> {
        let actual = self.file.write_at(self.offset, &page[..self.read_bytes]);
        if actual != self.read_bytes {
            return Err(BackingStoreFailure::FileWrite {
                expected: self.read_bytes,
                actual,
            });
        }
        Ok(())
    }
}

/// What a resident page was loaded from. Decides where it goes when evicted.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Stack, swapped-in, or otherwise file-less data.
    Anonymous,
    /// Loaded from an executable or other read-mostly file.
    File(FileSource),
    /// Part of a memory-mapped file region.
    Mmap(FileSource),
}

/// Where a page's data currently lives.
///
/// Each variant carries only the data meaningful in that state, so a resident page
/// cannot hold a stale swap slot.
#[derive(Debug, Clone)]
pub enum PageState {
    /// Resident in `frame`.
    InFrame { frame: FrameNumber, origin: Backing },
    /// Paged out to a swap slot.
    InSwap(SwapSlot),
    /// Not yet loaded (or discarded); read it from the file on the next fault.
    FileBacked(FileSource),
    /// Part of a mapped file and not resident.
    MmapBacked(FileSource),
    /// Never touched; materialises as a zero page.
    Uninitialized,
}

/// The discriminant of [`PageState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStateKind {
    InFrame,
    InSwap,
    FileBacked,
    MmapBacked,
    Uninitialized,
}

impl PageState {
    /// Returns the discriminant of this state.
    pub fn kind(&self) -> PageStateKind {
        match self {
            Self::InFrame { .. } => PageStateKind::InFrame,
            Self::InSwap(_) => PageStateKind::InSwap,
            Self::FileBacked(_) => PageStateKind::FileBacked,
            Self::MmapBacked(_) => PageStateKind::MmapBacked,
            Self::Uninitialized => PageStateKind::Uninitialized,
        }
    }
}

/// What eviction does with a victim's contents.
#[derive(Debug, Clone)]
pub(crate) enum EvictionPlan {
    /// Write the frame to a fresh swap slot.
    Swap,
    /// Write the frame back to its file if dirty, then fall back to `MmapBacked`.
    WriteBack(FileSource),
    /// Drop the frame; the file holds the canonical copy.
    Discard(PageState),
}

/// Bookkeeping for one virtual page of a process.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    page: PageNumber,
    state: PageState,
    writable: bool,
    accessed: bool,
    pinned: bool,
}

impl PageDescriptor {
    /// Creates an unpinned, unaccessed descriptor.
    pub fn new(page: PageNumber, state: PageState, writable: bool) -> Self {
        Self {
            page,
            state,
            writable,
            accessed: false,
            pinned: false,
        }
    }

    /// A writable zero page, as created by stack growth.
    pub fn uninitialized(page: PageNumber) -> Self {
        Self::new(page, PageState::Uninitialized, true)
    }

    pub fn page(&self) -> PageNumber {
        self.page
    }

    pub fn address(&self) -> VirtualAddress {
        self.page.start()
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn kind(&self) -> PageStateKind {
        self.state.kind()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Software access hint consulted by eviction.
    pub fn is_accessed(&self) -> bool {
        self.accessed
    }

    /// True while a frame is being filled for this page.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// The frame holding this page, if resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        match self.state {
            PageState::InFrame { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// The swap slot holding this page, if swapped out.
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match self.state {
            PageState::InSwap(slot) => Some(slot),
            _ => None,
        }
    }

    /// The file this page is rebuilt from, if it is not resident.
    pub fn source(&self) -> Option<&FileSource> {
        match &self.state {
            PageState::FileBacked(source) | PageState::MmapBacked(source) => Some(source),
            _ => None,
        }
    }

    pub(crate) fn set_state(&mut self, state: PageState) {
        self.state = state;
    }

    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    pub(crate) fn set_accessed(&mut self, accessed: bool) {
        self.accessed = accessed;
    }

    /// Decides where a resident page's contents go when its frame is reclaimed.
    ///
    /// Returns None if the page is not resident.
    pub(crate) fn eviction_plan(&self) -> Option<EvictionPlan> {
        let PageState::InFrame { origin, .. } = &self.state else {
            return None;
        };
        Some(match origin {
            Backing::Anonymous => EvictionPlan::Swap,
            Backing::File(_) if self.writable => EvictionPlan::Swap,
            Backing::File(source) => EvictionPlan::Discard(PageState::FileBacked(source.clone())),
            Backing::Mmap(source) => EvictionPlan::WriteBack(source.clone()),
        })
    }
}
