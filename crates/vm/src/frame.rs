//! User frames and the frame table entries that track them.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};

use crate::{FrameNumber, PAGE_SIZE, PageNumber, process::ProcessId};

/// The contents of one physical frame.
pub type FrameData = [u8; PAGE_SIZE];

/// Records which virtual page currently occupies a frame.
///
/// The entry names its page by `(owner, page)` rather than holding a reference: the
/// owner's page table stays the sole owner of the page descriptor, and eviction looks the
/// descriptor up by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTableEntry {
    /// The frame this entry describes.
    pub frame: FrameNumber,
    /// Process whose page table maps the frame.
    pub owner: ProcessId,
    /// Virtual page materialised in the frame.
    pub page: PageNumber,
}

/// The physical memory backing user frames.
///
/// Each frame has its own lock so that a pinned frame can be filled without holding the
/// frame table lock.
pub(crate) struct FramePool {
    frames: Vec<Mutex<Box<FrameData>>>,
}

impl FramePool {
    /// Allocates `count` zeroed frames.
    pub fn new(count: usize) -> Self {
        Self {
            frames: (0..count)
                .map(|_| Mutex::new(Box::new([0; PAGE_SIZE])))
                .collect(),
        }
    }

    /// Number of frames in the pool.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Locks and returns the contents of `frame`.
    ///
    /// # Panics
    /// Panics if `frame` is not part of the pool.
    pub fn data(&self, frame: FrameNumber) -> MutexGuard<'_, Box<FrameData>> {
        self.frames[frame.as_usize()].lock()
    }
}
