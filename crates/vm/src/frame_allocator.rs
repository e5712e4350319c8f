//! Global user frame allocator with second-chance eviction.
//!
//! Every frame handed to a user page is recorded in a frame table. When no frame is free
//! the allocator runs a clock over the table: a page with its hardware accessed bit or
//! its software access hint set has both cleared and is skipped once, and the first
//! page found with neither set is evicted. The scan is bounded, so a table where every
//! page is pinned or constantly re-referenced fails the allocation instead of spinning.
//!
//! # Locking
//!
//! The frame table lock is held for the whole eviction, and eviction then takes the
//! registry lock, the victim's page table lock, the victim frame's data lock and the swap
//! lock, in that order. Callers of [`FrameAllocator::allocate`] must therefore not hold a
//! page table lock. A page that is being filled is protected by its pinned flag instead.

use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::address_space::SpaceRegistry;
use crate::block::BlockDevice;
use crate::frame::FramePool;
use crate::mmu::Mmu;
use crate::page::EvictionPlan;
use crate::{
    Exhaustion, FrameNumber, FrameTableEntry, PageNumber, PageState, SwapManager, VmError,
    VmStats, process::ProcessId,
};

/// Why eviction could not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictError {
    /// No frame is resident, so there is nothing to evict.
    Empty,
    /// The bounded scan visited `scanned` resident entries without finding a victim.
    NoVictim { scanned: usize },
    /// The victim's contents could not be written out. The victim stays resident.
    WriteOut(VmError),
}

impl fmt::Display for EvictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no resident frames"),
            Self::NoVictim { scanned } => write!(f, "no victim among {scanned} entries"),
            Self::WriteOut(err) => write!(f, "write-out failed: {err}"),
        }
    }
}

impl core::error::Error for EvictError {}

impl From<EvictError> for VmError {
    fn from(value: EvictError) -> Self {
        match value {
            EvictError::Empty => VmError::ResourceExhausted(Exhaustion::NoFrames),
            EvictError::NoVictim { scanned } => {
                VmError::ResourceExhausted(Exhaustion::AllPinned { scanned })
            }
            EvictError::WriteOut(err) => err,
        }
    }
}

/// Everything eviction needs besides the frame table itself.
pub(crate) struct Reclaimer<'a, M, D: BlockDevice> {
    pub mmu: &'a M,
    pub frames: &'a FramePool,
    pub swap: &'a SwapManager<D>,
    pub spaces: &'a SpaceRegistry,
    pub stats: &'a VmStats,
}

struct FrameTable {
    /// Indexed by frame number. `None` means the frame is free.
    entries: Vec<Option<FrameTableEntry>>,
    free: Vec<FrameNumber>,
    resident: usize,
    /// Clock hand: the next index to examine. Persists across evictions.
    hand: usize,
}

impl FrameTable {
    fn insert(&mut self, entry: FrameTableEntry) {
        let slot = &mut self.entries[entry.frame.as_usize()];
        debug_assert!(slot.is_none(), "frame {} handed out twice", entry.frame);
        *slot = Some(entry);
        self.resident += 1;
    }

    fn remove(&mut self, frame: FrameNumber) -> Option<FrameTableEntry> {
        let entry = self.entries.get_mut(frame.as_usize())?.take()?;
        self.resident -= 1;
        Some(entry)
    }
}

/// Hands out user frames and reclaims them when the pool runs dry.
pub struct FrameAllocator {
    table: Mutex<FrameTable>,
}

impl FrameAllocator {
    /// Creates an allocator managing frames `0..capacity`, all free.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(FrameTable {
                entries: (0..capacity).map(|_| None).collect(),
                // Popped from the back, so frame 0 goes first.
                free: (0..capacity).rev().map(FrameNumber::new).collect(),
                resident: 0,
                hand: 0,
            }),
        }
    }

    /// Total number of frames managed.
    pub fn capacity(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Number of frames currently holding a page.
    pub fn resident_count(&self) -> usize {
        self.table.lock().resident
    }

    /// Number of frames on the free list.
    pub fn free_count(&self) -> usize {
        self.table.lock().free.len()
    }

    /// Returns the entry for `frame`, if it is resident.
    pub fn entry(&self, frame: FrameNumber) -> Option<FrameTableEntry> {
        self.table.lock().entries.get(frame.as_usize()).copied().flatten()
    }

    /// Returns a snapshot of every resident entry, in frame order.
    pub fn entries(&self) -> Vec<FrameTableEntry> {
        self.table.lock().entries.iter().flatten().copied().collect()
    }

    /// Allocates a frame for `page` of `owner`, evicting another page if necessary.
    ///
    /// The caller must have pinned the descriptor for `page` and must not hold any page
    /// table lock. The frame is recorded as belonging to `(owner, page)` before it is
    /// returned, but its contents are whatever the previous occupant left behind.
    pub(crate) fn allocate<M: Mmu, D: BlockDevice>(
        &self,
        owner: ProcessId,
        page: PageNumber,
        reclaimer: &Reclaimer<'_, M, D>,
    ) -> Result<FrameNumber, VmError> {
        let mut table = self.table.lock();
        let frame = match table.free.pop() {
            Some(frame) => frame,
            None => evict(&mut table, reclaimer)?,
        };
        table.insert(FrameTableEntry { frame, owner, page });
        Ok(frame)
    }

    /// Evicts one page and puts its frame on the free list.
    pub(crate) fn evict_one<M: Mmu, D: BlockDevice>(
        &self,
        reclaimer: &Reclaimer<'_, M, D>,
    ) -> Result<FrameNumber, EvictError> {
        let mut table = self.table.lock();
        let frame = evict(&mut table, reclaimer)?;
        table.free.push(frame);
        Ok(frame)
    }

    /// Removes `frame` from the table and returns it to the free list.
    ///
    /// Returns false if the frame was not resident.
    pub fn release(&self, frame: FrameNumber) -> bool {
        let mut table = self.table.lock();
        if table.remove(frame).is_none() {
            return false;
        }
        table.free.push(frame);
        true
    }
}

/// Runs the clock until a victim is evicted, visiting at most `2 * resident + 1` entries.
///
/// Two full sweeps give every page one chance to have its accessed bits cleared and a
/// second to be taken.
fn evict<M: Mmu, D: BlockDevice>(
    table: &mut FrameTable,
    reclaimer: &Reclaimer<'_, M, D>,
) -> Result<FrameNumber, EvictError> {
    if table.resident == 0 {
        return Err(EvictError::Empty);
    }

    let capacity = table.entries.len();
    let budget = 2 * table.resident + 1;
    let mut scanned = 0;
    while scanned < budget {
        let index = table.hand;
        table.hand = (table.hand + 1) % capacity;
        let Some(entry) = table.entries[index] else {
            continue;
        };
        scanned += 1;

        if try_evict(entry, reclaimer).map_err(EvictError::WriteOut)? {
            table.remove(entry.frame);
            VmStats::bump(&reclaimer.stats.evictions);
            return Ok(entry.frame);
        }
    }

    log::warn!("Eviction found no victim after scanning {} entries", scanned);
    Err(EvictError::NoVictim { scanned })
}

/// Gives `entry` its second chance, or writes it out and detaches it from its page.
///
/// Returns Ok(true) if the page was evicted. On a write-out failure the page is mapped
/// again and keeps its frame.
fn try_evict<M: Mmu, D: BlockDevice>(
    entry: FrameTableEntry,
    reclaimer: &Reclaimer<'_, M, D>,
) -> Result<bool, VmError> {
    let FrameTableEntry { frame, owner, page } = entry;
    let mmu = reclaimer.mmu;

    let accessed = mmu.is_accessed(owner, page);
    if accessed {
        mmu.clear_accessed(owner, page);
    }

    // The owner is being torn down; teardown releases the frame itself.
    let Some(space) = reclaimer.spaces.get(owner) else {
        return Ok(false);
    };
    let mut pages = space.pages();
    let Some(descriptor) = pages.get_mut(page) else {
        return Ok(false);
    };
    if descriptor.is_pinned() || descriptor.frame() != Some(frame) {
        return Ok(false);
    }
    if accessed || descriptor.is_accessed() {
        descriptor.set_accessed(false);
        return Ok(false);
    }
    let Some(plan) = descriptor.eviction_plan() else {
        return Ok(false);
    };

    let dirty = mmu.is_dirty(owner, page);
    mmu.unmap(owner, page);

    let data = reclaimer.frames.data(frame);
    let written = match plan {
        EvictionPlan::Swap => reclaimer
            .swap
            .swap_out(&data)
            .map(|slot| {
                VmStats::bump(&reclaimer.stats.swap_outs);
                PageState::InSwap(slot)
            })
            .map_err(VmError::from),
        EvictionPlan::WriteBack(source) if dirty => source
            .store(&data)
            .map(|()| {
                VmStats::bump(&reclaimer.stats.write_backs);
                PageState::MmapBacked(source)
            })
            .map_err(VmError::from),
        EvictionPlan::WriteBack(source) => {
            VmStats::bump(&reclaimer.stats.discards);
            Ok(PageState::MmapBacked(source))
        }
        EvictionPlan::Discard(state) => {
            VmStats::bump(&reclaimer.stats.discards);
            Ok(state)
        }
    };
    drop(data);

    match written {
        Ok(state) => {
            log::trace!(
                "Evicted page {} of process {} from frame {} to {:?}",
                page,
                owner,
                frame,
                state.kind()
            );
            descriptor.set_state(state);
            Ok(true)
        }
        Err(err) => {
            mmu.map(owner, page, frame, descriptor.is_writable());
            if dirty {
                mmu.set_dirty(owner, page, true);
            }
            log::warn!(
                "Could not write out page {} of process {}: {}",
                page,
                owner,
                err
            );
            Err(err)
        }
    }
}
