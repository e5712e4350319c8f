//! Swap slot management.
//!
//! The swap device is divided into fixed-size slots, each spanning exactly the sectors
//! needed to hold one page. Slots have no header: a slot's position on the device is its
//! only address. A bitmap tracks which slots hold live data.

use core::fmt;

use spin::Mutex;

use crate::bitmap::Bitmap;
use crate::block::{BlockDevice, SECTOR_SIZE, SectorIndex};
use crate::{BackingStoreFailure, Exhaustion, PAGE_SIZE, VmError};

/// Number of device sectors in one swap slot.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// Index of a page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Creates a slot index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw slot index.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// First device sector of this slot.
    const fn first_sector(self) -> SectorIndex {
        (self.0 * SECTORS_PER_SLOT) as SectorIndex
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported by the swap manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// Every slot is in use.
    Full,
    /// The device failed a sector transfer.
    Io,
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "swap device full"),
            Self::Io => write!(f, "swap device I/O failed"),
        }
    }
}

impl core::error::Error for SwapError {}

impl From<SwapError> for VmError {
    fn from(value: SwapError) -> Self {
        match value {
            SwapError::Full => VmError::ResourceExhausted(Exhaustion::SwapFull),
            SwapError::Io => VmError::BackingStoreFailure(BackingStoreFailure::SwapIo),
        }
    }
}

struct SwapState<D> {
    device: D,
    slots: Bitmap,
}

/// Moves whole pages to and from the swap device.
///
/// A single lock covers the bitmap and the device, so a slot is reserved and written (or
/// read and released) as one step.
pub struct SwapManager<D: BlockDevice> {
    state: Mutex<SwapState<D>>,
}

impl<D: BlockDevice> SwapManager<D> {
    /// Takes ownership of `device` and marks every slot free.
    ///
    /// Trailing sectors that do not fill a whole slot are unused.
    pub fn new(device: D) -> Self {
        let slot_count = usize::try_from(device.sector_count())
            .unwrap_or(usize::MAX)
            / SECTORS_PER_SLOT;
        log::info!(
            "Swap device attached: {} slots of {} sectors",
            slot_count,
            SECTORS_PER_SLOT
        );

        Self {
            state: Mutex::new(SwapState {
                device,
                slots: Bitmap::new(slot_count),
            }),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of slots currently holding a page.
    pub fn used_slots(&self) -> usize {
        self.state.lock().slots.count_set()
    }

    /// Returns true if `slot` currently holds a page.
    pub fn is_used(&self, slot: SwapSlot) -> bool {
        let state = self.state.lock();
        slot.0 < state.slots.len() && state.slots.test(slot.0)
    }

    /// Runs `f` against the underlying device.
    pub fn with_device<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.state.lock().device)
    }

    /// Reserves a free slot and writes `page` into it.
    ///
    /// If the write fails the slot is released again before the error is returned.
    pub fn swap_out(&self, page: &[u8; PAGE_SIZE]) -> Result<SwapSlot, SwapError> {
        let mut state = self.state.lock();
        let slot = SwapSlot(state.slots.scan_and_set().ok_or(SwapError::Full)?);

        for (i, chunk) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = slot.first_sector() + i as SectorIndex;
            let written = match <&[u8; SECTOR_SIZE]>::try_from(chunk) {
                Ok(buffer) => state.device.write_sector(sector, buffer).is_ok(),
                Err(_) => false,
            };
            if !written {
                state.slots.clear(slot.0);
                log::warn!("Swap write to slot {} failed at sector {}", slot, sector);
                return Err(SwapError::Io);
            }
        }

        log::trace!("Swapped out to slot {}", slot);
        Ok(slot)
    }

    /// Reads `slot` into `page` and releases the slot.
    ///
    /// On a read error the slot stays allocated; its owner still refers to it.
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), SwapError> {
        let mut state = self.state.lock();
        Self::read_into(&mut state, slot, page)?;
        state.slots.clear(slot.0);
        log::trace!("Swapped in from slot {}", slot);
        Ok(())
    }

    /// Reads `slot` into `page` and keeps the slot allocated.
    ///
    /// The caller releases it with [`SwapManager::swap_free`] once the page no longer
    /// needs the swapped copy.
    pub fn read_slot(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), SwapError> {
        Self::read_into(&mut self.state.lock(), slot, page)
    }

    fn read_into(
        state: &mut SwapState<D>,
        slot: SwapSlot,
        page: &mut [u8; PAGE_SIZE],
    ) -> Result<(), SwapError> {
        debug_assert!(state.slots.test(slot.0), "swap in from a free slot");

        for (i, chunk) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector: &mut [u8; SECTOR_SIZE] =
                chunk.try_into().map_err(|_| SwapError::Io)?;
            state
                .device
                .read_sector(slot.first_sector() + i as SectorIndex, sector)
                .map_err(|_| SwapError::Io)?;
        }
        Ok(())
    }

    /// Releases `slot` without reading it.
    pub fn swap_free(&self, slot: SwapSlot) {
        let was_used = self.state.lock().slots.clear(slot.0);
        debug_assert!(was_used, "swap slot freed twice");
        log::trace!("Freed swap slot {}", slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryDisk;

    fn manager(slots: usize) -> SwapManager<MemoryDisk> {
        SwapManager::new(MemoryDisk::new(slots * SECTORS_PER_SLOT))
    }

    fn patterned(seed: u8) -> [u8; PAGE_SIZE] {
        let mut page = [0; PAGE_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        page
    }

    #[test]
    fn capacity_follows_device_size() {
        let swap = SwapManager::new(MemoryDisk::new(3 * SECTORS_PER_SLOT + 5));
        assert_eq!(swap.capacity(), 3);
        assert_eq!(swap.used_slots(), 0);
    }

    #[test]
    fn swap_round_trip() {
        let swap = manager(4);
        let page = patterned(7);

        let slot = swap.swap_out(&page).unwrap();
        assert!(swap.is_used(slot));

        let mut restored = [0; PAGE_SIZE];
        swap.swap_in(slot, &mut restored).unwrap();
        assert_eq!(restored, page);
        assert!(!swap.is_used(slot));
    }

    #[test]
    fn slots_are_reused_after_release() {
        let swap = manager(2);
        let first = swap.swap_out(&patterned(1)).unwrap();
        let second = swap.swap_out(&patterned(2)).unwrap();
        assert_ne!(first, second);
        assert_eq!(swap.swap_out(&patterned(3)), Err(SwapError::Full));

        swap.swap_free(first);
        assert_eq!(swap.swap_out(&patterned(4)), Ok(first));

        let mut page = [0; PAGE_SIZE];
        swap.swap_in(second, &mut page).unwrap();
        assert_eq!(swap.swap_out(&patterned(5)), Ok(second));
    }

    #[test]
    fn read_slot_keeps_the_slot() {
        let swap = manager(2);
        let page = patterned(9);
        let slot = swap.swap_out(&page).unwrap();

        let mut restored = [0; PAGE_SIZE];
        swap.read_slot(slot, &mut restored).unwrap();
        assert_eq!(restored, page);
        assert!(swap.is_used(slot));

        swap.swap_free(slot);
        assert_eq!(swap.used_slots(), 0);
    }

    #[test]
    fn failed_read_keeps_the_slot() {
        let swap = SwapManager::new(MemoryDisk::new(2 * SECTORS_PER_SLOT).fail_after_reads(3));
        let slot = swap.swap_out(&patterned(1)).unwrap();

        let mut page = [0; PAGE_SIZE];
        assert_eq!(swap.swap_in(slot, &mut page), Err(SwapError::Io));
        assert!(swap.is_used(slot));
    }

    #[test]
    fn free_does_not_read() {
        let swap = manager(2);
        let slot = swap.swap_out(&patterned(1)).unwrap();
        swap.swap_free(slot);
        assert_eq!(swap.with_device(MemoryDisk::reads), 0);
        assert_eq!(swap.used_slots(), 0);
    }

    #[test]
    fn failed_write_releases_slot() {
        let swap = SwapManager::new(MemoryDisk::new(2 * SECTORS_PER_SLOT).fail_after_writes(3));
        assert_eq!(swap.swap_out(&patterned(1)), Err(SwapError::Io));
        assert_eq!(swap.used_slots(), 0);
    }

    #[test]
    fn errors_convert_to_vm_errors() {
        assert_eq!(
            VmError::from(SwapError::Full),
            VmError::ResourceExhausted(Exhaustion::SwapFull)
        );
        assert_eq!(
            VmError::from(SwapError::Io),
            VmError::BackingStoreFailure(BackingStoreFailure::SwapIo)
        );
    }
}
