//! Page table entry for software emulation.

use crate::FrameNumber;

use super::flags::PageFlags;

/// A single emulated page table entry.
///
/// The entry format:
/// - Bits 0-11: Flags
/// - Bits 12-63: Frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Shift applied to the frame number.
    const FRAME_SHIFT: usize = 12;

    /// Creates a new page table entry.
    pub fn new(frame: FrameNumber, flags: PageFlags) -> Self {
        Self((frame.as_usize() << Self::FRAME_SHIFT) | flags.to_raw())
    }

    /// Returns the frame stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(self.0 >> Self::FRAME_SHIFT))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Sets the flags for this entry, preserving the frame.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & !PageFlags::MASK) | flags.to_raw();
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}
