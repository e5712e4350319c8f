//! Virtual address type for user address spaces.
//!
//! Faults, mappings and user copies are all expressed in terms of [`VirtualAddress`]; the
//! page it falls in is obtained with [`VirtualAddress::page_number`].

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PAGE_SIZE, PageNumber};

/// A virtual memory address within some process's address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    /// The null address. Never mappable.
    pub const NULL: Self = Self(0);

    /// Creates a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns true if this is the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the given alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 & (align - 1) == 0
    }

    /// Returns true if the address sits on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.is_aligned(PAGE_SIZE)
    }

    /// Aligns the address down to the given alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    /// Aligns the address up to the given alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn align_up(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Returns the byte offset of this address within its page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / PAGE_SIZE)
    }

    /// Adds `rhs` bytes, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, rhs: usize) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Subtracts `rhs` bytes, saturating at zero.
    #[inline]
    pub const fn saturating_sub(self, rhs: usize) -> Self {
        Self(self.0.saturating_sub(rhs))
    }
}

impl fmt::Pointer for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0 as *const u8)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for VirtualAddress {
    #[inline]
    fn from(addr: usize) -> Self {
        Self::new(addr)
    }
}

impl Add<usize> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<usize> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl Sub<VirtualAddress> for VirtualAddress {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: VirtualAddress) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_check() {
        let addr = VirtualAddress::new(PAGE_SIZE * 4);
        assert!(addr.is_page_aligned());
        assert!(addr.is_aligned(PAGE_SIZE / 4));
        assert!(!addr.is_aligned(PAGE_SIZE * 8));
        assert!(!VirtualAddress::new(0x1004).is_page_aligned());
    }

    #[test]
    fn align_down_and_up() {
        let addr = VirtualAddress::new(0x1234);
        assert_eq!(addr.align_down(PAGE_SIZE), VirtualAddress::new(0x1000));
        assert_eq!(addr.align_up(PAGE_SIZE), VirtualAddress::new(0x2000));

        let aligned = VirtualAddress::new(0x3000);
        assert_eq!(aligned.align_down(PAGE_SIZE), aligned);
        assert_eq!(aligned.align_up(PAGE_SIZE), aligned);
    }

    #[test]
    #[should_panic(expected = "alignment must be a power of two")]
    fn rejects_non_power_of_two_alignment() {
        VirtualAddress::new(0x1000).align_down(3);
    }

    #[test]
    fn page_offset_and_number() {
        let addr = VirtualAddress::new(0x0804_8123);
        assert_eq!(addr.page_offset(), 0x123);
        assert_eq!(addr.page_number(), PageNumber::new(0x0804_8));
        assert_eq!(VirtualAddress::new(PAGE_SIZE).page_offset(), 0);
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(VirtualAddress::new(usize::MAX).checked_add(1), None);
        assert_eq!(
            VirtualAddress::new(0x10).checked_add(0x10),
            Some(VirtualAddress::new(0x20))
        );
        assert_eq!(VirtualAddress::new(0x10).saturating_sub(0x20), VirtualAddress::NULL);
        assert_eq!(VirtualAddress::new(0x3000) - VirtualAddress::new(0x1000), 0x2000);
    }

    #[test]
    fn formatting() {
        let addr = VirtualAddress::new(0xbfff_f000);
        assert_eq!(format!("{}", addr), "0xbffff000");
        assert_eq!(format!("{:?}", addr), "VirtualAddress(0xbffff000)");
    }
}
