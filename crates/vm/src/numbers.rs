//! Page and frame number types.
//!
//! A [`PageNumber`] names a page of some process's virtual address space; a [`FrameNumber`]
//! names one of the physical frames handed to user processes. Frame numbers are dense
//! indices into the frame pool, which is also how the frame table is indexed.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PAGE_SIZE, VirtualAddress};

/// Generates the shared shape of page and frame numbers.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A user frame number.\n\n\
     Identifies one physical frame of the user pool. Frame numbers are zero-indexed and\n\
     double as the key of the frame table."
);

impl_page_number_common!(
    PageNumber,
    "A virtual page number.\n\n\
     Identifies a page of a virtual address space. Page numbers correspond to\n\
     PAGE_SIZE-aligned virtual addresses."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }

    /// Returns the virtual address at the end of this page (start of next page).
    #[inline]
    pub const fn end(self) -> VirtualAddress {
        VirtualAddress::new((self.0 + 1) * PAGE_SIZE)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        addr.page_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds() {
        let page = PageNumber::new(3);
        assert_eq!(page.start(), VirtualAddress::new(3 * PAGE_SIZE));
        assert_eq!(page.end(), VirtualAddress::new(4 * PAGE_SIZE));
    }

    #[test]
    fn page_from_address() {
        let addr = VirtualAddress::new(5 * PAGE_SIZE + 17);
        assert_eq!(PageNumber::from(addr), PageNumber::new(5));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(FrameNumber::new(2) + 3, FrameNumber::new(5));
        assert_eq!(PageNumber::new(9) - PageNumber::new(4), 5);
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", FrameNumber::new(7)), "FrameNumber(7)");
        assert_eq!(format!("{}", PageNumber::new(7)), "7");
    }
}
