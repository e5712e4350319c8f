//! Errors reported by the virtual memory subsystem.
//!
//! Every failure is terminal for the operation that triggered it: nothing in this crate
//! retries. A failed fault resolution is expected to terminate the faulting process.

use core::fmt;

use crate::{MapId, VirtualAddress, process::ProcessId};

/// Which shared resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// The frame pool is empty and there is no resident frame to evict.
    NoFrames,
    /// The bounded eviction scan visited `scanned` entries without finding a victim.
    AllPinned { scanned: usize },
    /// Every swap slot is in use.
    SwapFull,
}

/// Which backing store transferred fewer bytes than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingStoreFailure {
    /// A file read came up short.
    FileRead { expected: usize, actual: usize },
    /// A file write-back came up short.
    FileWrite { expected: usize, actual: usize },
    /// The swap device failed a sector transfer.
    SwapIo,
}

/// Errors returned by the virtual memory subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No frame or swap slot could be obtained.
    ResourceExhausted(Exhaustion),
    /// The address has no descriptor, is outside the stack region, or the access is not
    /// permitted by the page.
    InvalidAccess(VirtualAddress),
    /// A file or swap transfer failed part-way.
    BackingStoreFailure(BackingStoreFailure),
    /// A descriptor already exists for the page at this address.
    AlreadyMapped(VirtualAddress),
    /// The address is null or not page-aligned.
    Misaligned(VirtualAddress),
    /// The file to be mapped is empty.
    EmptyMapping,
    /// No mapping with this identifier exists in the address space.
    UnknownMapping(MapId),
    /// The process has no registered address space.
    UnknownProcess(ProcessId),
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrames => write!(f, "no user frames available"),
            Self::AllPinned { scanned } => {
                write!(f, "no eviction victim after scanning {scanned} entries")
            }
            Self::SwapFull => write!(f, "swap device is full"),
        }
    }
}

impl fmt::Display for BackingStoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileRead { expected, actual } => {
                write!(f, "file read returned {actual} of {expected} bytes")
            }
            Self::FileWrite { expected, actual } => {
                write!(f, "file write stored {actual} of {expected} bytes")
            }
            Self::SwapIo => write!(f, "swap device I/O error"),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
            Self::InvalidAccess(addr) => write!(f, "invalid access at {addr}"),
            Self::BackingStoreFailure(what) => write!(f, "backing store failure: {what}"),
            Self::AlreadyMapped(addr) => write!(f, "page at {addr} is already mapped"),
            Self::Misaligned(addr) => write!(f, "address {addr} is null or not page-aligned"),
            Self::EmptyMapping => write!(f, "cannot map an empty file"),
            Self::UnknownMapping(id) => write!(f, "no mapping with id {id}"),
            Self::UnknownProcess(pid) => write!(f, "process {pid} has no address space"),
        }
    }
}

impl core::error::Error for VmError {}

impl From<Exhaustion> for VmError {
    fn from(value: Exhaustion) -> Self {
        Self::ResourceExhausted(value)
    }
}

impl From<BackingStoreFailure> for VmError {
    fn from(value: BackingStoreFailure) -> Self {
        Self::BackingStoreFailure(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = VmError::from(Exhaustion::AllPinned { scanned: 9 });
        assert_eq!(
            err.to_string(),
            "resource exhausted: no eviction victim after scanning 9 entries"
        );

        let err = VmError::from(BackingStoreFailure::FileRead {
            expected: 100,
            actual: 40,
        });
        assert_eq!(
            err.to_string(),
            "backing store failure: file read returned 40 of 100 bytes"
        );

        assert_eq!(
            VmError::InvalidAccess(VirtualAddress::new(0x10)).to_string(),
            "invalid access at 0x10"
        );
    }
}
