#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Polaris Virtual Memory (VM)
//!
//! Demand-paged user address spaces for the Polaris kernel. The crate provides:
//!
//! - Per-process virtual page tables that record where every page's data lives.
//! - A global, lock-protected frame allocator with second-chance (clock) eviction.
//! - A swap manager that pages anonymous data out to a block device.
//! - Fault resolution: lazy loading from executables and mapped files, swap-in and
//!   stack growth.
//!
//! The scheduler, filesystem, block driver and MMU are collaborators reached through
//! the traits in [`mmu`], [`file`], [`block`] and [`process`]. With the
//! `software-emulation` feature (and in tests) host emulations of each are available.

extern crate alloc;

mod address;
mod address_space;
mod bitmap;
pub mod block;
mod config;
mod error;
mod fault;
mod frame;
mod frame_allocator;
pub mod file;
mod mmap;
pub mod mmu;
mod numbers;
mod page;
mod page_table;
pub mod process;
mod stats;
mod swap;
mod virtual_memory;

pub use address::VirtualAddress;
pub use address_space::AddressSpace;
pub use config::{PAGE_SIZE, VmConfig};
pub use error::{BackingStoreFailure, Exhaustion, VmError};
pub use fault::PageFault;
pub use frame::FrameTableEntry;
pub use frame_allocator::{EvictError, FrameAllocator};
pub use mmap::{MapId, MmapRegion};
pub use numbers::{FrameNumber, PageNumber};
pub use page::{Backing, FileSource, PageDescriptor, PageState, PageStateKind};
pub use page_table::PageTable;
pub use stats::{StatsSnapshot, VmStats};
pub use swap::{SECTORS_PER_SLOT, SwapError, SwapManager, SwapSlot};
pub use virtual_memory::VirtualMemory;
