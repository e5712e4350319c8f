//! Subsystem configuration.

use crate::VirtualAddress;

/// Size of a virtual page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames handed to user processes.
const DEFAULT_USER_FRAMES: usize = 256;

/// Default top of the user stack (the stack grows down from here).
const DEFAULT_STACK_TOP: usize = 0xC000_0000;

/// Default limit on how far the user stack may grow.
const DEFAULT_MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Default distance below the stack pointer a faulting push may reach.
///
/// The widest single push (`pusha`) writes 32 bytes below the stack pointer before it
/// is adjusted.
const DEFAULT_STACK_SLACK: usize = 32;

/// Tunables for a [`VirtualMemory`](crate::VirtualMemory) instance.
///
/// The swap capacity is not configured here; it follows from the size of the block
/// device handed to the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames available to user processes.
    pub user_frames: usize,
    /// Highest user stack address (exclusive).
    pub stack_top: VirtualAddress,
    /// Maximum size of the stack growth region below `stack_top`.
    pub max_stack_size: usize,
    /// How far below the stack pointer a fault still counts as stack access.
    pub stack_slack: usize,
}

impl VmConfig {
    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            user_frames: DEFAULT_USER_FRAMES,
            stack_top: VirtualAddress::new(DEFAULT_STACK_TOP),
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            stack_slack: DEFAULT_STACK_SLACK,
        }
    }

    /// Sets the number of user frames.
    pub const fn with_user_frames(mut self, user_frames: usize) -> Self {
        self.user_frames = user_frames;
        self
    }

    /// Sets the top of the user stack.
    ///
    /// # Panics
    ///
    /// Panics if `stack_top` is not page-aligned.
    pub const fn with_stack_top(mut self, stack_top: VirtualAddress) -> Self {
        assert!(stack_top.is_page_aligned(), "stack top must be page-aligned");
        self.stack_top = stack_top;
        self
    }

    /// Sets the maximum stack size.
    pub const fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.max_stack_size = max_stack_size;
        self
    }

    /// Sets how far below the stack pointer a faulting push may land.
    pub const fn with_stack_slack(mut self, stack_slack: usize) -> Self {
        self.stack_slack = stack_slack;
        self
    }

    /// Lowest address the stack may grow down to.
    pub const fn stack_limit(&self) -> VirtualAddress {
        self.stack_top.saturating_sub(self.max_stack_size)
    }

    /// Returns true if `addr` lies within the stack growth region.
    pub const fn in_stack_region(&self, addr: VirtualAddress) -> bool {
        addr.as_usize() >= self.stack_limit().as_usize()
            && addr.as_usize() < self.stack_top.as_usize()
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
