//! Page fault resolution.
//!
//! Resolving a fault materialises a page: the descriptor is pinned, a frame is allocated
//! (possibly evicting another page), filled from wherever the descriptor says the data
//! lives, mapped, and finally recorded as resident. The page table lock is only held
//! while the descriptor is inspected and updated, never across allocation or I/O.

use crate::block::BlockDevice;
use crate::mmu::Mmu;
use crate::process::Scheduler;
use crate::{
    AddressSpace, Backing, FileSource, FrameNumber, PageDescriptor, PageNumber, PageState,
    SwapSlot, VirtualAddress, VirtualMemory, VmError, VmStats, process::ProcessId,
};

/// A page fault as reported by the trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// The address whose translation was missing or forbade the access.
    pub address: VirtualAddress,
    /// The user stack pointer at the time of the fault.
    pub stack_pointer: VirtualAddress,
    /// True if the faulting access was a write.
    pub write: bool,
}

/// Where the contents of a page being resolved come from.
enum Fill {
    Swap(SwapSlot),
    File(FileSource),
    Mmap(FileSource),
    Zero,
}

impl Fill {
    fn from_state(state: &PageState) -> Option<Self> {
        Some(match state {
            PageState::InFrame { .. } => return None,
            PageState::InSwap(slot) => Self::Swap(*slot),
            PageState::FileBacked(source) => Self::File(source.clone()),
            PageState::MmapBacked(source) => Self::Mmap(source.clone()),
            PageState::Uninitialized => Self::Zero,
        })
    }

    fn origin(&self) -> Backing {
        match self {
            Self::Swap(_) | Self::Zero => Backing::Anonymous,
            Self::File(source) => Backing::File(source.clone()),
            Self::Mmap(source) => Backing::Mmap(source.clone()),
        }
    }
}

impl<M: Mmu, D: BlockDevice> VirtualMemory<M, D> {
    /// Handles a page fault taken by the current process.
    ///
    /// Faults on kernel addresses, on addresses with no descriptor outside the stack, and
    /// writes to read-only pages are rejected with [`VmError::InvalidAccess`]. Any error
    /// means the faulting process cannot continue.
    pub fn handle_page_fault(
        &self,
        scheduler: &impl Scheduler,
        fault: PageFault,
    ) -> Result<(), VmError> {
        let pid = scheduler.current_process();
        let space = self.address_space(pid).ok_or(VmError::UnknownProcess(pid))?;
        let addr = fault.address;

        let result = if addr.is_null() || addr >= self.config().stack_top {
            Err(VmError::InvalidAccess(addr))
        } else {
            let writable = space.pages().lookup(addr).map(PageDescriptor::is_writable);
            match writable {
                Some(false) if fault.write => Err(VmError::InvalidAccess(addr)),
                Some(_) => self.resolve_fault(&space, addr),
                None if self.is_stack_access(addr, fault.stack_pointer) => {
                    self.grow_stack(&space, addr)
                }
                None => Err(VmError::InvalidAccess(addr)),
            }
        };

        if let Err(err) = result {
            log::warn!("Process {}: unresolved fault at {}: {}", pid, addr, err);
        }
        result
    }

    /// Returns true if a fault at `addr` may extend the stack.
    ///
    /// The address must lie in the stack region and no further below the stack pointer
    /// than the widest push.
    fn is_stack_access(&self, addr: VirtualAddress, stack_pointer: VirtualAddress) -> bool {
        let config = self.config();
        config.in_stack_region(addr) && addr >= stack_pointer.saturating_sub(config.stack_slack)
    }

    /// Makes the page containing `addr` resident.
    ///
    /// A page that is already resident, or that another thread is resolving, is left
    /// alone. On failure the frame is released again and the descriptor keeps its state,
    /// so no frame or swap slot leaks.
    pub fn resolve_fault(&self, space: &AddressSpace, addr: VirtualAddress) -> Result<(), VmError> {
        VmStats::bump(&self.stats().faults);
        let pid = space.pid();
        let page = addr.page_number();

        let (fill, writable) = {
            let mut pages = space.pages();
            let descriptor = pages.get_mut(page).ok_or(VmError::InvalidAccess(addr))?;
            if descriptor.is_pinned() {
                return Ok(());
            }
            let Some(fill) = Fill::from_state(descriptor.state()) else {
                return Ok(());
            };
            descriptor.set_pinned(true);
            (fill, descriptor.is_writable())
        };

        let frame = match self.materialize(pid, page, &fill, writable) {
            Ok(frame) => frame,
            Err(err) => {
                let mut pages = space.pages();
                if let Some(descriptor) = pages.get_mut(page) {
                    descriptor.set_pinned(false);
                }
                return Err(err);
            }
        };

        let mut pages = space.pages();
        let Some(descriptor) = pages.get_mut(page) else {
            drop(pages);
            self.mmu().unmap(pid, page);
            self.frame_allocator().release(frame);
            return Err(VmError::InvalidAccess(addr));
        };
        descriptor.set_state(PageState::InFrame {
            frame,
            origin: fill.origin(),
        });
        descriptor.set_accessed(true);
        descriptor.set_pinned(false);

        log::trace!(
            "Process {}: page {} resident in frame {}",
            pid,
            page,
            frame
        );
        Ok(())
    }

    /// Allocates, fills and maps a frame for a pinned page.
    ///
    /// A swap slot is only released once the mapping is installed, so a failure at any
    /// step leaves the swapped copy intact.
    fn materialize(
        &self,
        pid: ProcessId,
        page: PageNumber,
        fill: &Fill,
        writable: bool,
    ) -> Result<FrameNumber, VmError> {
        let frame = self
            .frame_allocator()
            .allocate(pid, page, &self.reclaimer())?;

        let filled = {
            let mut data = self.frames().data(frame);
            match fill {
                Fill::Swap(slot) => self.swap().read_slot(*slot, &mut data).map_err(VmError::from),
                Fill::File(source) | Fill::Mmap(source) => {
                    source.load(&mut data).map_err(VmError::from)
                }
                Fill::Zero => {
                    data.fill(0);
                    Ok(())
                }
            }
        };
        let mapped = filled.and_then(|()| {
            match fill {
                Fill::Swap(_) => VmStats::bump(&self.stats().swap_ins),
                Fill::File(_) | Fill::Mmap(_) => VmStats::bump(&self.stats().file_reads),
                Fill::Zero => {}
            }
            if self.mmu().map(pid, page, frame, writable) {
                Ok(())
            } else {
                Err(VmError::AlreadyMapped(page.start()))
            }
        });

        if let Err(err) = mapped {
            self.frame_allocator().release(frame);
            return Err(err);
        }
        if let Fill::Swap(slot) = fill {
            self.swap().swap_free(*slot);
        }
        Ok(frame)
    }

    /// Extends the stack with a zero page at `addr` and makes it resident.
    ///
    /// Fails with [`VmError::InvalidAccess`] outside the stack region and with
    /// [`VmError::AlreadyMapped`] if the page already has a descriptor. If the page
    /// cannot be made resident its descriptor is removed again.
    pub fn grow_stack(&self, space: &AddressSpace, addr: VirtualAddress) -> Result<(), VmError> {
        if !self.config().in_stack_region(addr) {
            return Err(VmError::InvalidAccess(addr));
        }
        let page = addr.page_number();
        if space.pages().register(PageDescriptor::uninitialized(page)).is_none() {
            return Err(VmError::AlreadyMapped(page.start()));
        }

        if let Err(err) = self.resolve_fault(space, addr) {
            space.pages().remove(page);
            return Err(err);
        }
        VmStats::bump(&self.stats().stack_growths);
        log::trace!("Process {}: stack grown to {}", space.pid(), page.start());
        Ok(())
    }
}
