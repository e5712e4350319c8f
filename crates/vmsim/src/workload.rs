//! The paging workload each simulated process runs.
//!
//! A process loads a small executable (read-only code followed by zero-filled data),
//! maps a data file, grows its stack through page faults, then repeatedly rewrites and
//! verifies all of it while the other processes compete for the same frames.

use std::cell::Cell;
use std::fmt;

use vm::block::MemoryDisk;
use vm::file::{FileHandle, MemoryFile};
use vm::mmu::SoftwareMmu;
use vm::process::{ProcessId, Scheduler};
use vm::{AddressSpace, PAGE_SIZE, PageFault, VirtualAddress, VirtualMemory, VmError};

pub type Vm = VirtualMemory<SoftwareMmu, MemoryDisk>;

const CODE_BASE: VirtualAddress = VirtualAddress::new(0x0804_8000);
const MMAP_BASE: VirtualAddress = VirtualAddress::new(0x4000_0000);

/// Bytes written at the start of each mapped page per round.
const STAMP_LEN: usize = 16;

thread_local! {
    static CURRENT: Cell<ProcessId> = const { Cell::new(ProcessId::new(0)) };
}

/// Reports whichever process the calling worker thread last entered.
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn enter(pid: ProcessId) {
        CURRENT.set(pid);
    }
}

impl Scheduler for ThreadScheduler {
    fn current_process(&self) -> ProcessId {
        CURRENT.get()
    }
}

/// Shape of the per-process workload.
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    /// Zero-filled data pages following the code.
    pub data_pages: usize,
    /// Pages the stack grows to.
    pub stack_pages: usize,
    /// Pages of the mapped data file. The last one is only half backed by the file.
    pub mapped_pages: usize,
    /// Rewrite-and-verify passes over every page.
    pub rounds: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Report {
    pub bytes_verified: usize,
}

#[derive(Debug)]
pub enum WorkloadError {
    /// The subsystem rejected an operation.
    Vm { pid: ProcessId, error: VmError },
    /// Data read back differs from what was written.
    Corrupted { pid: ProcessId, addr: VirtualAddress },
    /// An operation that must fail succeeded.
    Unexpected { pid: ProcessId, what: &'static str },
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vm { pid, error } => write!(f, "process {pid}: {error}"),
            Self::Corrupted { pid, addr } => write!(f, "process {pid}: corrupted data at {addr}"),
            Self::Unexpected { pid, what } => write!(f, "process {pid}: {what}"),
        }
    }
}

impl std::error::Error for WorkloadError {}

fn pattern(pid: ProcessId, round: usize, page: usize, len: usize) -> Vec<u8> {
    let seed = (pid.as_u32() as usize)
        .wrapping_mul(7)
        .wrapping_add(round * 13)
        .wrapping_add(page * 31);
    (0..len).map(|i| seed.wrapping_add(i) as u8).collect()
}

/// Runs the workload as process `pid` and tears its address space down afterwards.
pub fn run(vm: &Vm, pid: ProcessId, plan: &Plan) -> Result<Report, WorkloadError> {
    ThreadScheduler::enter(pid);
    let space = vm.create_address_space(pid);
    let result = exercise(vm, &space, plan);
    vm.destroy_table(&space);

    match &result {
        Ok(report) => log::info!("Process {}: verified {} bytes", pid, report.bytes_verified),
        Err(err) => log::error!("{}", err),
    }
    result
}

fn exercise(vm: &Vm, space: &AddressSpace, plan: &Plan) -> Result<Report, WorkloadError> {
    let pid = space.pid();
    let vm_error = move |error| WorkloadError::Vm { pid, error };
    let mut report = Report::default();

    // Executable: code pages straight from the file, then zero-filled data.
    let code = pattern(pid, 0, 0, PAGE_SIZE + PAGE_SIZE / 4);
    let code_span = code.len().next_multiple_of(PAGE_SIZE);
    let executable = FileHandle::new(MemoryFile::new(code.clone()));
    vm.register_segment(
        space,
        executable.clone(),
        0,
        CODE_BASE,
        code.len(),
        code_span - code.len(),
        false,
    )
    .map_err(vm_error)?;
    let data_base = CODE_BASE + code_span;
    vm.register_segment(
        space,
        executable,
        0,
        data_base,
        0,
        plan.data_pages * PAGE_SIZE,
        true,
    )
    .map_err(vm_error)?;

    let mapped_len = (plan.mapped_pages * PAGE_SIZE).saturating_sub(PAGE_SIZE / 2);
    let data_file = MemoryFile::new(vec![0u8; mapped_len]);
    let map_id = if mapped_len > 0 {
        let handle = FileHandle::new(data_file.clone());
        Some(vm.register_file_backed_region(space, handle, MMAP_BASE, true).map_err(vm_error)?)
    } else {
        None
    };

    // Grow the stack one push at a time, the way a deepening call chain would.
    let stack_top = vm.config().stack_top;
    for i in 0..plan.stack_pages {
        let stack_pointer = stack_top - i * PAGE_SIZE - 8;
        let fault = PageFault {
            address: stack_pointer - 4,
            stack_pointer,
            write: true,
        };
        vm.handle_page_fault(&ThreadScheduler, fault).map_err(vm_error)?;
    }

    let writable: Vec<VirtualAddress> = (0..plan.data_pages)
        .map(|i| data_base + i * PAGE_SIZE)
        .chain((1..=plan.stack_pages).map(|i| stack_top - i * PAGE_SIZE))
        .collect();
    let mapped: Vec<VirtualAddress> = (0..mapped_len.div_ceil(PAGE_SIZE))
        .map(|i| MMAP_BASE + i * PAGE_SIZE)
        .collect();

    match vm.write_user(space, CODE_BASE, &[0u8]) {
        Err(VmError::InvalidAccess(_)) => {}
        Err(error) => return Err(vm_error(error)),
        Ok(()) => {
            return Err(WorkloadError::Unexpected {
                pid,
                what: "write to read-only code succeeded",
            });
        }
    }

    let mut buffer = vec![0; PAGE_SIZE];
    for round in 0..plan.rounds {
        for (page, addr) in writable.iter().enumerate() {
            let data = pattern(pid, round, page, PAGE_SIZE);
            vm.write_user(space, *addr, &data).map_err(vm_error)?;
        }
        for (page, addr) in mapped.iter().enumerate() {
            let stamp = pattern(pid, round, page, STAMP_LEN);
            vm.write_user(space, *addr, &stamp).map_err(vm_error)?;
        }

        for (page, addr) in writable.iter().enumerate() {
            vm.read_user(space, *addr, &mut buffer).map_err(vm_error)?;
            if buffer != pattern(pid, round, page, PAGE_SIZE) {
                return Err(WorkloadError::Corrupted { pid, addr: *addr });
            }
            report.bytes_verified += PAGE_SIZE;
        }

        let mut text = vec![0; code.len()];
        vm.read_user(space, CODE_BASE, &mut text).map_err(vm_error)?;
        if text != code {
            return Err(WorkloadError::Corrupted {
                pid,
                addr: CODE_BASE,
            });
        }
        report.bytes_verified += text.len();
        log::debug!("Process {}: round {} verified", pid, round);
    }

    if let Some(id) = map_id {
        vm.unmap_region(space, id).map_err(vm_error)?;
        let contents = data_file.contents();
        let last_round = plan.rounds.checked_sub(1);
        for (page, addr) in mapped.iter().enumerate() {
            let offset = page * PAGE_SIZE;
            let expected = match last_round {
                Some(round) => pattern(pid, round, page, STAMP_LEN),
                None => vec![0; STAMP_LEN],
            };
            if contents[offset..offset + STAMP_LEN] != expected[..] {
                return Err(WorkloadError::Corrupted { pid, addr: *addr });
            }
            report.bytes_verified += STAMP_LEN;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm::{SECTORS_PER_SLOT, VmConfig};

    fn vm(frames: usize) -> Vm {
        VirtualMemory::new(
            VmConfig::new().with_user_frames(frames),
            SoftwareMmu::new(),
            MemoryDisk::new(256 * SECTORS_PER_SLOT),
        )
    }

    const PLAN: Plan = Plan {
        data_pages: 6,
        stack_pages: 3,
        mapped_pages: 2,
        rounds: 2,
    };

    #[test]
    fn workload_survives_memory_pressure() {
        let vm = vm(4);
        let report = run(&vm, ProcessId::new(1), &PLAN).unwrap();
        assert!(report.bytes_verified > 0);
        assert!(vm.stats().snapshot().evictions > 0);
        assert_eq!(vm.frame_allocator().resident_count(), 0);
        assert_eq!(vm.swap().used_slots(), 0);
        assert!(vm.address_space(ProcessId::new(1)).is_none());
        assert_eq!(vm.process_count(), 0);
    }

    #[test]
    fn scheduler_follows_the_entered_process() {
        ThreadScheduler::enter(ProcessId::new(5));
        assert_eq!(ThreadScheduler.current_process(), ProcessId::new(5));
    }
}
