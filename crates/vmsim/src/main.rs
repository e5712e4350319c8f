mod console;
mod workload;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use rayon::prelude::*;

use vm::block::MemoryDisk;
use vm::mmu::SoftwareMmu;
use vm::process::ProcessId;
use vm::{PAGE_SIZE, SECTORS_PER_SLOT, VirtualMemory, VmConfig};

use crate::console::Console;
use crate::workload::Plan;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Runs a demand-paging workload against emulated hardware")]
struct Args {
    /// Number of physical frames available to user processes
    #[arg(long, default_value_t = 64)]
    frames: usize,

    /// Number of page-sized slots on the emulated swap disk
    #[arg(long, default_value_t = 1024)]
    swap_slots: usize,

    /// Number of processes, each run on its own worker thread
    #[arg(long, default_value_t = 8)]
    processes: u32,

    /// Zero-filled data pages per process
    #[arg(long, default_value_t = 32)]
    pages: usize,

    /// Stack pages each process grows through page faults
    #[arg(long, default_value_t = 4)]
    stack_pages: usize,

    /// Pages of the file each process maps
    #[arg(long, default_value_t = 4)]
    mapped_pages: usize,

    /// Rewrite-and-verify passes over every page
    #[arg(long, default_value_t = 4)]
    rounds: usize,

    /// Most verbose log level to print
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let console = Console::init(args.log_level.into())?;

    let config = VmConfig::new().with_user_frames(args.frames);
    let vm = VirtualMemory::new(
        config,
        SoftwareMmu::new(),
        MemoryDisk::new(args.swap_slots * SECTORS_PER_SLOT),
    );
    let plan = Plan {
        data_pages: args.pages,
        stack_pages: args.stack_pages,
        mapped_pages: args.mapped_pages,
        rounds: args.rounds,
    };

    let results: Vec<_> = (1..=args.processes)
        .into_par_iter()
        .map(|pid| workload::run(&vm, ProcessId::new(pid), &plan))
        .collect();

    let mut verified = 0;
    let mut failed = 0;
    for result in &results {
        match result {
            Ok(report) => verified += report.bytes_verified,
            Err(err) => {
                eprintln!("{}", err);
                failed += 1;
            }
        }
    }

    println!(
        "{} processes, {} frames ({} KiB), {} swap slots",
        args.processes,
        args.frames,
        args.frames * PAGE_SIZE / 1024,
        vm.swap().capacity()
    );
    println!("{}", vm.stats().snapshot());
    println!(
        "verified {} bytes, {} warnings logged",
        verified,
        console.warnings()
    );

    if failed > 0 {
        return Err(format!("{} of {} processes failed", failed, args.processes).into());
    }

    let resident = vm.frame_allocator().resident_count();
    let swapped = vm.swap().used_slots();
    let spaces = vm.process_count();
    if resident != 0 || swapped != 0 || spaces != 0 {
        return Err(format!(
            "teardown leaked {} frames, {} swap slots and {} address spaces",
            resident, swapped, spaces
        )
        .into());
    }

    Ok(())
}
