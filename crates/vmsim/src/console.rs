//! Defines the console logger that writes records to standard error.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, SetLoggerError};
use spin::{Mutex, Once};

pub struct Console {
    stderr: Mutex<std::io::Stderr>,
    warnings: AtomicUsize,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init(level: LevelFilter) -> Result<&'static Self, SetLoggerError> {
        let console = Self::global();
        console.install(level)?;
        Ok(console)
    }

    pub fn global() -> &'static Self {
        DEFAULT.call_once(|| Console {
            stderr: Mutex::new(std::io::stderr()),
            warnings: AtomicUsize::new(0),
        })
    }

    pub fn install(&'static self, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level);
        Ok(())
    }

    /// Number of records logged at warning level or above.
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() <= Level::Warn {
            self.warnings.fetch_add(1, Ordering::Relaxed);
        }
        // Nowhere left to report a failed write to stderr.
        let _ = write_log_entry_to(&mut *self.stderr.lock(), record);
    }

    fn flush(&self) {
        let _ = self.stderr.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> std::io::Result<()> {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
