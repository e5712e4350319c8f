//! Filesystem interface for lazily loaded and memory-mapped pages.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

/// An open file, as provided by the filesystem.
///
/// Mirrors the classic seek/read/write descriptor interface: `read` and `write` operate
/// at the current position and advance it, returning how many bytes were transferred.
pub trait File: Send {
    /// Moves the file position to `position` bytes from the start.
    fn seek(&mut self, position: u64);

    /// Reads into `buffer` from the current position.
    fn read(&mut self, buffer: &mut [u8]) -> usize;

    /// Writes `buffer` at the current position.
    fn write(&mut self, buffer: &[u8]) -> usize;

    /// Length of the file in bytes.
    fn length(&self) -> u64;
}

/// A shared handle to an open file.
///
/// Many page descriptors refer to the same file, each with its own offset, so the handle
/// serialises the seek-then-transfer pairs.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<Mutex<Box<dyn File>>>,
}

impl FileHandle {
    /// Wraps an open file.
    pub fn new(file: impl File + 'static) -> Self {
        let file: Box<dyn File> = Box::new(file);
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }

    /// Reads up to `buffer.len()` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> usize {
        let mut file = self.inner.lock();
        file.seek(offset);
        file.read(buffer)
    }

    /// Writes `buffer` starting at `offset`.
    pub fn write_at(&self, offset: u64, buffer: &[u8]) -> usize {
        let mut file = self.inner.lock();
        file.seek(offset);
        file.write(buffer)
    }

    /// Length of the file in bytes.
    pub fn length(&self) -> u64 {
        self.inner.lock().length()
    }

    /// Returns true if both handles refer to the same open file.
    pub fn same_file(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHandle({:p})", Arc::as_ptr(&self.inner))
    }
}

#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::MemoryFile;

#[cfg(any(test, feature = "software-emulation"))]
mod emulated {
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    use spin::Mutex;

    use super::File;

    /// An in-memory file whose contents stay observable after it is handed out.
    ///
    /// Clones share contents but keep their own position. Writes never extend the file.
    #[derive(Clone)]
    pub struct MemoryFile {
        data: Arc<Mutex<Vec<u8>>>,
        position: usize,
        short_reads: bool,
    }

    impl MemoryFile {
        /// Creates a file holding `contents`.
        pub fn new(contents: impl Into<Vec<u8>>) -> Self {
            Self {
                data: Arc::new(Mutex::new(contents.into())),
                position: 0,
                short_reads: false,
            }
        }

        /// Makes every read return nothing, as a failing disk would.
        pub fn with_short_reads(mut self) -> Self {
            self.short_reads = true;
            self
        }

        /// Returns a copy of the current contents.
        pub fn contents(&self) -> Vec<u8> {
            self.data.lock().clone()
        }
    }

    impl File for MemoryFile {
        fn seek(&mut self, position: u64) {
            self.position = usize::try_from(position).unwrap_or(usize::MAX);
        }

        fn read(&mut self, buffer: &mut [u8]) -> usize {
            if self.short_reads {
                return 0;
            }
            let data = self.data.lock();
            let start = self.position.min(data.len());
            let count = buffer.len().min(data.len() - start);
            buffer[..count].copy_from_slice(&data[start..start + count]);
            self.position = start + count;
            count
        }

        fn write(&mut self, buffer: &[u8]) -> usize {
            let mut data = self.data.lock();
            let start = self.position.min(data.len());
            let count = buffer.len().min(data.len() - start);
            data[start..start + count].copy_from_slice(&buffer[..count]);
            self.position = start + count;
            count
        }

        fn length(&self) -> u64 {
            self.data.lock().len() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_at_offsets() {
        let handle = FileHandle::new(MemoryFile::new(*b"hello world"));
        let mut buffer = [0; 5];
        assert_eq!(handle.read_at(6, &mut buffer), 5);
        assert_eq!(&buffer, b"world");
        assert_eq!(handle.read_at(9, &mut buffer), 2);
        assert_eq!(handle.read_at(100, &mut buffer), 0);
    }

    #[test]
    fn writes_do_not_extend() {
        let file = MemoryFile::new(*b"abcdef");
        let handle = FileHandle::new(file.clone());
        assert_eq!(handle.write_at(4, b"XYZ"), 2);
        assert_eq!(file.contents(), b"abcdXY");
        assert_eq!(handle.length(), 6);
    }

    #[test]
    fn handle_identity() {
        let a = FileHandle::new(MemoryFile::new(*b"a"));
        let b = FileHandle::new(MemoryFile::new(*b"a"));
        assert!(a.same_file(&a.clone()));
        assert!(!a.same_file(&b));
    }
}
