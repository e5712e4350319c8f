//! Block device interface used as the swap backing store.

/// Size of one device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Identifies a sector on a block device.
pub type SectorIndex = u64;

/// Failure reported by a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoError;

/// A sector-addressed storage device.
pub trait BlockDevice: Send {
    /// Total number of sectors on the device.
    fn sector_count(&self) -> SectorIndex;

    /// Reads sector `sector` into `buffer`.
    fn read_sector(
        &mut self,
        sector: SectorIndex,
        buffer: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), IoError>;

    /// Writes `buffer` to sector `sector`.
    fn write_sector(
        &mut self,
        sector: SectorIndex,
        buffer: &[u8; SECTOR_SIZE],
    ) -> Result<(), IoError>;
}

#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::MemoryDisk;

#[cfg(any(test, feature = "software-emulation"))]
mod emulated {
    use alloc::vec::Vec;

    use super::{BlockDevice, IoError, SECTOR_SIZE, SectorIndex};

    /// A RAM-backed block device.
    pub struct MemoryDisk {
        sectors: Vec<[u8; SECTOR_SIZE]>,
        reads: usize,
        writes: usize,
        fail_after_writes: Option<usize>,
        fail_after_reads: Option<usize>,
    }

    impl MemoryDisk {
        /// Creates a zeroed disk with `sector_count` sectors.
        pub fn new(sector_count: usize) -> Self {
            Self {
                sectors: alloc::vec![[0; SECTOR_SIZE]; sector_count],
                reads: 0,
                writes: 0,
                fail_after_writes: None,
                fail_after_reads: None,
            }
        }

        /// Makes every write after the first `writes` fail.
        pub fn fail_after_writes(mut self, writes: usize) -> Self {
            self.fail_after_writes = Some(writes);
            self
        }

        /// Makes every read after the first `reads` fail.
        pub fn fail_after_reads(mut self, reads: usize) -> Self {
            self.fail_after_reads = Some(reads);
            self
        }

        /// Number of sectors read so far.
        pub fn reads(&self) -> usize {
            self.reads
        }

        /// Number of sectors written so far.
        pub fn writes(&self) -> usize {
            self.writes
        }

        fn slot(&self, sector: SectorIndex) -> Result<usize, IoError> {
            let index = usize::try_from(sector).map_err(|_| IoError)?;
            if index < self.sectors.len() {
                Ok(index)
            } else {
                Err(IoError)
            }
        }
    }

    impl BlockDevice for MemoryDisk {
        fn sector_count(&self) -> SectorIndex {
            self.sectors.len() as SectorIndex
        }

        fn read_sector(
            &mut self,
            sector: SectorIndex,
            buffer: &mut [u8; SECTOR_SIZE],
        ) -> Result<(), IoError> {
            let index = self.slot(sector)?;
            if self.fail_after_reads.is_some_and(|limit| self.reads >= limit) {
                return Err(IoError);
            }
            buffer.copy_from_slice(&self.sectors[index]);
            self.reads += 1;
            Ok(())
        }

        fn write_sector(
            &mut self,
            sector: SectorIndex,
            buffer: &[u8; SECTOR_SIZE],
        ) -> Result<(), IoError> {
            let index = self.slot(sector)?;
            if self.fail_after_writes.is_some_and(|limit| self.writes >= limit) {
                return Err(IoError);
            }
            self.sectors[index].copy_from_slice(buffer);
            self.writes += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_disk_round_trip() {
        let mut disk = MemoryDisk::new(4);
        let data = [0xAB; SECTOR_SIZE];
        disk.write_sector(2, &data).unwrap();

        let mut buffer = [0; SECTOR_SIZE];
        disk.read_sector(2, &mut buffer).unwrap();
        assert_eq!(buffer, data);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
    }

    #[test]
    fn out_of_range_sector() {
        let mut disk = MemoryDisk::new(4);
        let mut buffer = [0; SECTOR_SIZE];
        assert_eq!(disk.read_sector(4, &mut buffer), Err(IoError));
    }

    #[test]
    fn injected_write_failure() {
        let mut disk = MemoryDisk::new(4).fail_after_writes(1);
        assert!(disk.write_sector(0, &[1; SECTOR_SIZE]).is_ok());
        assert_eq!(disk.write_sector(1, &[1; SECTOR_SIZE]), Err(IoError));
    }

    #[test]
    fn injected_read_failure() {
        let mut disk = MemoryDisk::new(4).fail_after_reads(2);
        let mut buffer = [0; SECTOR_SIZE];
        assert!(disk.read_sector(0, &mut buffer).is_ok());
        assert!(disk.read_sector(1, &mut buffer).is_ok());
        assert_eq!(disk.read_sector(2, &mut buffer), Err(IoError));
        assert_eq!(disk.reads(), 2);
    }
}
