//! Block device capability
//!
//! The volume engine never touches real storage itself: it is handed a
//! [`BlockDevice`] implementation and only ever issues single-sector
//! requests against it. The actual driver (AHCI, NVMe, a loopback file, an
//! in-memory fake) lives entirely outside this crate.

/// Sector size in bytes. Fixed; the spec does not support variable sector
/// sizes (see Non-goals).
pub const SECTOR_SIZE: usize = 512;

/// Minimum number of underlying devices a volume can aggregate.
pub const MIN_DEVICES: usize = 3;
/// Maximum number of underlying devices a volume can aggregate.
pub const MAX_DEVICES: usize = 16;

/// Minimum per-device sector count.
pub const MIN_SECTORS: u32 = 2048;
/// Maximum per-device sector count.
pub const MAX_SECTORS: u32 = 2 * 1024 * 1024;

/// Synchronous sector-addressed storage capability injected into a
/// [`crate::Volume`].
///
/// Implementations report success by returning `1` (one sector
/// transferred) and failure by returning anything else. The engine issues
/// only single-sector requests (`sector_count` is always 1 in spirit; the
/// trait is expressed per-sector rather than with an explicit count
/// parameter since the core never batches I/O across rows).
pub trait BlockDevice {
    /// Total number of devices aggregated by this volume.
    fn devices(&self) -> usize;

    /// Sector count of each device (identical across all devices).
    fn sectors(&self) -> u32;

    /// Read one sector from `device` at `sector` into `buf`. Returns `1` on
    /// success, `0` on failure.
    fn read(&mut self, device: usize, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> usize;

    /// Write one sector to `device` at `sector` from `buf`. Returns `1` on
    /// success, `0` on failure.
    fn write(&mut self, device: usize, sector: u32, buf: &[u8; SECTOR_SIZE]) -> usize;
}

/// Validate that `devices`/`sectors` fall within the legal topology range.
pub fn validate_topology(devices: usize, sectors: u32) -> bool {
    (MIN_DEVICES..=MAX_DEVICES).contains(&devices)
        && (MIN_SECTORS..=MAX_SECTORS).contains(&sectors)
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    //! In-memory [`BlockDevice`] test double with fault injection, used by
    //! this crate's own integration tests and available to downstream
    //! harnesses under the `test-util` feature.

    use super::{BlockDevice, SECTOR_SIZE};

    /// A [`BlockDevice`] backed by `Vec<Vec<u8>>`, with per-device fault
    /// injection: a device can be told to fail all reads, all writes, or
    /// both, simulating a dead disk without touching real storage.
    #[derive(Clone)]
    pub struct MemoryDisk {
        sectors_per_device: u32,
        disks: Vec<Vec<u8>>,
        fail_read: Vec<bool>,
        fail_write: Vec<bool>,
    }

    impl MemoryDisk {
        /// Create a fresh `devices`-disk volume backing store, each disk
        /// holding `sectors` sectors of zeroed bytes.
        pub fn new(devices: usize, sectors: u32) -> Self {
            let bytes_per_device = sectors as usize * SECTOR_SIZE;
            Self {
                sectors_per_device: sectors,
                disks: vec![vec![0u8; bytes_per_device]; devices],
                fail_read: vec![false; devices],
                fail_write: vec![false; devices],
            }
        }

        /// Make every read against `device` fail until [`Self::heal`] is called.
        pub fn fail_reads(&mut self, device: usize) {
            self.fail_read[device] = true;
        }

        /// Make every write against `device` fail until [`Self::heal`] is called.
        pub fn fail_writes(&mut self, device: usize) {
            self.fail_write[device] = true;
        }

        /// Make every I/O against `device` fail until [`Self::heal`] is called.
        pub fn fail_all(&mut self, device: usize) {
            self.fail_read[device] = true;
            self.fail_write[device] = true;
        }

        /// Clear fault injection for `device`.
        pub fn heal(&mut self, device: usize) {
            self.fail_read[device] = false;
            self.fail_write[device] = false;
        }

        /// Overwrite a device's entire contents with zeros, simulating a
        /// physical disk replacement ahead of a resync.
        pub fn replace(&mut self, device: usize) {
            self.disks[device] = vec![0u8; self.sectors_per_device as usize * SECTOR_SIZE];
        }

        /// Corrupt a device's last sector so the next service-record read
        /// against it fails, simulating an unreadable metadata sector.
        pub fn corrupt_last_sector(&mut self, device: usize) {
            self.fail_read[device] = true;
        }

        fn offset(&self, sector: u32) -> usize {
            sector as usize * SECTOR_SIZE
        }
    }

    impl BlockDevice for MemoryDisk {
        fn devices(&self) -> usize {
            self.disks.len()
        }

        fn sectors(&self) -> u32 {
            self.sectors_per_device
        }

        fn read(&mut self, device: usize, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> usize {
            if self.fail_read[device] {
                return 0;
            }
            let off = self.offset(sector);
            buf.copy_from_slice(&self.disks[device][off..off + SECTOR_SIZE]);
            1
        }

        fn write(&mut self, device: usize, sector: u32, buf: &[u8; SECTOR_SIZE]) -> usize {
            if self.fail_write[device] {
                return 0;
            }
            let off = self.offset(sector);
            self.disks[device][off..off + SECTOR_SIZE].copy_from_slice(buf);
            1
        }
    }
}
