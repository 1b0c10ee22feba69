//! # Strata
//!
//! Software RAID-5 block device aggregation.
//!
//! Strata turns N (3..=16) same-shaped block devices into one logical
//! volume with rotating parity, tolerant of a single device failing
//! outright. It is a library, not a driver: callers supply their own
//! [`BlockDevice`] implementation (an AHCI/NVMe handle, a loopback file, the
//! in-memory [`device::test_util::MemoryDisk`] under `test-util`) and get
//! back a sector-addressed logical volume with a small lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Volume<D>                          │
//! │  create / start / stop / resync / read / write / status    │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐ │
//! │  │ addr         │   │ metadata     │   │ state            │ │
//! │  │ data/parity  │   │ service      │   │ STOPPED/OK/       │ │
//! │  │ location     │   │ record codec │   │ DEGRADED/FAILED   │ │
//! │  └─────────────┘   └──────────────┘   └──────────────────┘ │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ BlockDevice (injected)
//!              ┌─────────────┴─────────────┐
//!              │   real driver / loopback   │
//!              │   / MemoryDisk (tests)     │
//!              └────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use strata::{Volume, device::test_util::MemoryDisk};
//!
//! let mut disk = MemoryDisk::new(3, 2048);
//! let mut vol: Volume<MemoryDisk> = Volume::new();
//! vol.create(&mut disk);
//! vol.start(disk);
//!
//! let data = [0xABu8; 512];
//! vol.write(0, &data, 1);
//!
//! let mut out = [0u8; 512];
//! vol.read(0, &mut out, 1);
//! assert_eq!(out, data);
//! ```

pub mod addr;
pub mod device;
pub mod error;
pub mod metadata;
pub mod state;
mod volume;

pub use device::BlockDevice;
pub use error::{Result, VolumeError};
pub use state::State;
pub use volume::Volume;

/// Re-export of the commonly needed types.
pub mod prelude {
    pub use crate::device::BlockDevice;
    pub use crate::error::{Result, VolumeError};
    pub use crate::state::State;
    pub use crate::volume::Volume;
}
