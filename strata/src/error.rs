//! Error types for the volume engine

use thiserror::Error;

/// Volume engine error types
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// A single-sector device I/O request did not return the requested count
    #[error("device {device} failed I/O at sector {sector}")]
    DeviceIoError { device: usize, sector: u32 },

    /// A data operation was attempted while the volume is STOPPED
    #[error("volume is not started")]
    NotStarted,

    /// A data operation was attempted while the volume is FAILED
    #[error("volume has failed and is not operational")]
    Failed,

    /// Logical sector number (or sector + count) is outside the addressable range
    #[error("sector range [{sector}, {sector}+{count}) is out of bounds for size {size}")]
    OutOfRange { sector: u32, count: u32, size: u32 },

    /// Device count or per-device sector count is outside the legal range
    #[error("invalid topology: {devices} devices of {sectors} sectors each")]
    InvalidTopology { devices: usize, sectors: u32 },

    /// The caller's buffer does not match `count * SECTOR_SIZE` bytes
    #[error("buffer length {actual} does not match {expected} bytes for {count} sectors")]
    BufferSize {
        expected: usize,
        actual: usize,
        count: u32,
    },

    /// `start` could not establish a quorum on the authoritative timestamp
    #[error("consensus could not be established among service records")]
    ConsensusFailed,

    /// `create` failed to write the initial service record to more than one device
    #[error("more than one device rejected the initial service record")]
    CreateFailed,

    /// `resync` was called while the volume was not DEGRADED
    #[error("resync is not applicable in the current state")]
    NotDegraded,
}

/// Result type for volume engine operations
pub type Result<T> = std::result::Result<T, VolumeError>;
