//! Service record codec
//!
//! The last sector of every underlying device is reserved for volume
//! metadata: a 3-byte service record at byte offsets `0..3`. The remaining
//! 509 bytes of the sector are unused by the protocol and are zeroed by
//! [`encode`] for determinism (the source leaves them undefined; zeroing
//! costs nothing and makes test fixtures reproducible).

use crate::device::SECTOR_SIZE;
use crate::state::{State, NO_FAILED_DEVICE};

/// A decoded service record: the volume's timestamp, state, and failed
/// device hint as they were written to a device's last sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRecord {
    pub timestamp: u8,
    pub state: State,
    pub failed_device: Option<usize>,
}

/// Encode a service record into a full 512-byte sector buffer.
pub fn encode(timestamp: u8, state: State, failed_device: Option<usize>) -> [u8; SECTOR_SIZE] {
    let mut buf = [0u8; SECTOR_SIZE];
    buf[0] = timestamp;
    buf[1] = failed_device.map(|d| d as u8).unwrap_or(NO_FAILED_DEVICE);
    buf[2] = state.to_byte();
    buf
}

/// Decode a service record from a 512-byte sector buffer previously
/// produced by [`encode`] (or read off a real device's last sector).
pub fn decode(buf: &[u8; SECTOR_SIZE]) -> ServiceRecord {
    let failed_device = if buf[1] == NO_FAILED_DEVICE {
        None
    } else {
        Some(buf[1] as usize)
    };
    ServiceRecord {
        timestamp: buf[0],
        state: State::from_byte(buf[2]),
        failed_device,
    }
}
