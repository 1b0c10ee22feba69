//! Address translation between logical sector numbers and (device, offset)
//! pairs under rotating (left-symmetric) parity.
//!
//! For a logical sector `k` on an `n`-device volume:
//!   row    = k / (n-1)
//!   col    = k mod (n-1)
//!   parity = row mod n
//!   data   = col         if col <  parity
//!            col + 1     if col >= parity
//!
//! Offset on-device is `row` for both the data sector and the row's parity
//! sector. Callers must ensure `k` is within `[0, (n-1)*(s-1))`; this module
//! does no bounds checking of its own (the public `Volume` API gates that,
//! see `crate::volume`).
//!
//! `n` is required to be within the legal device-count range on every call;
//! this is enforced with a `contracts` precondition rather than a `Result`
//! since a caller passing an out-of-range `n` here is a programming error,
//! not a runtime condition (the one caller, `Volume`, has already validated
//! its own topology at `create`/`start` time).

use contracts::requires;

use crate::device::{MAX_DEVICES, MIN_DEVICES};

/// Device index and on-device offset for the data sector backing logical
/// sector `k`.
#[requires((MIN_DEVICES..=MAX_DEVICES).contains(&n), "device count out of range")]
pub fn data_location(k: u32, n: usize) -> (usize, u32) {
    let n = n as u32;
    let row = k / (n - 1);
    let col = k % (n - 1);
    let parity = row % n;
    let device = if col < parity { col } else { col + 1 };
    (device as usize, row)
}

/// Device index and on-device offset for the parity sector of the row
/// containing logical sector `k`.
#[requires((MIN_DEVICES..=MAX_DEVICES).contains(&n), "device count out of range")]
pub fn parity_location(k: u32, n: usize) -> (usize, u32) {
    let n = n as u32;
    let row = k / (n - 1);
    let device = row % n;
    (device as usize, row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parity_rotates_by_row() {
        // n=3: parity device should cycle 0,1,2,0,1,2,...
        for row in 0u32..10 {
            let k = row * 2; // n-1 = 2 sectors per row
            let (dev, off) = parity_location(k, 3);
            assert_eq!(dev, (row % 3) as usize);
            assert_eq!(off, row);
        }
    }

    #[test]
    fn data_and_parity_never_collide_within_row() {
        for n in 3..=16usize {
            for row in 0u32..20 {
                let mut seen = HashSet::new();
                let (pdev, poff) = parity_location(row * (n as u32 - 1), n);
                assert_eq!(poff, row);
                seen.insert(pdev);
                for col in 0..(n as u32 - 1) {
                    let k = row * (n as u32 - 1) + col;
                    let (ddev, doff) = data_location(k, n);
                    assert_eq!(doff, row);
                    assert!(seen.insert(ddev), "device {ddev} used twice in row {row}");
                }
                assert_eq!(seen.len(), n);
            }
        }
    }

    #[test]
    fn row_zero_n3() {
        // row 0, n=3: parity on device 0, data columns 0,1 land on devices 1,2
        assert_eq!(parity_location(0, 3), (0, 0));
        assert_eq!(data_location(0, 3), (1, 0));
        assert_eq!(data_location(1, 3), (2, 0));
    }
}
