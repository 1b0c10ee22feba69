//! Property-based tests for the parity invariant and single-fault
//! tolerance (spec `TESTABLE PROPERTIES` 2 and 4).

use proptest::prelude::*;
use strata::device::test_util::MemoryDisk;
use strata::{BlockDevice, State, Volume};

const N: usize = 3;
const S: u32 = 2048;

fn size() -> u32 {
    (N as u32 - 1) * (S - 1)
}

proptest! {
    /// After any sequence of successful writes from state OK, the XOR of a
    /// given offset across all devices is the zero sector.
    #[test]
    fn parity_invariant_holds_after_writes(
        writes in prop::collection::vec((0u32..size(), any::<u8>()), 1..40)
    ) {
        let mut disk = MemoryDisk::new(N, S);
        let mut vol: Volume<MemoryDisk> = Volume::new();
        prop_assert!(vol.create(&mut disk));
        prop_assert_eq!(vol.start(disk), State::Ok);

        for (k, byte) in &writes {
            let buf = [*byte; 512];
            prop_assert!(vol.write(*k, &buf, 1));
        }

        let mut disk = vol.into_device_for_test().expect("device bound while OK");
        for r in 0..(S - 1) {
            let mut acc = [0u8; 512];
            for dev in 0..N {
                let mut buf = [0u8; 512];
                disk.read(dev, r, &mut buf);
                for (a, b) in acc.iter_mut().zip(buf.iter()) {
                    *a ^= b;
                }
            }
            prop_assert_eq!(acc, [0u8; 512]);
        }
    }

    /// Starting from OK, a single device going bad outright does not lose
    /// data: every logical sector reads back its pre-failure value.
    #[test]
    fn single_fault_read_reconstructs_pre_failure_value(
        pattern in any::<u8>(),
        k in 0u32..size(),
        faulty in 0usize..N,
    ) {
        let mut disk = MemoryDisk::new(N, S);
        let mut vol: Volume<MemoryDisk> = Volume::new();
        prop_assert!(vol.create(&mut disk));
        prop_assert_eq!(vol.start(disk), State::Ok);

        let buf = [pattern; 512];
        prop_assert!(vol.write(k, &buf, 1));

        vol.fail_device_for_test(faulty);

        let mut out = [0u8; 512];
        prop_assert!(vol.read(k, &mut out, 1));
        prop_assert_eq!(out, buf);
        prop_assert_eq!(vol.status(), State::Degraded);
    }
}
