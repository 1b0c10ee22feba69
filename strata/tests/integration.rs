//! End-to-end scenarios against the in-memory test double.

use strata::device::test_util::MemoryDisk;
use strata::{addr, State, Volume};

fn fresh(n: usize, s: u32) -> (MemoryDisk, Volume<MemoryDisk>) {
    let mut disk = MemoryDisk::new(n, s);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert!(vol.create(&mut disk));
    (disk, vol)
}

/// E1: basic interleaved read-after-write.
#[test]
fn e1_interleaved_read_after_write() {
    let (disk, mut vol) = fresh(3, 2048);
    assert_eq!(vol.start(disk), State::Ok);

    let pattern_a = [0xAAu8; 512];
    let pattern_b = [0xBBu8; 512];
    assert!(vol.write(0, &pattern_a, 1));
    assert!(vol.write(1, &pattern_b, 1));

    let mut out = [0u8; 1024];
    assert!(vol.read(0, &mut out, 2));
    assert_eq!(&out[..512], &pattern_a[..]);
    assert_eq!(&out[512..], &pattern_b[..]);
}

/// E2: a single failed device degrades the volume but reads still succeed
/// by reconstruction.
#[test]
fn e2_degraded_read_reconstructs() {
    let mut disk = MemoryDisk::new(4, 2048);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert!(vol.create(&mut disk));
    assert_eq!(vol.start(disk), State::Ok);

    let pattern_a = [0x11u8; 512];
    assert!(vol.write(0, &pattern_a, 1));

    vol.fail_device_for_test(2);

    let mut out = [0u8; 512];
    assert!(vol.read(0, &mut out, 1));
    assert_eq!(out, pattern_a);
    assert_eq!(vol.status(), State::Degraded);
}

/// E3: a second device failing while already DEGRADED takes the volume to
/// FAILED and further reads are rejected.
#[test]
fn e3_second_failure_fails_volume() {
    let mut disk = MemoryDisk::new(3, 2048);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert!(vol.create(&mut disk));
    assert_eq!(vol.start(disk), State::Ok);

    vol.fail_device_for_test(1);
    let pattern_z = [0x5Au8; 512];
    assert!(vol.write(5, &pattern_z, 1));
    assert_eq!(vol.status(), State::Degraded);

    vol.fail_device_for_test(0);
    let mut out = [0u8; 512];
    assert!(!vol.read(5, &mut out, 1));
    assert_eq!(vol.status(), State::Failed);
}

/// E4: boundary sector is addressable, one past it is rejected.
#[test]
fn e4_last_sector_addressable_one_past_rejected() {
    let (disk, mut vol) = fresh(5, 2048);
    assert_eq!(vol.start(disk), State::Ok);

    let size = vol.size();
    assert_eq!(size, 4 * 2047);

    let pattern = [0x42u8; 512];
    assert!(vol.write(size - 1, &pattern, 1));
    let mut out = [0u8; 512];
    assert!(vol.read(size - 1, &mut out, 1));
    assert_eq!(out, pattern);

    assert!(!vol.write(size, &pattern, 1));
    assert!(!vol.read(size, &mut out, 1));
}

/// E5: stop/start round-trips the volume's contents, and an unreadable
/// service record degrades the restarted volume with the right device
/// identified as failed.
#[test]
fn e5_stop_start_roundtrip_then_degraded_restart() {
    let mut disk = MemoryDisk::new(3, 2048);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert!(vol.create(&mut disk));
    assert_eq!(vol.start(disk), State::Ok);

    let mut patterns = Vec::new();
    for i in 0..10u32 {
        let p = [i as u8; 512];
        assert!(vol.write(i, &p, 1));
        patterns.push(p);
    }

    vol.stop();
    let mut disk2 = vol.into_device_for_test().expect("device retained across stop");
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert_eq!(vol.start(disk2.clone()), State::Ok);

    for (i, p) in patterns.iter().enumerate() {
        let mut out = [0u8; 512];
        assert!(vol.read(i as u32, &mut out, 1));
        assert_eq!(&out, p);
    }

    vol.stop();
    disk2.corrupt_last_sector(2);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert_eq!(vol.start(disk2), State::Degraded);
    assert_eq!(vol.failed_device_for_test(), Some(2));
}

/// E6: resync after replacing a degraded device's storage restores OK and
/// the previously written data reads back correctly.
#[test]
fn e6_resync_restores_ok() {
    let mut disk = MemoryDisk::new(3, 2048);
    let mut vol: Volume<MemoryDisk> = Volume::new();
    assert!(vol.create(&mut disk));
    assert_eq!(vol.start(disk), State::Ok);

    vol.fail_device_for_test(1);
    let pattern_p = [0x77u8; 512];
    assert!(vol.write(0, &pattern_p, 1));
    assert_eq!(vol.status(), State::Degraded);

    vol.replace_failed_device_for_test();
    assert!(vol.resync());
    assert_eq!(vol.status(), State::Ok);

    let mut out = [0u8; 512];
    assert!(vol.read(0, &mut out, 1));
    assert_eq!(out, pattern_p);
}

#[test]
fn address_translation_matches_public_addr_module() {
    let (dev, off) = addr::data_location(0, 3);
    assert_eq!(off, 0);
    assert!(dev < 3);
}
