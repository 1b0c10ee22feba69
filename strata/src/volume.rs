//! Lifecycle controller, read/write paths, resync engine, and state machine
//! for a RAID-5 volume.
//!
//! ```text
//! STOPPED --create/start--> OK|DEGRADED|FAILED --stop--> STOPPED
//!                              ^          |
//!                              '--resync--'
//! ```
//!
//! A [`Volume`] is single-threaded with respect to its own public methods:
//! callers must not invoke two operations concurrently on the same volume.
//! All I/O is synchronous through the injected [`BlockDevice`]; there is no
//! interior mutability here and no background work, so the struct is a
//! plain `&mut self` state machine rather than something wrapped in a lock.

use crate::addr;
use crate::device::{self, BlockDevice, SECTOR_SIZE};
use crate::error::{Result, VolumeError};
use crate::metadata::{self, ServiceRecord};
use crate::state::State;

/// Only the first three devices participate in picking the authoritative
/// timestamp at `start`, even when the volume has more than three members.
/// This is a deliberate simplification carried over from the source
/// implementation and is load-bearing for on-disk compatibility; it must
/// not be widened to `n`.
const QUORUM: usize = 3;

/// A small bitmask over device indices, used to exclude devices from a
/// parity computation without allocating a set.
#[derive(Clone, Copy, Default)]
struct ExcludeSet(u32);

impl ExcludeSet {
    fn new() -> Self {
        Self(0)
    }

    fn with(mut self, device: usize) -> Self {
        self.0 |= 1 << device;
        self
    }

    fn contains(self, device: usize) -> bool {
        self.0 & (1 << device) != 0
    }
}

fn xor_into(acc: &mut [u8; SECTOR_SIZE], buf: &[u8; SECTOR_SIZE]) {
    for (a, b) in acc.iter_mut().zip(buf.iter()) {
        *a ^= b;
    }
}

/// A software RAID-5 volume aggregating `n` instances of `D` into one
/// logical block device with single-device-fault tolerance.
///
/// `D` is bound only while the volume is started (`Some` between `start`
/// and `stop`); `create` borrows a device handle just long enough to lay
/// down the initial service records and does not retain it.
pub struct Volume<D: BlockDevice> {
    dev: Option<D>,
    n: usize,
    s: u32,
    state: State,
    timestamp: u8,
    failed_device: Option<usize>,
}

impl<D: BlockDevice> Default for Volume<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: BlockDevice> Volume<D> {
    /// A fresh, unstarted volume. Call [`Volume::create`] once on new
    /// storage, or [`Volume::start`] to bring up an existing one.
    pub fn new() -> Self {
        Self {
            dev: None,
            n: 0,
            s: 0,
            state: State::Stopped,
            timestamp: 0,
            failed_device: None,
        }
    }

    /// Current operational state.
    pub fn status(&self) -> State {
        self.state
    }

    /// Number of user-addressable logical sectors: `(n-1)*(s-1)`. Zero
    /// before the volume has been started or created.
    pub fn size(&self) -> u32 {
        if self.n < device::MIN_DEVICES || self.s == 0 {
            return 0;
        }
        (self.n as u32 - 1) * (self.s - 1)
    }

    fn dev_mut(&mut self) -> &mut D {
        self.dev
            .as_mut()
            .expect("device bound while state is OK or DEGRADED")
    }

    fn guard_active(&self) -> Result<()> {
        match self.state {
            State::Ok | State::Degraded => Ok(()),
            State::Stopped => Err(VolumeError::NotStarted),
            State::Failed => Err(VolumeError::Failed),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle: create
    // ------------------------------------------------------------------

    /// Initialize fresh storage: writes the initial service record
    /// (`timestamp = 0`, no failed device, `STOPPED`) to every device's
    /// last sector. Tolerates at most one write failure across all N
    /// devices. Does not leave the volume started.
    pub fn create(&mut self, dev: &mut D) -> bool {
        match self.create_checked(dev) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "create failed");
                false
            }
        }
    }

    /// [`Volume::create`], returning the reason for failure.
    pub fn create_checked(&mut self, dev: &mut D) -> Result<()> {
        let n = dev.devices();
        let s = dev.sectors();
        if !device::validate_topology(n, s) {
            return Err(VolumeError::InvalidTopology {
                devices: n,
                sectors: s,
            });
        }

        self.n = n;
        self.s = s;
        self.timestamp = 0;
        self.state = State::Stopped;
        self.failed_device = None;

        let record = metadata::encode(0, State::Stopped, None);
        let mut failures = 0usize;
        for i in 0..n {
            if dev.write(i, s - 1, &record) != 1 {
                failures += 1;
                tracing::warn!(device = i, "initial service record write failed");
                if failures > 1 {
                    tracing::error!("more than one device rejected the initial service record");
                    return Err(VolumeError::CreateFailed);
                }
            }
        }

        tracing::info!(devices = n, sectors = s, "volume created");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle: start
    // ------------------------------------------------------------------

    fn read_service_record(&mut self, device: usize) -> Option<ServiceRecord> {
        let mut buf = [0u8; SECTOR_SIZE];
        let sector = self.s - 1;
        if self.dev_mut().read(device, sector, &mut buf) != 1 {
            None
        } else {
            Some(metadata::decode(&buf))
        }
    }

    /// Bring the volume online by reconstructing its last known state from
    /// the per-device service records. Only the first [`QUORUM`] devices
    /// vote on the authoritative timestamp; devices beyond the quorum are
    /// validated against it. Never mutates on-disk state.
    pub fn start(&mut self, dev: D) -> State {
        let n = dev.devices();
        let s = dev.sectors();

        if !device::validate_topology(n, s) {
            tracing::error!(devices = n, sectors = s, "invalid topology, cannot start");
            self.state = State::Failed;
            return self.state;
        }

        self.n = n;
        self.s = s;
        self.failed_device = None;
        self.dev = Some(dev);

        let mut records: Vec<Option<ServiceRecord>> = vec![None; n];
        let mut failed = 0usize;

        for i in 0..QUORUM {
            match self.read_service_record(i) {
                Some(rec) => {
                    if rec.state == State::Failed {
                        tracing::error!(device = i, "device reports on-disk FAILED state");
                        self.state = State::Failed;
                        return self.state;
                    }
                    records[i] = Some(rec);
                }
                None => {
                    failed += 1;
                    self.failed_device = Some(i);
                    tracing::warn!(device = i, "service record unreadable during start");
                    if failed > 1 {
                        self.state = State::Failed;
                        return self.state;
                    }
                    self.state = State::Degraded;
                }
            }
        }

        let good_timestamp = if failed > 0 {
            let fd = self.failed_device.expect("failed count implies failed_device set");
            let a = records[(fd + 1) % QUORUM].expect("surviving quorum member readable").timestamp;
            let b = records[(fd + 2) % QUORUM].expect("surviving quorum member readable").timestamp;
            if a != b {
                tracing::error!("surviving quorum members disagree on timestamp");
                self.state = State::Failed;
                return self.state;
            }
            a
        } else {
            let t0 = records[0].expect("read above").timestamp;
            let t1 = records[1].expect("read above").timestamp;
            let t2 = records[2].expect("read above").timestamp;
            if t0 == t1 && t0 == t2 {
                self.state = State::Ok;
                t0
            } else if t0 == t1 {
                self.failed_device = Some(2);
                self.state = State::Degraded;
                t0
            } else if t0 == t2 {
                self.failed_device = Some(1);
                self.state = State::Degraded;
                t0
            } else if t1 == t2 {
                self.failed_device = Some(0);
                self.state = State::Degraded;
                t1
            } else {
                tracing::error!("quorum timestamps all disagree");
                self.state = State::Failed;
                return self.state;
            }
        };

        for i in QUORUM..n {
            match self.read_service_record(i) {
                Some(rec) => {
                    if rec.timestamp != good_timestamp {
                        failed += 1;
                        self.failed_device = Some(i);
                        self.state = State::Degraded;
                        tracing::warn!(device = i, "service record timestamp mismatch");
                    }
                }
                None => {
                    failed += 1;
                    self.failed_device = Some(i);
                    self.state = State::Degraded;
                    tracing::warn!(device = i, "service record unreadable during start");
                }
            }
            if failed > 1 {
                self.state = State::Failed;
                return self.state;
            }
        }

        self.timestamp = good_timestamp;
        tracing::info!(state = %self.state, timestamp = self.timestamp, "volume started");
        self.state
    }

    // ------------------------------------------------------------------
    // Lifecycle: stop
    // ------------------------------------------------------------------

    /// Persist the volume's current timestamp (incremented by one, wrapping
    /// modulo 256) and pre-stop operational state to every non-failed
    /// device, best-effort, then transition to STOPPED.
    pub fn stop(&mut self) -> State {
        self.timestamp = self.timestamp.wrapping_add(1);
        let record = metadata::encode(self.timestamp, self.state, self.failed_device);

        if let Some(dev) = self.dev.as_mut() {
            for i in 0..self.n {
                if Some(i) == self.failed_device {
                    continue;
                }
                // Best effort: a write failure during stop does not change
                // the outcome, it is simply not durable for that device.
                let _ = dev.write(i, self.s - 1, &record);
            }
        }

        tracing::info!(timestamp = self.timestamp, prior_state = %self.state, "volume stopped");
        self.state = State::Stopped;
        self.state
    }

    // ------------------------------------------------------------------
    // Resync
    // ------------------------------------------------------------------

    /// Rebuild the failed device from the surviving N-1 by XOR-ing every
    /// offset across the survivors, including the metadata sector at
    /// offset `s-1` (its rewritten content is whatever the survivors' XOR
    /// yields; `stop` will overwrite it with a proper record). A no-op
    /// success if already OK; a no-op failure if FAILED or STOPPED.
    pub fn resync(&mut self) -> bool {
        match self.resync_checked() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "resync did not complete");
                false
            }
        }
    }

    /// [`Volume::resync`], returning the reason for failure. A no-op
    /// `Ok(())` when already OK (there is nothing to rebuild);
    /// [`VolumeError::NotDegraded`] when called outside DEGRADED, since
    /// resync is only meaningful with exactly one device presumed failed.
    pub fn resync_checked(&mut self) -> Result<()> {
        match self.state {
            State::Ok => {
                tracing::debug!("resync requested while already OK, no-op");
                Ok(())
            }
            State::Failed | State::Stopped => {
                tracing::warn!(state = %self.state, "resync requested outside DEGRADED");
                Err(VolumeError::NotDegraded)
            }
            State::Degraded => {
                let failed = match self.failed_device {
                    Some(f) => f,
                    None => return Err(VolumeError::NotDegraded),
                };

                for r in 0..self.s {
                    let mut acc = [0u8; SECTOR_SIZE];
                    for dev in 0..self.n {
                        if dev == failed {
                            continue;
                        }
                        let mut buf = [0u8; SECTOR_SIZE];
                        if self.dev_mut().read(dev, r, &mut buf) != 1 {
                            tracing::warn!(device = dev, offset = r, "resync read failed, aborting");
                            return Err(VolumeError::DeviceIoError { device: dev, sector: r });
                        }
                        xor_into(&mut acc, &buf);
                    }
                    if self.dev_mut().write(failed, r, &acc) != 1 {
                        tracing::warn!(device = failed, offset = r, "resync write failed, aborting");
                        return Err(VolumeError::DeviceIoError {
                            device: failed,
                            sector: r,
                        });
                    }
                }

                self.failed_device = None;
                self.state = State::Ok;
                tracing::info!(device = failed, "resync completed, volume OK");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Read `count` consecutive logical sectors starting at `sec_nr` into
    /// `buf` (which must hold exactly `count * 512` bytes).
    pub fn read(&mut self, sec_nr: u32, buf: &mut [u8], count: u32) -> bool {
        match self.read_checked(sec_nr, buf, count) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, sector = sec_nr, "read failed");
                false
            }
        }
    }

    /// [`Volume::read`], returning the reason for failure.
    pub fn read_checked(&mut self, sec_nr: u32, buf: &mut [u8], count: u32) -> Result<()> {
        self.guard_active()?;
        self.check_bounds(sec_nr, buf.len(), count)?;

        for (i, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = sec_nr + i as u32;
            let out: &mut [u8; SECTOR_SIZE] = chunk.try_into().expect("chunk is exactly 512 bytes");
            self.read_one_sector(sector, out)?;
        }
        Ok(())
    }

    fn read_one_sector(&mut self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let recovered = match self.state {
            State::Ok => {
                if self.read_sector_normal(sector, out) {
                    return Ok(());
                }
                self.state = State::Degraded;
                tracing::warn!(device = ?self.failed_device, sector, "read failed, volume now degraded");
                self.read_sector_degraded(sector, out)
            }
            State::Degraded => self.read_sector_degraded(sector, out),
            State::Stopped | State::Failed => unreachable!("guarded by guard_active"),
        };

        if recovered {
            Ok(())
        } else {
            self.state = State::Failed;
            tracing::error!(sector, "second read failure, volume failed");
            Err(VolumeError::DeviceIoError {
                device: self.failed_device.unwrap_or(usize::MAX),
                sector,
            })
        }
    }

    fn read_sector_normal(&mut self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> bool {
        let (device, offset) = addr::data_location(sector, self.n);
        let mut buf = [0u8; SECTOR_SIZE];
        if self.dev_mut().read(device, offset, &mut buf) != 1 {
            self.failed_device = Some(device);
            return false;
        }
        *out = buf;
        true
    }

    fn read_sector_degraded(&mut self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> bool {
        let (device, offset) = addr::data_location(sector, self.n);
        if Some(device) != self.failed_device {
            let mut buf = [0u8; SECTOR_SIZE];
            if self.dev_mut().read(device, offset, &mut buf) != 1 {
                return false;
            }
            *out = buf;
            true
        } else {
            self.recover_sector(sector, out)
        }
    }

    fn recover_sector(&mut self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> bool {
        let (_, offset) = addr::data_location(sector, self.n);
        let failed = self.failed_device;
        let mut acc = [0u8; SECTOR_SIZE];
        for dev in 0..self.n {
            if Some(dev) == failed {
                continue;
            }
            let mut buf = [0u8; SECTOR_SIZE];
            if self.dev_mut().read(dev, offset, &mut buf) != 1 {
                return false;
            }
            xor_into(&mut acc, &buf);
        }
        *out = acc;
        true
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Write `count` consecutive logical sectors starting at `sec_nr` from
    /// `buf` (which must hold exactly `count * 512` bytes).
    pub fn write(&mut self, sec_nr: u32, buf: &[u8], count: u32) -> bool {
        match self.write_checked(sec_nr, buf, count) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, sector = sec_nr, "write failed");
                false
            }
        }
    }

    /// [`Volume::write`], returning the reason for failure.
    pub fn write_checked(&mut self, sec_nr: u32, buf: &[u8], count: u32) -> Result<()> {
        self.guard_active()?;
        self.check_bounds(sec_nr, buf.len(), count)?;

        for (i, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = sec_nr + i as u32;
            let data: &[u8; SECTOR_SIZE] = chunk.try_into().expect("chunk is exactly 512 bytes");
            self.write_one_sector(sector, data)?;
        }
        Ok(())
    }

    fn write_one_sector(&mut self, sector: u32, data: &[u8; SECTOR_SIZE]) -> Result<()> {
        let mut success = false;

        if self.state == State::Ok {
            success = self.write_normal(sector, data);
        }
        if !success && self.state == State::Degraded {
            success = self.write_degraded(sector, data);
        }

        if success {
            Ok(())
        } else {
            self.state = State::Failed;
            tracing::error!(sector, "write failed, volume failed");
            Err(VolumeError::DeviceIoError {
                device: self.failed_device.unwrap_or(usize::MAX),
                sector,
            })
        }
    }

    /// Read-modify-write by reconstruction: compute the new parity from
    /// every other data device plus the new data, then write both.
    fn write_normal(&mut self, sector: u32, data: &[u8; SECTOR_SIZE]) -> bool {
        let (dd, doff) = addr::data_location(sector, self.n);
        let (dp, poff) = addr::parity_location(sector, self.n);
        debug_assert_eq!(doff, poff);

        let exclude = ExcludeSet::new().with(dd).with(dp);
        let mut parity = match self.compute_parity_excluding(doff, exclude) {
            Some(p) => p,
            None => {
                // The failing device during pre-read isn't individually
                // identified; attribute it to the data device, matching
                // the source engine's behaviour.
                self.failed_device = Some(dd);
                self.state = State::Degraded;
                return false;
            }
        };
        xor_into(&mut parity, data);

        if self.dev_mut().write(dd, doff, data) != 1 {
            self.failed_device = Some(dd);
            self.state = State::Degraded;
            return false;
        }
        if self.dev_mut().write(dp, poff, &parity) != 1 {
            self.failed_device = Some(dp);
            self.state = State::Degraded;
            return false;
        }
        true
    }

    /// DEGRADED-state write; dispatches on which role the failed device
    /// plays in this sector's stripe.
    fn write_degraded(&mut self, sector: u32, data: &[u8; SECTOR_SIZE]) -> bool {
        let (dd, doff) = addr::data_location(sector, self.n);
        let (dp, poff) = addr::parity_location(sector, self.n);
        let failed = self
            .failed_device
            .expect("DEGRADED state implies a failed device is recorded");

        if failed == dp {
            return self.dev_mut().write(dd, doff, data) == 1;
        }

        if failed == dd {
            let exclude = ExcludeSet::new().with(dd).with(dp);
            return match self.compute_parity_excluding(doff, exclude) {
                None => false,
                Some(mut parity) => {
                    xor_into(&mut parity, data);
                    self.dev_mut().write(dp, poff, &parity) == 1
                }
            };
        }

        // An unrelated device is failed: the new parity must account for
        // its unknown contents.
        let reconstructed = match self.compute_parity_excluding(doff, ExcludeSet::new().with(failed)) {
            None => return false,
            Some(v) => v,
        };
        let exclude = ExcludeSet::new().with(failed).with(dd).with(dp);
        let mut parity = match self.compute_parity_excluding(doff, exclude) {
            None => return false,
            Some(v) => v,
        };
        xor_into(&mut parity, data);
        xor_into(&mut parity, &reconstructed);

        if self.dev_mut().write(dd, doff, data) != 1 {
            return false;
        }
        self.dev_mut().write(dp, poff, &parity) == 1
    }

    fn compute_parity_excluding(&mut self, offset: u32, exclude: ExcludeSet) -> Option<[u8; SECTOR_SIZE]> {
        let mut acc = [0u8; SECTOR_SIZE];
        for dev in 0..self.n {
            if exclude.contains(dev) {
                continue;
            }
            let mut buf = [0u8; SECTOR_SIZE];
            if self.dev_mut().read(dev, offset, &mut buf) != 1 {
                return None;
            }
            xor_into(&mut acc, &buf);
        }
        Some(acc)
    }

    // ------------------------------------------------------------------
    // Shared bounds check
    // ------------------------------------------------------------------

    fn check_bounds(&self, sec_nr: u32, buf_len: usize, count: u32) -> Result<()> {
        let expected = count as usize * SECTOR_SIZE;
        if buf_len != expected {
            return Err(VolumeError::BufferSize {
                expected,
                actual: buf_len,
                count,
            });
        }
        let size = self.size();
        let end = sec_nr.checked_add(count).ok_or(VolumeError::OutOfRange {
            sector: sec_nr,
            count,
            size,
        })?;
        if end > size {
            return Err(VolumeError::OutOfRange {
                sector: sec_nr,
                count,
                size,
            });
        }
        Ok(())
    }
}

/// Test-only hooks for driving a [`Volume`] bound to the in-memory
/// [`MemoryDisk`] double. These exist so integration tests (and downstream
/// harnesses built on `test-util`) can simulate a device going bad without
/// reaching into the volume's private state.
#[cfg(feature = "test-util")]
impl Volume<device::test_util::MemoryDisk> {
    /// Simulate `device` going bad: arm fault injection on it so further
    /// I/O against it fails, and — if the volume is currently OK —
    /// immediately reflect the demotion a real failed read/write would
    /// cause. If already DEGRADED, only the fault injection is armed; the
    /// second-fault transition to FAILED is left to the normal read/write
    /// path, matching how the engine actually discovers it.
    pub fn fail_device_for_test(&mut self, device: usize) {
        self.dev_mut().fail_all(device);
        if self.state == State::Ok {
            self.state = State::Degraded;
            self.failed_device = Some(device);
        }
    }

    /// The device index the volume currently believes has failed.
    pub fn failed_device_for_test(&self) -> Option<usize> {
        self.failed_device
    }

    /// Simulate swapping in a blank replacement for the failed device ahead
    /// of a [`Volume::resync`].
    pub fn replace_failed_device_for_test(&mut self) {
        if let Some(d) = self.failed_device {
            let dev = self.dev_mut();
            dev.replace(d);
            dev.heal(d);
        }
    }

    /// Recover the bound device handle, e.g. to inspect or corrupt it
    /// between a `stop` and the next `start`.
    pub fn into_device_for_test(self) -> Option<device::test_util::MemoryDisk> {
        self.dev
    }
}
