//! Drive Registry
//!
//! `Ata` owns the controller and the drives the equipment mask says are
//! present. It is the surface the file-system adapter talks to: attach,
//! byte-granular read/write on a partition, table refresh and enumeration.
//!
//! Lock order: drive lock, then controller. Transfers copy what they need
//! out of the drive state first, so a reader never holds the drive lock
//! while it waits for the controller.

use crate::config::Config;
use crate::controller::Controller;
use crate::drive::{Drive, DriveState, Geometry, Name, Partition, PowerState};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::regs::{Command, RegisterIo};
use crate::table::{
    PartitionTable, ReplacementTable, DISK_PARTITION, REPL_PARTITION, TABLE_PARTITION,
};
use crate::xfer::Target;
use spin::MutexGuard;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;

/// Drives per controller
pub const NDRIVE: usize = 2;

/// Enumeration entry for the file-system adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Volume prefix and partition name, e.g. `hd0disk`
    pub name: String,
    /// Length in bytes
    pub bytes: u64,
}

/// What a transfer needs from the drive state, copied out of the lock
struct Snapshot {
    geometry: Geometry,
    partition: Partition,
    repl: Option<ReplacementTable>,
}

/// An ATA controller and its drives
pub struct Ata<R, P> {
    pub(crate) controller: Controller<R, P>,
    pub(crate) drives: heapless::Vec<Drive, NDRIVE>,
}

impl<R: RegisterIo, P: Platform> Ata<R, P> {
    pub fn new(io: R, platform: P, config: Config) -> Result<Self> {
        config.validate()?;
        let mut drives = heapless::Vec::new();
        for index in config.drives_present() {
            let _ = drives.push(Drive::new(index));
        }
        Ok(Self {
            controller: Controller::new(io, platform, config),
            drives,
        })
    }

    pub fn controller(&self) -> &Controller<R, P> {
        &self.controller
    }

    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }

    pub fn drive(&self, drive: usize) -> Result<&Drive> {
        self.drives.get(drive).ok_or(Error::NoDrive)
    }

    fn lock_drive<'a>(&self, d: &'a Drive) -> MutexGuard<'a, DriveState> {
        d.lock_with(self.controller.platform())
    }

    /// Service a disk interrupt
    pub fn interrupt(&self) {
        self.controller.interrupt();
    }

    // -------------------------------------------------------------------------
    // Attach
    // -------------------------------------------------------------------------

    /// Attach every present drive. Returns how many came online.
    pub fn attach_all(&self) -> usize {
        let mut online = 0;
        for drive in 0..self.drives.len() {
            match self.attach(drive) {
                Ok(()) => online += 1,
                Err(err) => log::warn!("ata: hd{} attach failed: {}", drive, err),
            }
        }
        online
    }

    /// Identify a drive, enable read-ahead and read its partition table
    pub fn attach(&self, drive: usize) -> Result<()> {
        let d = self.drive(drive)?;
        let mut state = self.lock_drive(d);
        d.set_online(false);
        d.set_power(PowerState::Spinning);
        d.touch(self.controller.platform().now_ms());

        let params = self.controller.params(d)?;
        state.geometry = params.geometry;
        state.model = params.model;
        d.set_online(true);

        let read_ahead = self.controller.config().read_ahead;
        if let Err(err) = self.controller.set_buf(d, read_ahead) {
            log::warn!("ata: hd{} setbuf failed: {}", drive, err);
        }

        if let Err(err) = self.read_partitions(drive, d, &mut state) {
            d.set_online(false);
            return Err(err);
        }
        log::info!(
            "ata: hd{}: {:?} {} bytes, {} partitions",
            drive,
            state.model,
            state.geometry.cap,
            state.partitions.len()
        );
        Ok(())
    }

    /// Re-read the partition table, e.g. after it was rewritten
    pub fn refresh_partitions(&self, drive: usize) -> Result<()> {
        let d = self.drive(drive)?;
        if !d.is_online() {
            return Err(Error::Offline);
        }
        let mut state = self.lock_drive(d);
        self.read_partitions(drive, d, &mut state)
    }

    /// Called when a handle on a partition is closed.
    ///
    /// Closing the table partition after writing it reloads the table.
    pub fn close_partition(&self, drive: usize, partition: usize, wrote: bool) -> Result<()> {
        if !wrote {
            return Ok(());
        }
        let is_table = {
            let state = self.lock_drive(self.drive(drive)?);
            let p = state.partitions.get(partition).ok_or(Error::NoPartition)?;
            p.name.as_str() == TABLE_PARTITION
        };
        if is_table {
            self.refresh_partitions(drive)?;
        }
        Ok(())
    }

    /// Read the partition table.
    ///
    /// The table used to live in the last sector, which is special on some
    /// machines; newer disks use the second-last. Look in the last sector
    /// first and fall back if it has no table.
    fn read_partitions(&self, drive: usize, d: &Drive, state: &mut DriveState) -> Result<()> {
        let geometry = state.geometry;
        let total = geometry.total_sectors();
        if total < 2 {
            return Err(Error::BadGeometry);
        }

        state.vol = Name::new();
        let _ = write!(state.vol, "hd{}", drive);
        state.partitions.clear();
        state.repl = None;

        // we always have a partition for the whole disk
        // and one for the partition table
        let _ = state.partitions.push(Partition::new(DISK_PARTITION, 0, total));
        let _ = state.partitions.push(Partition::new(TABLE_PARTITION, total - 1, total));

        let mut sector = vec![0u8; geometry.bytes as usize];
        let table = state.partitions[1].clone();
        self.read_sector(d, &geometry, &table, &mut sector)?;
        if !PartitionTable::has_magic(&sector) {
            state.partitions[0].end -= 1;
            let table = &mut state.partitions[1];
            table.start -= 1;
            table.end -= 1;
            let table = table.clone();
            self.read_sector(d, &geometry, &table, &mut sector)?;
        }

        let disk_end = state.partitions[0].end;
        match PartitionTable::parse(&sector, disk_end) {
            Ok(parsed) => {
                if let Some(unit) = parsed.unit {
                    state.vol = unit;
                }
                for p in parsed.partitions {
                    let _ = state.partitions.push(p);
                }
            }
            Err(_) => log::warn!("ata: hd{} has no partition table", drive),
        }

        // initialise the bad-block replacement info
        let Some(index) = state
            .partitions
            .iter()
            .position(|p| p.name.as_str() == REPL_PARTITION)
        else {
            return Ok(());
        };
        let repl = state.partitions[index].clone();
        if repl.sectors() < ReplacementTable::MIN_SECTORS {
            log::debug!("ata: hd{} repl partition too small", drive);
            return Ok(());
        }
        self.read_sector(d, &geometry, &repl, &mut sector)?;
        match ReplacementTable::parse(index, &sector) {
            Ok(table) => {
                log::debug!("ata: hd{} {} replacement blocks", drive, table.blocks.len());
                state.repl = Some(table);
            }
            Err(_) => log::warn!("ata: hd{} bad replacement table", drive),
        }
        Ok(())
    }

    /// Read the first sector of `partition`
    fn read_sector(&self, d: &Drive, geometry: &Geometry, partition: &Partition, buf: &mut [u8]) -> Result<()> {
        let target = Target { drive: d, geometry, partition, repl: None };
        let len = buf.len();
        self.controller.xfer(&target, Command::Read, 0, len, buf)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Data Path
    // -------------------------------------------------------------------------

    fn snapshot(&self, drive: usize, partition: usize) -> Result<(&Drive, Snapshot)> {
        let d = self.drive(drive)?;
        if !d.is_online() {
            return Err(Error::Offline);
        }
        let state = self.lock_drive(d);
        let partition = state.partitions.get(partition).ok_or(Error::NoPartition)?.clone();
        let snap = Snapshot {
            geometry: state.geometry,
            partition,
            repl: state.repl.clone(),
        };
        Ok((d, snap))
    }

    /// Read `buf.len()` bytes at `offset` within a partition.
    ///
    /// Returns the bytes read; 0 at the end of the partition. A failure
    /// after some data was read returns the short count.
    pub fn read(&self, drive: usize, partition: usize, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let (d, snap) = self.snapshot(drive, partition)?;
        let target = Target {
            drive: d,
            geometry: &snap.geometry,
            partition: &snap.partition,
            repl: snap.repl.as_ref(),
        };
        let bytes = snap.geometry.bytes as usize;
        if bytes == 0 {
            return Err(Error::BadGeometry);
        }
        let mut chunk = vec![0u8; self.controller.config().max_xfer];

        let n = buf.len();
        let mut skip = (offset % bytes as u64) as usize;
        let mut rv = 0;
        while rv < n {
            let at = offset + rv as u64 - skip as u64;
            let got = match self.controller.xfer(&target, Command::Read, at, n - rv + skip, &mut chunk) {
                Ok(got) => got,
                Err(err) => return short(rv, err),
            };
            if got <= skip {
                break;
            }
            let i = (got - skip).min(n - rv);
            buf[rv..rv + i].copy_from_slice(&chunk[skip..skip + i]);
            rv += i;
            skip = 0;
        }
        Ok(rv)
    }

    /// Write `data` at `offset` within a partition.
    ///
    /// Sectors only partly covered by `data` are read, patched and written
    /// back. Returns the bytes written; 0 at the end of the partition.
    pub fn write(&self, drive: usize, partition: usize, offset: u64, data: &[u8]) -> Result<usize> {
        let (d, snap) = self.snapshot(drive, partition)?;
        let target = Target {
            drive: d,
            geometry: &snap.geometry,
            partition: &snap.partition,
            repl: snap.repl.as_ref(),
        };
        let bytes = snap.geometry.bytes as usize;
        if bytes == 0 {
            return Err(Error::BadGeometry);
        }
        let max_xfer = self.controller.config().max_xfer;
        let mut chunk = vec![0u8; max_xfer];
        let ctl = &self.controller;

        let mut n = data.len();
        let mut rv = 0;

        // not starting on a sector boundary: read in the first sector
        let partial = (offset % bytes as u64) as usize;
        if partial != 0 && n > 0 {
            let at = offset - partial as u64;
            if ctl.xfer(&target, Command::Read, at, bytes, &mut chunk)? == 0 {
                return Ok(0);
            }
            let i = (bytes - partial).min(n);
            chunk[partial..partial + i].copy_from_slice(&data[..i]);
            if ctl.xfer(&target, Command::Write, at, bytes, &mut chunk)? == 0 {
                return Ok(0);
            }
            rv = i;
        }

        // the full sectors
        let tail = (n - rv) % bytes;
        n -= tail;
        while rv < n {
            let i = (n - rv).min(max_xfer);
            chunk[..i].copy_from_slice(&data[rv..rv + i]);
            match ctl.xfer(&target, Command::Write, offset + rv as u64, i, &mut chunk) {
                Ok(0) => return Ok(rv),
                Ok(moved) => rv += moved.min(i),
                Err(err) => return short(rv, err),
            }
        }

        // not ending on a sector boundary: read in the last sector
        if tail != 0 {
            let at = offset + rv as u64;
            match ctl.xfer(&target, Command::Read, at, bytes, &mut chunk) {
                Ok(0) => return Ok(rv),
                Ok(_) => {}
                Err(err) => return short(rv, err),
            }
            chunk[..tail].copy_from_slice(&data[rv..rv + tail]);
            match ctl.xfer(&target, Command::Write, at, bytes, &mut chunk) {
                Ok(0) => return Ok(rv),
                Ok(_) => rv += tail,
                Err(err) => return short(rv, err),
            }
        }
        Ok(rv)
    }

    // -------------------------------------------------------------------------
    // Enumeration
    // -------------------------------------------------------------------------

    /// Partitions of an online drive, named with the volume prefix
    pub fn partitions(&self, drive: usize) -> Result<Vec<PartitionInfo>> {
        let d = self.drive(drive)?;
        if !d.is_online() {
            return Err(Error::Offline);
        }
        let state = self.lock_drive(d);
        let bytes = state.geometry.bytes as u64;
        Ok(state
            .partitions
            .iter()
            .map(|p| {
                let mut name = String::from(state.vol.as_str());
                name.push_str(&p.name);
                PartitionInfo { name, bytes: p.sectors() as u64 * bytes }
            })
            .collect())
    }

    /// Model string reported by the drive
    pub fn model(&self, drive: usize) -> Result<heapless::String<40>> {
        Ok(self.lock_drive(self.drive(drive)?).model.clone())
    }

    pub fn geometry(&self, drive: usize) -> Result<Geometry> {
        Ok(self.lock_drive(self.drive(drive)?).geometry)
    }

    /// Volume prefix, `hd<n>` unless the table names the unit
    pub fn volume(&self, drive: usize) -> Result<Name> {
        Ok(self.lock_drive(self.drive(drive)?).vol.clone())
    }
}

/// Keep data already moved; report the error only if there is none
fn short(moved: usize, err: Error) -> Result<usize> {
    if moved > 0 {
        log::warn!("ata: short transfer, {} bytes before {}", moved, err);
        Ok(moved)
    } else {
        Err(err)
    }
}
