//! Drive model
//!
//! One physical unit on the controller: geometry learned at attach, the
//! partition list read from disk, and the power bookkeeping shared with the
//! clock tick.
//!
//! `online`, the power state and the last-use time are atomics so the power
//! scheduler can read them from the timer interrupt. Geometry and partitions
//! live behind the drive lock.

use crate::platform::{lock_yielding, Platform};
use crate::table::ReplacementTable;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use spin::{Mutex, MutexGuard};

/// 8 sub partitions, disk, and partition
pub const NPART: usize = 8 + 2;

/// Longest partition or unit name
pub const NAMELEN: usize = 28;

pub type Name = heapless::String<NAMELEN>;

/// Build a name, truncating at `NAMELEN` bytes
pub fn make_name(s: &str) -> Name {
    let mut name = Name::new();
    for ch in s.chars() {
        if name.push(ch).is_err() {
            break;
        }
    }
    name
}

// =============================================================================
// Partitions
// =============================================================================

/// Contiguous sector range `[start, end)` of a drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: Name,
    pub start: u32,
    pub end: u32,
}

impl Partition {
    pub fn new(name: &str, start: u32, end: u32) -> Self {
        Self { name: make_name(name), start, end }
    }

    /// Length in sectors
    pub fn sectors(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Addressing parameters of a drive.
///
/// In LBA mode only `sectors` (total addressable sectors) is meaningful;
/// otherwise `cyl`/`heads`/`sectors` (per track) describe the CHS layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Bytes per sector
    pub bytes: u32,
    /// Drive has logical block addressing
    pub lba: bool,
    /// Sectors per track, or total sectors in LBA mode
    pub sectors: u32,
    /// Heads per cylinder
    pub heads: u32,
    /// Cylinders per drive
    pub cyl: u32,
    /// Total bytes
    pub cap: u64,
}

impl Geometry {
    /// LBA geometry for `sectors` addressable sectors
    pub fn lba(bytes: u32, sectors: u32) -> Self {
        Self {
            bytes,
            lba: true,
            sectors,
            heads: 0,
            cyl: 0,
            cap: bytes as u64 * sectors as u64,
        }
    }

    /// CHS geometry
    pub fn chs(bytes: u32, cyl: u32, heads: u32, sectors: u32) -> Self {
        Self {
            bytes,
            lba: false,
            sectors,
            heads,
            cyl,
            cap: bytes as u64 * cyl as u64 * heads as u64 * sectors as u64,
        }
    }

    /// Total addressable sectors
    pub fn total_sectors(&self) -> u32 {
        if self.bytes == 0 {
            return 0;
        }
        (self.cap / self.bytes as u64).min(u32::MAX as u64) as u32
    }
}

// =============================================================================
// Power State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    Spinning = 0,
    Standby = 1,
    Idle = 2,
    PowerDown = 3,
}

impl PowerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PowerState::Spinning,
            1 => PowerState::Standby,
            2 => PowerState::Idle,
            _ => PowerState::PowerDown,
        }
    }
}

// =============================================================================
// Drive
// =============================================================================

/// Fields protected by the drive lock
#[derive(Debug, Clone, Default)]
pub struct DriveState {
    pub geometry: Geometry,
    /// Display prefix, `hd<n>` unless the table renames it
    pub vol: Name,
    /// Model string from identify
    pub model: heapless::String<40>,
    pub partitions: heapless::Vec<Partition, NPART>,
    pub repl: Option<ReplacementTable>,
}

/// An ATA drive
pub struct Drive {
    index: u8,
    online: AtomicBool,
    power: AtomicU8,
    last_use: AtomicU64,
    state: Mutex<DriveState>,
}

impl Drive {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            online: AtomicBool::new(false),
            power: AtomicU8::new(PowerState::Spinning as u8),
            last_use: AtomicU64::new(0),
            state: Mutex::new(DriveState::default()),
        }
    }

    /// 0 (master) or 1 (slave)
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn power(&self) -> PowerState {
        PowerState::from_u8(self.power.load(Ordering::Acquire))
    }

    pub fn set_power(&self, state: PowerState) {
        self.power.store(state as u8, Ordering::Release);
    }

    /// Last time a command was started or finished, in ms
    pub fn last_use(&self) -> u64 {
        self.last_use.load(Ordering::Acquire)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_use.store(now_ms, Ordering::Release);
    }

    /// Take the drive lock
    pub fn lock(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock()
    }

    /// Take the drive lock, yielding to `platform` while attach or a table
    /// read holds it
    pub fn lock_with<P: Platform>(&self, platform: &P) -> MutexGuard<'_, DriveState> {
        lock_yielding(&self.state, platform)
    }
}
