//! Driver configuration
//!
//! Defaults match a single PC-style controller at 0x1F0/IRQ 14 with one
//! drive attached.

use crate::error::{Error, Result};

/// Bytes per sector assumed before identification
pub const SECTOR_SIZE: usize = 512;

/// What to do when a bounded hardware busy-wait is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WedgePolicy {
    /// Panic; a stuck device takes the whole system down
    Halt,
    /// Fail the transfer with `Error::Wedged` and take the drive offline
    Isolate,
}

/// Controller and timing configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base I/O port of the register file
    pub port: u16,
    /// Interrupt line (reported to the host kernel, not used internally)
    pub irq: u8,
    /// Equipment mask: high nibble = drive 0 present, low nibble = drive 1
    pub equipment: u8,
    /// Idle seconds before a spinning drive is put in standby (0 = never)
    pub spindown_secs: u32,
    /// Enable drive read-ahead after identification
    pub read_ahead: bool,
    /// Largest single command, in bytes
    pub max_xfer: usize,
    /// Completion wait for read/write commands
    pub xfer_timeout_ms: u64,
    /// Completion wait for identify, probe and set-buffer
    pub cmd_timeout_ms: u64,
    /// Command-ready wait when the drive is already spinning
    pub ready_spinning_ms: u64,
    /// Command-ready wait when the drive may need to spin up
    pub ready_spinup_ms: u64,
    /// Cancellations tolerated while a transfer is in flight
    pub cancel_retries: u32,
    /// Iteration bound for status busy-waits
    pub max_loop: u32,
    /// How long to wait for the interrupt that follows identify
    pub ident_drain_ms: u64,
    pub wedge_policy: WedgePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0x1F0,
            irq: 14,
            equipment: 0x10,
            spindown_secs: 1,
            read_ahead: true,
            max_xfer: 4096,
            xfer_timeout_ms: 3000,
            cmd_timeout_ms: 5000,
            ready_spinning_ms: 10,
            ready_spinup_ms: 2000,
            cancel_retries: 10,
            max_loop: 10_000,
            ident_drain_ms: 10,
            wedge_policy: WedgePolicy::Halt,
        }
    }
}

impl Config {
    /// Check the values the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.equipment == 0 {
            return Err(Error::BadConfig);
        }
        if self.max_xfer == 0
            || self.max_xfer % SECTOR_SIZE != 0
            || self.max_xfer / SECTOR_SIZE > 255
        {
            return Err(Error::BadConfig);
        }
        if self.max_loop == 0 {
            return Err(Error::BadConfig);
        }
        Ok(())
    }

    /// Drive indices present according to the equipment mask
    pub fn drives_present(&self) -> impl Iterator<Item = u8> {
        let mask = self.equipment;
        [(0u8, mask & 0xF0 != 0), (1u8, mask & 0x0F != 0)]
            .into_iter()
            .filter(|&(_, present)| present)
            .map(|(drive, _)| drive)
    }
}
