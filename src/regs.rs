//! ATA Register Interface
//!
//! Register offsets, status bits and command codes for the task-file
//! registers of a single ATA controller, plus the `RegisterIo` seam that
//! the transfer engine and interrupt handler drive.
//!
//! Callers always hold the controller's register lock while touching
//! a `RegisterIo`; the trait itself does no locking or error handling.

use bitflags::bitflags;

// =============================================================================
// Register Offsets (relative to the controller base port)
// =============================================================================

pub mod reg {
    pub const DATA: u16 = 0;        // Data port (16 bits)
    pub const ERROR: u16 = 1;       // Read: error
    pub const PRECOMP: u16 = 1;     // Write: buffer mode / features
    pub const COUNT: u16 = 2;       // Sector count
    pub const SECTOR: u16 = 3;      // Sector number / LBA 0-7
    pub const CYL_LSB: u16 = 4;     // Cylinder low / LBA 8-15
    pub const CYL_MSB: u16 = 5;     // Cylinder high / LBA 16-23
    pub const DRIVE_HEAD: u16 = 6;  // Drive/head / LBA 24-27
    pub const STATUS: u16 = 7;      // Read: status
    pub const COMMAND: u16 = 7;     // Write: command
}

/// Always or'd into the drive/head register
pub const DH_MAGIC: u8 = 0xA0;

/// Drive/head bit selecting LBA addressing
pub const DH_LBA: u8 = 1 << 6;

/// Precomp values for SetBuf
pub const READ_AHEAD_ON: u8 = 0xAA;
pub const READ_AHEAD_OFF: u8 = 0x55;

/// Build a drive/head register value
#[inline]
pub fn drive_head(drive: u8, lba: bool, head: u8) -> u8 {
    let mode = if lba { DH_LBA } else { 0 };
    DH_MAGIC | mode | ((drive & 1) << 4) | (head & 0x0F)
}

// =============================================================================
// Status Register Bits
// =============================================================================

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const BUSY  = 0x80;  // Drive busy
        const READY = 0x40;  // Drive ready
        const FAULT = 0x20;  // Drive fault
        const SEEK  = 0x10;  // Seek complete
        const DRQ   = 0x08;  // Data request - ready to transfer
        const CORR  = 0x04;  // Corrected data
        const INDEX = 0x02;  // Index mark
        const ERR   = 0x01;  // Error occurred
    }
}

impl Status {
    /// Raw register value, unknown bits included
    #[inline]
    pub fn from_reg(value: u8) -> Self {
        Self::from_bits_retain(value)
    }

    /// Drive is ready to accept a command
    #[inline]
    pub fn command_ready(self) -> bool {
        self.intersection(Status::READY | Status::BUSY) == Status::READY
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Command codes written to the command register.
///
/// `IdentDrain` is never sent to the device; the controller enters it after
/// identify data has been read because one more interrupt follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Read = 0x20,
    Write = 0x30,
    InitParams = 0x91,
    Idle = 0xE1,
    Standby = 0xE2,
    PowerDown = 0xE3,
    Ident = 0xEC,
    SetBuf = 0xEF,
    IdentDrain = 0xFF,
}

impl Command {
    /// Wire code
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Commands that finish with a single interrupt and move no data
    pub fn is_single_shot(self) -> bool {
        matches!(
            self,
            Command::InitParams
                | Command::SetBuf
                | Command::Idle
                | Command::Standby
                | Command::PowerDown
        )
    }
}

// =============================================================================
// Register Access
// =============================================================================

/// Port-level access to one controller's register file.
///
/// `reg` is an offset from [`reg`]. Sector transfers move `buf.len() / 2`
/// little-endian 16-bit words through the data register.
pub trait RegisterIo {
    /// Read a byte register
    fn inb(&mut self, reg: u16) -> u8;

    /// Write a byte register
    fn outb(&mut self, reg: u16, value: u8);

    /// Pull words from a 16-bit register into `buf`
    fn inss(&mut self, reg: u16, buf: &mut [u8]);

    /// Push words from `buf` to a 16-bit register
    fn outss(&mut self, reg: u16, buf: &[u8]);

    /// Read and decode the status register
    #[inline]
    fn status(&mut self) -> Status {
        Status::from_reg(self.inb(reg::STATUS))
    }
}

/// Legacy port I/O register file (x86).
#[cfg(target_arch = "x86_64")]
pub struct PortIo {
    base: u16,
}

#[cfg(target_arch = "x86_64")]
impl PortIo {
    /// # Safety
    ///
    /// `base` must be the base port of an ATA controller owned by the caller;
    /// nothing else may drive the same ports.
    pub const unsafe fn new(base: u16) -> Self {
        Self { base }
    }
}

#[cfg(target_arch = "x86_64")]
impl RegisterIo for PortIo {
    fn inb(&mut self, reg: u16) -> u8 {
        let mut port = x86_64::instructions::port::Port::<u8>::new(self.base + reg);
        unsafe { port.read() }
    }

    fn outb(&mut self, reg: u16, value: u8) {
        let mut port = x86_64::instructions::port::Port::<u8>::new(self.base + reg);
        unsafe { port.write(value) }
    }

    fn inss(&mut self, reg: u16, buf: &mut [u8]) {
        let mut port = x86_64::instructions::port::Port::<u16>::new(self.base + reg);
        for pair in buf.chunks_exact_mut(2) {
            let word = unsafe { port.read() };
            pair.copy_from_slice(&word.to_le_bytes());
        }
    }

    fn outss(&mut self, reg: u16, buf: &[u8]) {
        let mut port = x86_64::instructions::port::Port::<u16>::new(self.base + reg);
        for pair in buf.chunks_exact(2) {
            unsafe { port.write(u16::from_le_bytes([pair[0], pair[1]])) }
        }
    }
}
