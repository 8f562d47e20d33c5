//! ATA Disk Driver
//!
//! Interrupt-driven PIO driver for a two-drive ATA controller, with the
//! ascii partition and bad-block tables kept on the disk itself.
//!
//! The host kernel supplies register access ([`RegisterIo`]) and clock,
//! sleep and interrupt masking ([`Platform`]), routes the disk interrupt to
//! [`Ata::interrupt`] and the timer to [`Ata::clock_tick`]:
//!
//! ```ignore
//! let io = unsafe { PortIo::new(0x1F0) };
//! let ata = Ata::new(io, PitPlatform::new(10), Config::default())?;
//! ata.attach_all();
//! let n = ata.read(0, 0, offset, &mut buf)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Register interface and kernel seams
pub mod config;
pub mod error;
pub mod platform;
pub mod regs;

// Drive and controller model
pub mod controller;
pub mod drive;
pub mod ident;

// Engine
mod geometry;
mod intr;
pub mod xfer;

// Tables, power, registry
pub mod ata;
mod power;
pub mod table;

#[cfg(test)]
mod sim;

pub use ata::{Ata, PartitionInfo};
pub use config::{Config, WedgePolicy, SECTOR_SIZE};
pub use drive::{Drive, Geometry, Partition, PowerState};
pub use error::{Error, Result};
pub use geometry::Params;
pub use platform::{IrqLock, Platform};
pub use regs::{Command, RegisterIo, Status};
pub use table::{PartitionTable, ReplacementTable};

#[cfg(target_arch = "x86_64")]
pub use platform::PitPlatform;
#[cfg(target_arch = "x86_64")]
pub use regs::PortIo;
