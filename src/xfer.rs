//! Transfer Engine
//!
//! `Controller::xfer` performs one bounded read or write: it converts a
//! byte offset within a partition into an absolute block, programs the
//! registers, and blocks until the interrupt handler has moved every
//! sector (or failed). All iterative work happens in the interrupt handler.

use crate::controller::Controller;
use crate::drive::{Drive, Geometry, Partition, PowerState};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::regs::{reg, Command, RegisterIo, Status};
use crate::table::ReplacementTable;

// =============================================================================
// Addressing
// =============================================================================

/// Register-level address of a block: sector, cylinder and head registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// Sector register (1-based in CHS mode)
    pub sector: u8,
    /// Cylinder low/high registers
    pub cyl: u16,
    /// Head nibble of the drive/head register
    pub head: u8,
}

impl Address {
    /// Translate a logical block for `geo`
    pub fn from_block(geo: &Geometry, lblk: u32) -> Self {
        if geo.lba {
            Self {
                sector: (lblk & 0xFF) as u8,
                cyl: ((lblk >> 8) & 0xFFFF) as u16,
                head: ((lblk >> 24) & 0x0F) as u8,
            }
        } else {
            let per_cyl = geo.sectors * geo.heads;
            Self {
                sector: ((lblk % geo.sectors) + 1) as u8,
                cyl: (lblk / per_cyl) as u16,
                head: ((lblk / geo.sectors) % geo.heads) as u8,
            }
        }
    }

    /// Logical block this address refers to under `geo`
    pub fn to_block(&self, geo: &Geometry) -> u32 {
        if geo.lba {
            (self.head as u32) << 24 | (self.cyl as u32) << 8 | self.sector as u32
        } else {
            (self.cyl as u32 * geo.heads + self.head as u32) * geo.sectors + self.sector as u32 - 1
        }
    }
}

// =============================================================================
// Transfers
// =============================================================================

/// Everything a transfer needs to know about its destination.
///
/// Built from a snapshot of the drive state so the drive lock is not held
/// while waiting on the controller.
pub struct Target<'a> {
    pub drive: &'a Drive,
    pub geometry: &'a Geometry,
    pub partition: &'a Partition,
    pub repl: Option<&'a ReplacementTable>,
}

impl<R: RegisterIo, P: Platform> Controller<R, P> {
    /// Transfer sectors between `buf` and the partition at byte `offset`.
    ///
    /// At most `len` bytes, capped at one transfer buffer and at the whole
    /// sectors `buf` can hold, rounded up to whole sectors and clipped at the
    /// partition end. Returns bytes moved; 0 at or past the partition end.
    pub fn xfer(
        &self,
        target: &Target<'_>,
        cmd: Command,
        offset: u64,
        len: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let Target { drive, geometry: geo, partition: part, repl } = *target;
        if !drive.is_online() {
            return Err(Error::Offline);
        }
        let bytes = geo.bytes as usize;
        if bytes == 0 {
            return Err(Error::BadGeometry);
        }

        // cut transfer size down to disk buffer size
        let room = buf.len() / bytes * bytes;
        let len = len.min(self.config.max_xfer).min(room);
        let mut nsecs = len.div_ceil(bytes) as u32;
        if nsecs == 0 {
            return Ok(0);
        }

        // calculate physical address
        let Ok(start) = u32::try_from(offset / bytes as u64) else {
            return Ok(0);
        };
        let Some(lblk) = part.start.checked_add(start) else {
            return Ok(0);
        };
        if lblk >= part.end {
            return Ok(0);
        }
        nsecs = nsecs.min(part.end - lblk);
        let addr = Address::from_block(geo, lblk);
        let nbytes = nsecs as usize * bytes;

        log::debug!("ata: <{} {}>", if cmd == Command::Write { "W" } else { "R" }, lblk);

        let _inuse = self.acquire();
        self.settle();

        // Keep the clock tick from spinning the drive down under us
        drive.touch(self.platform.now_ms());
        self.cmd_ready_wait(drive)?;

        let max_loop = self.config.max_loop;
        let stat = self.with_regs(|s| {
            s.begin(cmd, drive.index(), nsecs as usize, bytes);
            if cmd == Command::Write {
                s.buf[..nbytes].copy_from_slice(&buf[..nbytes]);
            }
            s.program(geo.lba, nsecs as u8, addr, cmd);

            if cmd != Command::Write {
                return Ok(Status::empty());
            }
            self.platform.microdelay(1);
            let mut loops = 0;
            let stat = loop {
                let stat = s.io.status() & (Status::ERR | Status::DRQ);
                if !stat.is_empty() {
                    break stat;
                }
                loops += 1;
                if loops > max_loop {
                    s.complete();
                    return Err(self.wedge("ataxfer"));
                }
            };
            if stat.contains(Status::ERR) {
                s.fail();
            } else {
                s.io.outss(reg::DATA, &s.buf[..bytes]);
            }
            Ok(stat)
        });
        let stat = match stat {
            Ok(stat) => stat,
            Err(err) => {
                drive.set_online(false);
                return Err(err);
            }
        };
        if stat.contains(Status::ERR) {
            let error = self.with_regs(|s| s.error);
            return Err(Error::HardwareError { status: stat.bits(), error });
        }

        // Wait for the command to complete. A cancellation does not abandon
        // the disk mid-command: keep waiting, then report it.
        let mut notes = 0;
        loop {
            match self.wait(self.config.xfer_timeout_ms) {
                Ok(()) => break,
                Err(Error::Interrupted) => {
                    log::debug!("ata: interrupted ataxfer");
                    notes += 1;
                    if notes > self.config.cancel_retries {
                        log::error!("ata: disk error, giving up after {} notes", notes);
                        return Err(Error::Interrupted);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        drive.set_power(PowerState::Spinning);
        drive.touch(self.platform.now_ms());
        if notes > 0 {
            return Err(Error::Interrupted);
        }

        let (status, error, sofar, wedged) = self.with_regs(|s| (s.status, s.error, s.sofar, s.wedged));
        if wedged {
            drive.set_online(false);
            return Err(Error::Wedged);
        }
        if status.contains(Status::ERR) {
            log::error!(
                "ata: hd{} err: lblk {} status {:#04x}, err {:#04x}",
                drive.index(),
                lblk,
                status.bits(),
                error
            );
            log::debug!("ata:\tcyl {}, sec {}, head {}", addr.cyl, addr.sector, addr.head);
            log::debug!("ata:\tnsecs {}, sofar {}", nsecs, sofar);
            if let Some(repl) = repl {
                let bad = lblk + sofar as u32;
                if let Some(i) = repl.lookup(bad) {
                    log::warn!("ata: found bblk {} at offset {}", bad, i);
                }
            }
            return Err(Error::HardwareError { status: status.bits(), error });
        }

        let moved = sofar.min(nsecs as usize) * bytes;
        if cmd == Command::Read {
            self.with_regs(|s| buf[..moved].copy_from_slice(&s.buf[..moved]));
        }
        Ok(moved)
    }
}
