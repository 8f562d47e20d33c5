//! Controller model
//!
//! A controller drives up to two drives over one register file. Two locks
//! guard it:
//!
//! - `inuse`: held for a whole command (program, wait, collect). At most one
//!   command is in flight per controller.
//! - `regs`: interrupt-safe spinlock around the register file and the
//!   per-command progress (`CmdState`). Held only while programming
//!   registers and by the interrupt handler.
//!
//! `inuse` is always taken before `regs`. The active command in `CmdState`
//! is the only hand-off between the thread that issued a command and the
//! interrupt handler; `None` means idle.

use crate::config::{Config, WedgePolicy, SECTOR_SIZE};
use crate::drive::{Drive, PowerState};
use crate::error::{Error, Result};
use crate::ident::Ident;
use crate::platform::{lock_yielding, IrqLock, Platform};
use crate::regs::{self, reg, Command, RegisterIo, Status};
use crate::xfer::Address;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

// =============================================================================
// Command State
// =============================================================================

/// Progress of the active command, shared with the interrupt handler
pub(crate) struct CmdState<R> {
    pub io: R,
    /// Current command
    pub cmd: Option<Command>,
    /// Previous command (diagnostics)
    pub last_cmd: Option<Command>,
    /// Transfer buffer, `max_xfer` bytes
    pub buf: Vec<u8>,
    /// Length of the transfer in sectors
    pub nsecs: usize,
    /// Sectors transferred so far
    pub sofar: usize,
    /// Bytes per sector of the drive being accessed
    pub secsize: usize,
    /// Latched status
    pub status: Status,
    /// Latched error register
    pub error: u8,
    /// Drive being accessed
    pub drive: u8,
    /// A bounded busy-wait ran out (`WedgePolicy::Isolate`)
    pub wedged: bool,
}

impl<R: RegisterIo> CmdState<R> {
    /// Start a new command
    pub fn begin(&mut self, cmd: Command, drive: u8, nsecs: usize, secsize: usize) {
        self.cmd = Some(cmd);
        self.drive = drive;
        self.nsecs = nsecs;
        self.secsize = secsize;
        self.sofar = 0;
        self.status = Status::empty();
        self.error = 0;
        self.wedged = false;
    }

    /// Return to idle
    pub fn complete(&mut self) {
        self.last_cmd = self.cmd.take();
    }

    /// Latch the error register and return to idle
    pub fn fail(&mut self) {
        self.error = self.io.inb(reg::ERROR);
        self.complete();
    }

    /// Load the task-file registers and issue `cmd`
    pub fn program(&mut self, lba: bool, count: u8, addr: Address, cmd: Command) {
        let io = &mut self.io;
        io.outb(reg::COUNT, count);
        io.outb(reg::SECTOR, addr.sector);
        io.outb(reg::DRIVE_HEAD, regs::drive_head(self.drive, lba, addr.head));
        io.outb(reg::CYL_LSB, addr.cyl as u8);
        io.outb(reg::CYL_MSB, (addr.cyl >> 8) as u8);
        io.outb(reg::COMMAND, cmd.code());
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Shared hardware context for up to two drives
pub struct Controller<R, P> {
    pub(crate) config: Config,
    pub(crate) platform: P,
    /// Exclusive access to the controller
    inuse: Mutex<()>,
    /// Exclusive access to the registers
    pub(crate) regs: IrqLock<CmdState<R>>,
}

impl<R: RegisterIo, P: Platform> Controller<R, P> {
    pub fn new(io: R, platform: P, config: Config) -> Self {
        let buf = vec![0u8; config.max_xfer.max(SECTOR_SIZE)];
        Self {
            config,
            platform,
            inuse: Mutex::new(()),
            regs: IrqLock::new(CmdState {
                io,
                cmd: None,
                last_cmd: None,
                buf,
                nsecs: 0,
                sofar: 0,
                secsize: SECTOR_SIZE,
                status: Status::empty(),
                error: 0,
                drive: 0,
                wedged: false,
            }),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` under the register lock
    pub(crate) fn with_regs<T>(&self, f: impl FnOnce(&mut CmdState<R>) -> T) -> T {
        self.regs.with(&self.platform, f)
    }

    /// Take the controller for one command
    pub(crate) fn acquire(&self) -> spin::MutexGuard<'_, ()> {
        lock_yielding(&self.inuse, &self.platform)
    }

    /// Active command, `None` when idle
    pub fn active_command(&self) -> Option<Command> {
        self.with_regs(|s| s.cmd)
    }

    /// Previous command, for diagnostics
    pub fn last_command(&self) -> Option<Command> {
        self.with_regs(|s| s.last_cmd)
    }

    /// The waiter may proceed: idle, or only the post-identify interrupt left
    pub(crate) fn cmd_done(&self) -> bool {
        matches!(self.active_command(), None | Some(Command::IdentDrain))
    }

    /// A bounded busy-wait outside the interrupt handler ran out
    pub(crate) fn wedge(&self, what: &'static str) -> Error {
        match self.config.wedge_policy {
            WedgePolicy::Halt => panic!("{}", what),
            WedgePolicy::Isolate => {
                log::error!("ata: {}", what);
                Error::Wedged
            }
        }
    }

    /// Wait for the controller to be ready to accept a command.
    ///
    /// A drive that is not spinning gets two seconds to spin up. The caller
    /// sets the drive's last-use time first so the clock tick leaves it alone.
    pub(crate) fn cmd_ready_wait(&self, drive: &Drive) -> Result<()> {
        let period = if drive.power() == PowerState::Spinning {
            self.config.ready_spinning_ms
        } else {
            self.config.ready_spinup_ms
        };

        let start = self.platform.now_ms();
        while !self.with_regs(|s| s.io.status().command_ready()) {
            if self.platform.now_ms().wrapping_sub(start) > period {
                log::debug!("ata: cmdreadywait failed");
                return Err(Error::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Give a command nobody waits for (standby, or one whose waiter was
    /// cancelled) a bounded time to finish, then drop it.
    pub(crate) fn settle(&self) {
        if self.active_command().is_none() {
            return;
        }
        let _ = self.platform.sleep(self.config.ready_spinup_ms, &|| self.active_command().is_none());
        self.with_regs(|s| {
            if let Some(cmd) = s.cmd {
                log::warn!("ata: dropping stale cmd {:?}, status={:#04x}", cmd, s.io.inb(reg::STATUS));
                s.complete();
            }
        });
    }

    /// Sleep until the interrupt handler finishes the command
    pub(crate) fn wait(&self, ms: u64) -> Result<()> {
        self.platform.sleep(ms, &|| self.cmd_done())?;
        self.with_regs(|s| match s.cmd {
            None | Some(Command::IdentDrain) => Ok(()),
            Some(cmd) => {
                log::error!("ata: cmd {:#04x} timeout, status={:#04x}", cmd.code(), s.io.inb(reg::STATUS));
                s.complete();
                Err(Error::Timeout)
            }
        })
    }

    /// The interrupt handler gave up on the last command
    pub(crate) fn check_wedged(&self) -> Result<()> {
        if self.with_regs(|s| s.wedged) {
            return Err(Error::Wedged);
        }
        Ok(())
    }

    /// Read the drive's identify block
    pub fn identify(&self, drive: &Drive) -> Result<Ident> {
        let _inuse = self.acquire();
        self.settle();
        self.cmd_ready_wait(drive)?;

        self.with_regs(|s| {
            s.begin(Command::Ident, drive.index(), 1, SECTOR_SIZE);
            s.io.outb(reg::DRIVE_HEAD, regs::drive_head(drive.index(), false, 0));
            s.io.outb(reg::COMMAND, Command::Ident.code());
        });

        self.wait(self.config.cmd_timeout_ms)?;
        self.check_wedged()?;
        let (status, error) = self.with_regs(|s| (s.status, s.error));
        if status.contains(Status::ERR) {
            log::debug!("ata: bad disk ident status {:#04x}", status.bits());
            return Err(Error::HardwareError { status: status.bits(), error });
        }
        let ident = self.with_regs(|s| Ident::from_bytes(&s.buf[..SECTOR_SIZE]));

        // Identify is followed by one more interrupt; let it land while we
        // are quiet rather than during the next read or write.
        if self.active_command() == Some(Command::IdentDrain) {
            let _ = self.platform.sleep(self.config.ident_drain_ms, &|| self.active_command().is_none());
        }
        self.with_regs(|s| {
            if s.cmd.is_some() {
                s.complete();
            }
        });
        Ok(ident)
    }

    /// Read one sector at a raw register address to see if it exists
    pub fn probe(&self, drive: &Drive, lba: bool, addr: Address) -> Result<bool> {
        let _inuse = self.acquire();
        self.settle();
        self.cmd_ready_wait(drive)?;

        self.with_regs(|s| {
            s.begin(Command::Read, drive.index(), 1, SECTOR_SIZE);
            s.program(lba, 1, addr, Command::Read);
        });

        self.wait(self.config.cmd_timeout_ms)?;
        self.check_wedged()?;
        Ok(!self.with_regs(|s| s.status.contains(Status::ERR)))
    }

    /// Set read ahead mode
    pub fn set_buf(&self, drive: &Drive, on: bool) -> Result<()> {
        let _inuse = self.acquire();
        self.settle();
        self.cmd_ready_wait(drive)?;

        self.with_regs(|s| {
            s.begin(Command::SetBuf, drive.index(), 0, SECTOR_SIZE);
            let mode = if on { regs::READ_AHEAD_ON } else { regs::READ_AHEAD_OFF };
            s.io.outb(reg::PRECOMP, mode);
            s.io.outb(reg::DRIVE_HEAD, regs::drive_head(drive.index(), false, 0));
            s.io.outb(reg::COMMAND, Command::SetBuf.code());
        });

        self.wait(self.config.cmd_timeout_ms)?;
        let status = self.with_regs(|s| s.status);
        if status.contains(Status::ERR) {
            log::debug!("ata: hd{} setbuf err: status {:#04x}", drive.index(), status.bits());
        }
        Ok(())
    }

    /// Issue standby without waiting for it to finish.
    ///
    /// Returns false if the controller is busy; the clock tick tries again.
    pub fn standby(&self, drive: &Drive) -> bool {
        let Some(_inuse) = self.inuse.try_lock() else {
            return false;
        };
        self.with_regs(|s| {
            if s.cmd.is_some() {
                return false;
            }
            s.begin(Command::Standby, drive.index(), 0, SECTOR_SIZE);
            s.io.outb(reg::COUNT, 0);
            s.io.outb(reg::DRIVE_HEAD, regs::drive_head(drive.index(), false, 0));
            s.io.outb(reg::COMMAND, Command::Standby.code());
            true
        })
    }
}
