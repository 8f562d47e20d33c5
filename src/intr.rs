//! Interrupt State Machine
//!
//! The asynchronous half of the transfer engine. Each disk interrupt moves
//! at most one sector between the data register and the controller buffer,
//! advances `sofar`, and hands the command back to the waiter when done.

use crate::config::WedgePolicy;
use crate::controller::{CmdState, Controller};
use crate::platform::Platform;
use crate::regs::{reg, Command, RegisterIo, Status};

/// What the handler decided about the waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// More interrupts to come
    Pending,
    /// Command finished (or failed); wake the waiter
    Wake,
}

impl<R: RegisterIo, P: Platform> Controller<R, P> {
    /// Service one disk interrupt. Called by the host kernel's handler.
    pub fn interrupt(&self) {
        let outcome = self.with_regs(|s| self.service(s));
        if outcome == Outcome::Wake {
            self.platform.wakeup();
        }
    }

    fn service(&self, s: &mut CmdState<R>) -> Outcome {
        let max_loop = self.config.max_loop;

        let mut loops = 0;
        s.status = s.io.status();
        while s.status.contains(Status::BUSY) {
            loops += 1;
            if loops > max_loop {
                return self.wedged(s, "ataintr: wait busy");
            }
            s.status = s.io.status();
        }

        let Some(cmd) = s.cmd else {
            log::warn!(
                "ata: weird disk interrupt, cmd=none, lastcmd={:?} status={:#04x}",
                s.last_cmd,
                s.status.bits()
            );
            return Outcome::Pending;
        };

        match cmd {
            Command::Write => {
                if s.status.contains(Status::ERR) {
                    s.fail();
                    return Outcome::Wake;
                }
                s.sofar += 1;
                if s.sofar >= s.nsecs {
                    s.complete();
                    return Outcome::Wake;
                }
                let mut loops = 0;
                while !s.io.status().contains(Status::DRQ) {
                    loops += 1;
                    if loops > max_loop {
                        return self.wedged(s, "ataintr: write");
                    }
                }
                let off = s.sofar * s.secsize;
                let Some(sector) = s.buf.get(off..off + s.secsize) else {
                    log::error!("ata: write past buffer, sofar {} nsecs {}", s.sofar, s.nsecs);
                    s.complete();
                    return Outcome::Wake;
                };
                s.io.outss(reg::DATA, sector);
                Outcome::Pending
            }
            Command::Read | Command::Ident => {
                let mut loops = 0;
                while !s.status.intersects(Status::ERR | Status::DRQ) {
                    loops += 1;
                    if loops > max_loop {
                        return self.wedged(s, "ataintr: read/ident");
                    }
                    s.status = s.io.status();
                }
                if s.status.contains(Status::ERR) {
                    s.fail();
                    return Outcome::Wake;
                }
                if s.sofar >= s.nsecs {
                    log::warn!("ata: ataintr {} {}", s.sofar + 1, s.nsecs);
                    s.complete();
                    return Outcome::Wake;
                }
                let off = s.sofar * s.secsize;
                let end = off + s.secsize;
                if end > s.buf.len() {
                    log::error!("ata: read past buffer, sofar {} nsecs {}", s.sofar, s.nsecs);
                    s.complete();
                    return Outcome::Wake;
                }
                s.io.inss(reg::DATA, &mut s.buf[off..end]);
                s.sofar += 1;
                if s.sofar < s.nsecs {
                    return Outcome::Pending;
                }
                if cmd == Command::Ident {
                    // one more interrupt follows identify
                    s.last_cmd = Some(cmd);
                    s.cmd = Some(Command::IdentDrain);
                } else {
                    s.complete();
                }
                Outcome::Wake
            }
            Command::IdentDrain => {
                s.complete();
                Outcome::Pending
            }
            cmd if cmd.is_single_shot() => {
                s.complete();
                Outcome::Wake
            }
            cmd => {
                log::warn!(
                    "ata: weird disk interrupt, cmd={:#04x}, lastcmd={:?} status={:#04x}",
                    cmd.code(),
                    s.last_cmd,
                    s.status.bits()
                );
                Outcome::Pending
            }
        }
    }

    /// A busy-wait inside the handler ran out
    fn wedged(&self, s: &mut CmdState<R>, what: &'static str) -> Outcome {
        log::error!(
            "ata: cmd={:?} status={:#04x}",
            s.cmd,
            s.io.inb(reg::STATUS)
        );
        match self.config.wedge_policy {
            WedgePolicy::Halt => panic!("{}", what),
            WedgePolicy::Isolate => {
                log::error!("ata: {}, isolating hd{}", what, s.drive);
                s.wedged = true;
                s.complete();
                Outcome::Wake
            }
        }
    }
}
