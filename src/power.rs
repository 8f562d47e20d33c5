//! Power Scheduler
//!
//! Spins idle drives down. The host kernel calls [`Ata::clock_tick`] from
//! its timer; the next transfer to a drive spins it back up.

use crate::ata::Ata;
use crate::drive::PowerState;
use crate::platform::Platform;
use crate::regs::RegisterIo;

impl<R: RegisterIo, P: Platform> Ata<R, P> {
    /// Put every drive idle for longer than the spindown time in standby
    pub fn clock_tick(&self) {
        let spindown = self.controller.config().spindown_secs;
        if spindown == 0 {
            return;
        }
        let now = self.controller.platform().now_ms();

        for drive in &self.drives {
            if !drive.is_online() || drive.power() != PowerState::Spinning {
                continue;
            }
            let idle = now.saturating_sub(drive.last_use());
            if idle < u64::from(spindown) * 1000 {
                continue;
            }
            // busy controllers are tried again on the next tick
            if self.controller.standby(drive) {
                log::debug!("ata: hd{} standby after {} ms idle", drive.index(), idle);
                drive.set_power(PowerState::Standby);
            }
        }
    }
}
