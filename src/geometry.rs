//! Geometry Discovery
//!
//! Ask the drive for its parameters, then make sure it isn't lying by
//! reading the last sector it claims to have. If that read fails, work the
//! geometry out by probing which addresses can be read.

use crate::config::SECTOR_SIZE;
use crate::controller::Controller;
use crate::drive::{Drive, Geometry};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::regs::RegisterIo;
use crate::xfer::Address;

/// Probe limits for the fallback search
const MAX_HEADS: u32 = 16;
const MAX_SECTORS: u32 = 128;
const MAX_CYL: u32 = 65536;
const CYL_STEP: u32 = 512;

/// What identification learned about a drive
#[derive(Debug, Clone)]
pub struct Params {
    pub geometry: Geometry,
    pub model: heapless::String<40>,
}

impl<R: RegisterIo, P: Platform> Controller<R, P> {
    /// Figure out the drive parameters
    pub fn params(&self, drive: &Drive) -> Result<Params> {
        let ident = self.identify(drive)?;
        let model = ident.model();
        let geometry = ident.geometry(SECTOR_SIZE as u32);
        log::debug!(
            "ata: hd{} ident lba={} cyl {} heads {} sectors {} model {:?}",
            drive.index(),
            geometry.lba,
            geometry.cyl,
            geometry.heads,
            geometry.sectors,
            model
        );

        if self.validate(drive, &geometry)? {
            return Ok(Params { geometry, model });
        }

        log::warn!("ata: hd{} misreported its geometry, probing", drive.index());
        let geometry = self.search(drive)?;
        log::debug!(
            "ata: hd{} probed cyl {} heads {} sectors {}",
            drive.index(),
            geometry.cyl,
            geometry.heads,
            geometry.sectors
        );
        Ok(Params { geometry, model })
    }

    /// Read the last sector of `geo`
    fn validate(&self, drive: &Drive, geo: &Geometry) -> Result<bool> {
        if geo.lba {
            if geo.sectors == 0 {
                return Ok(false);
            }
            return self.probe(drive, true, Address::from_block(geo, geo.sectors - 1));
        }
        // the drive/head register only holds 4 head bits; a larger head
        // count would alias onto low heads and the probe would succeed
        if geo.cyl == 0
            || geo.heads == 0
            || geo.heads > MAX_HEADS
            || geo.sectors == 0
            || geo.cyl > MAX_CYL
            || geo.sectors > 255
        {
            return Ok(false);
        }
        self.probe_chs(drive, geo.cyl - 1, geo.sectors, geo.heads - 1)
    }

    fn probe_chs(&self, drive: &Drive, cyl: u32, sector: u32, head: u32) -> Result<bool> {
        let addr = Address { sector: sector as u8, cyl: cyl as u16, head: head as u8 };
        self.probe(drive, false, addr)
    }

    /// Determine a CHS geometry by seeing which addresses can be read
    fn search(&self, drive: &Drive) -> Result<Geometry> {
        let mut heads = 0;
        while heads < MAX_HEADS && self.probe_chs(drive, 0, 1, heads)? {
            heads += 1;
        }
        let mut sectors = 0;
        while sectors < MAX_SECTORS && self.probe_chs(drive, 0, sectors + 1, 0)? {
            sectors += 1;
        }
        if heads == 0 || sectors == 0 {
            log::error!("ata: hd{} no readable sectors", drive.index());
            return Err(Error::BadGeometry);
        }

        // step out until a read fails, then narrow down
        let mut hi = CYL_STEP;
        while hi < MAX_CYL && self.probe_chs(drive, hi, sectors, heads - 1)? {
            hi += CYL_STEP;
        }
        let mut lo = hi - CYL_STEP;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.probe_chs(drive, mid, sectors, heads - 1)? {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        Ok(Geometry::chs(SECTOR_SIZE as u32, lo + 1, heads, sectors))
    }
}
