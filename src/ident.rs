//! IDENTIFY parameter block (ANSI X3.221-1994 layout).

use crate::drive::Geometry;

/// Word offsets in the 256-word identify block
mod word {
    pub const CYLS: usize = 1;          // Default cylinders
    pub const HEADS: usize = 3;         // Default heads
    pub const S2T: usize = 6;           // Default sectors/track
    pub const MODEL: usize = 27;        // Model number, 20 words
    pub const CAPABILITIES: usize = 49;
    pub const CVALID: usize = 53;       // Bit 0: current geometry words valid
    pub const CCYLS: usize = 54;        // Current cylinders
    pub const CHEADS: usize = 55;       // Current heads
    pub const CS2T: usize = 56;         // Current sectors/track
    pub const LBASECS: usize = 60;      // LBA user addressable sectors, 2 words
}

/// Capability bit: drive supports LBA
const CAP_LBA: u16 = 1 << 9;

/// Decoded identify block
#[derive(Debug, Clone)]
pub struct Ident {
    words: [u16; 256],
}

impl Ident {
    /// Decode a 512-byte identify sector (little-endian words)
    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut words = [0u16; 256];
        for (w, pair) in words.iter_mut().zip(buf.chunks_exact(2)) {
            *w = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Self { words }
    }

    pub fn has_lba(&self) -> bool {
        self.words[word::CAPABILITIES] & CAP_LBA != 0
    }

    /// LBA user addressable sectors
    pub fn lba_sectors(&self) -> u32 {
        self.words[word::LBASECS] as u32 | (self.words[word::LBASECS + 1] as u32) << 16
    }

    /// Model string, byte-swapped and trimmed
    pub fn model(&self) -> heapless::String<40> {
        let mut raw = [0u8; 40];
        for i in 0..20 {
            let w = self.words[word::MODEL + i];
            raw[i * 2] = (w >> 8) as u8;
            raw[i * 2 + 1] = (w & 0xFF) as u8;
        }
        let mut model = heapless::String::new();
        let end = raw.iter().rposition(|&c| c != 0 && c != b' ').map(|i| i + 1).unwrap_or(0);
        for &c in &raw[..end] {
            let c = if c.is_ascii_graphic() || c == b' ' { c as char } else { '?' };
            let _ = model.push(c);
        }
        model
    }

    /// Geometry as reported by the drive.
    ///
    /// LBA drives report a flat sector count. Others report the current
    /// translation if marked valid, else the default one.
    pub fn geometry(&self, bytes: u32) -> Geometry {
        if self.has_lba() {
            return Geometry::lba(bytes, self.lba_sectors());
        }
        let w = &self.words;
        if w[word::CVALID] & 1 != 0 {
            Geometry::chs(bytes, w[word::CCYLS] as u32, w[word::CHEADS] as u32, w[word::CS2T] as u32)
        } else {
            Geometry::chs(bytes, w[word::CYLS] as u32, w[word::HEADS] as u32, w[word::S2T] as u32)
        }
    }
}

#[cfg(test)]
pub(crate) fn build(geometry: &Geometry, model: &str) -> [u8; 512] {
    let mut words = [0u16; 256];
    if geometry.lba {
        words[word::CAPABILITIES] = CAP_LBA;
        words[word::LBASECS] = geometry.sectors as u16;
        words[word::LBASECS + 1] = (geometry.sectors >> 16) as u16;
    } else {
        words[word::CYLS] = geometry.cyl as u16;
        words[word::HEADS] = geometry.heads as u16;
        words[word::S2T] = geometry.sectors as u16;
    }
    let bytes = model.as_bytes();
    for i in 0..20 {
        let hi = *bytes.get(i * 2).unwrap_or(&b' ') as u16;
        let lo = *bytes.get(i * 2 + 1).unwrap_or(&b' ') as u16;
        words[word::MODEL + i] = hi << 8 | lo;
    }
    let mut out = [0u8; 512];
    for (pair, w) in out.chunks_exact_mut(2).zip(words.iter()) {
        pair.copy_from_slice(&w.to_le_bytes());
    }
    out
}
