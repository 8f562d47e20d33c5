//! Simulated controller for host tests
//!
//! `Model` plays a two-drive ATA register file: PIO sectors with one
//! interrupt each, the extra interrupt after identify, misreported
//! geometry, and injectable faults. `SimPlatform` runs a virtual clock and
//! delivers pending interrupts while the caller sleeps, the way a kernel
//! would run the handler before waking the sleeper.

use crate::ata::Ata;
use crate::config::{Config, SECTOR_SIZE};
use crate::drive::Geometry;
use crate::error::{Error, Result};
use crate::ident;
use crate::platform::Platform;
use crate::regs::{reg, Command, RegisterIo, Status, DH_LBA};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

pub type SimAta = Ata<SimPorts, SimPlatform>;

/// Error register bits the model reports
const ERR_ABRT: u8 = 0x04;
const ERR_IDNF: u8 = 0x10;
const ERR_UNC: u8 = 0x40;

// =============================================================================
// Disks
// =============================================================================

/// One simulated drive. Sectors never written read back as zeros.
pub struct SimDisk {
    /// Geometry the medium really has
    pub geometry: Geometry,
    /// Geometry identify reports
    pub reported: Geometry,
    pub model: String,
    sectors: BTreeMap<u32, Vec<u8>>,
}

impl SimDisk {
    pub fn lba(sectors: u32) -> Self {
        let geometry = Geometry::lba(SECTOR_SIZE as u32, sectors);
        Self { geometry, reported: geometry, model: "SIM LBA DISK".into(), sectors: BTreeMap::new() }
    }

    pub fn chs(cyl: u32, heads: u32, sectors: u32) -> Self {
        let geometry = Geometry::chs(SECTOR_SIZE as u32, cyl, heads, sectors);
        Self { geometry, reported: geometry, model: "SIM CHS DISK".into(), sectors: BTreeMap::new() }
    }

    /// Report `reported` from identify instead of the real geometry
    pub fn lying(mut self, reported: Geometry) -> Self {
        self.reported = reported;
        self
    }

    /// Store `text` at the start of a block
    pub fn with_text(mut self, block: u32, text: &str) -> Self {
        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[..text.len()].copy_from_slice(text.as_bytes());
        self.sectors.insert(block, sector);
        self
    }

    pub fn total_sectors(&self) -> u32 {
        self.geometry.total_sectors()
    }

    fn read(&self, block: u32) -> Vec<u8> {
        self.sectors.get(&block).cloned().unwrap_or_else(|| vec![0u8; SECTOR_SIZE])
    }

    /// Decode the task file into a block, `None` if the address is invalid
    fn decode(&self, t: &TaskFile) -> Option<u32> {
        let g = &self.geometry;
        let cyl = (t.cyl_msb as u32) << 8 | t.cyl_lsb as u32;
        let head = (t.dh & 0x0F) as u32;
        let block = if t.dh & DH_LBA != 0 {
            head << 24 | cyl << 8 | t.sector as u32
        } else {
            if g.lba || t.sector == 0 || t.sector as u32 > g.sectors || head >= g.heads || cyl >= g.cyl {
                return None;
            }
            (cyl * g.heads + head) * g.sectors + t.sector as u32 - 1
        };
        (block < self.total_sectors()).then_some(block)
    }
}

// =============================================================================
// Register File
// =============================================================================

#[derive(Default)]
struct TaskFile {
    precomp: u8,
    count: u8,
    sector: u8,
    cyl_lsb: u8,
    cyl_msb: u8,
    dh: u8,
}

enum Phase {
    Idle,
    Read { drive: usize, block: u32, left: u32 },
    Write { drive: usize, block: u32, left: u32 },
    Ident,
}

/// Device side of the register file
pub struct Model {
    pub disks: [Option<SimDisk>; 2],
    task: TaskFile,
    status: Status,
    error: u8,
    phase: Phase,
    pio: Vec<u8>,
    pio_pos: usize,
    /// Interrupts raised and not yet delivered
    pub irqs: u32,
    /// Every command written, with the selected drive
    pub commands: Vec<(usize, u8)>,
    /// Last read-ahead setting per drive
    pub read_ahead: [Option<bool>; 2],
    /// Reading or writing this block fails
    pub fail_block: Option<u32>,
    /// Accept commands but never interrupt or move data
    pub silent: bool,
    /// Status reads busy forever
    pub busy: bool,
    /// The next command leaves the device busy with an interrupt pending
    pub wedge_next: bool,
    /// Identify is not followed by the extra interrupt
    pub no_ident_drain: bool,
}

impl Model {
    fn new(disks: [Option<SimDisk>; 2]) -> Self {
        Self {
            disks,
            task: TaskFile::default(),
            status: Status::READY | Status::SEEK,
            error: 0,
            phase: Phase::Idle,
            pio: Vec::new(),
            pio_pos: 0,
            irqs: 0,
            commands: Vec::new(),
            read_ahead: [None; 2],
            fail_block: None,
            silent: false,
            busy: false,
            wedge_next: false,
            no_ident_drain: false,
        }
    }

    fn ready(&mut self) {
        self.status = Status::READY | Status::SEEK;
    }

    fn raise(&mut self) {
        self.irqs += 1;
    }

    fn abort(&mut self, error: u8) {
        self.phase = Phase::Idle;
        self.status = Status::READY | Status::SEEK | Status::ERR;
        self.error = error;
        self.raise();
    }

    fn command(&mut self, code: u8) {
        let drive = ((self.task.dh >> 4) & 1) as usize;
        self.commands.push((drive, code));
        self.error = 0;
        self.pio.clear();
        self.pio_pos = 0;

        if self.wedge_next {
            self.wedge_next = false;
            self.busy = true;
            self.raise();
            return;
        }
        if self.disks[drive].is_none() {
            self.abort(ERR_ABRT);
            return;
        }
        if self.silent {
            self.ready();
            return;
        }

        let count = if self.task.count == 0 { 256 } else { self.task.count as u32 };
        match code {
            0x20 => match self.decode(drive) {
                Some(block) => {
                    self.phase = Phase::Read { drive, block, left: count };
                    self.load(drive, block);
                }
                None => self.abort(ERR_IDNF),
            },
            0x30 => match self.decode(drive) {
                Some(block) => {
                    self.phase = Phase::Write { drive, block, left: count };
                    self.status = Status::READY | Status::SEEK | Status::DRQ;
                }
                None => self.abort(ERR_IDNF),
            },
            0xEC => {
                self.pio = self.disks[drive]
                    .as_ref()
                    .map(|d| ident::build(&d.reported, &d.model).to_vec())
                    .unwrap_or_default();
                self.phase = Phase::Ident;
                self.status = Status::READY | Status::SEEK | Status::DRQ;
                self.raise();
            }
            0xEF => {
                self.read_ahead[drive] = Some(self.task.precomp == 0xAA);
                self.ready();
                self.raise();
            }
            0x91 | 0xE1 | 0xE2 | 0xE3 => {
                self.ready();
                self.raise();
            }
            _ => self.abort(ERR_ABRT),
        }
    }

    fn decode(&self, drive: usize) -> Option<u32> {
        self.disks[drive].as_ref()?.decode(&self.task)
    }

    /// Present `block` in the data register
    fn load(&mut self, drive: usize, block: u32) {
        if self.fail_block == Some(block) {
            self.abort(ERR_UNC);
            return;
        }
        let Some(disk) = &self.disks[drive] else {
            self.abort(ERR_ABRT);
            return;
        };
        self.pio = disk.read(block);
        self.pio_pos = 0;
        self.status = Status::READY | Status::SEEK | Status::DRQ;
        self.raise();
    }

    fn pull(&mut self, buf: &mut [u8]) {
        let end = (self.pio_pos + buf.len()).min(self.pio.len());
        let n = end.saturating_sub(self.pio_pos);
        buf[..n].copy_from_slice(&self.pio[self.pio_pos..end]);
        self.pio_pos = end;
        if self.pio_pos < SECTOR_SIZE {
            return;
        }
        match self.phase {
            Phase::Read { drive, block, left } => {
                if left <= 1 {
                    self.phase = Phase::Idle;
                    self.ready();
                } else {
                    self.phase = Phase::Read { drive, block: block + 1, left: left - 1 };
                    self.load(drive, block + 1);
                }
            }
            Phase::Ident => {
                self.phase = Phase::Idle;
                self.ready();
                if !self.no_ident_drain {
                    self.raise();
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, buf: &[u8]) {
        let Phase::Write { drive, block, left } = self.phase else {
            return;
        };
        self.pio.extend_from_slice(buf);
        if self.pio.len() < SECTOR_SIZE {
            return;
        }
        if self.fail_block == Some(block) {
            self.abort(ERR_UNC);
            return;
        }
        let sector = std::mem::take(&mut self.pio);
        if let Some(disk) = &mut self.disks[drive] {
            disk.sectors.insert(block, sector);
        }
        if left <= 1 {
            self.phase = Phase::Idle;
            self.ready();
        } else {
            self.phase = Phase::Write { drive, block: block + 1, left: left - 1 };
            self.status = Status::READY | Status::SEEK | Status::DRQ;
        }
        self.raise();
    }
}

/// Host side of the register file
pub struct SimPorts {
    model: Rc<RefCell<Model>>,
}

impl RegisterIo for SimPorts {
    fn inb(&mut self, r: u16) -> u8 {
        let m = self.model.borrow();
        match r {
            reg::STATUS if m.busy => Status::BUSY.bits(),
            reg::STATUS => m.status.bits(),
            reg::ERROR => m.error,
            reg::COUNT => m.task.count,
            reg::SECTOR => m.task.sector,
            reg::CYL_LSB => m.task.cyl_lsb,
            reg::CYL_MSB => m.task.cyl_msb,
            reg::DRIVE_HEAD => m.task.dh,
            _ => 0xFF,
        }
    }

    fn outb(&mut self, r: u16, value: u8) {
        let mut m = self.model.borrow_mut();
        match r {
            reg::PRECOMP => m.task.precomp = value,
            reg::COUNT => m.task.count = value,
            reg::SECTOR => m.task.sector = value,
            reg::CYL_LSB => m.task.cyl_lsb = value,
            reg::CYL_MSB => m.task.cyl_msb = value,
            reg::DRIVE_HEAD => m.task.dh = value,
            reg::COMMAND => m.command(value),
            _ => {}
        }
    }

    fn inss(&mut self, _r: u16, buf: &mut [u8]) {
        self.model.borrow_mut().pull(buf);
    }

    fn outss(&mut self, _r: u16, buf: &[u8]) {
        self.model.borrow_mut().push(buf);
    }
}

// =============================================================================
// Platform
// =============================================================================

type Handler = Rc<RefCell<Option<Box<dyn Fn()>>>>;

/// Virtual clock and interrupt delivery
pub struct SimPlatform {
    model: Rc<RefCell<Model>>,
    clock: Rc<Cell<u64>>,
    notes: Rc<Cell<u32>>,
    handler: Handler,
}

impl SimPlatform {
    fn take_irq(&self) -> bool {
        let mut m = self.model.borrow_mut();
        if m.irqs == 0 {
            return false;
        }
        m.irqs -= 1;
        true
    }
}

impl Platform for SimPlatform {
    fn now_ms(&self) -> u64 {
        // every look at the clock costs a millisecond, so polls terminate
        let now = self.clock.get() + 1;
        self.clock.set(now);
        now
    }

    fn microdelay(&self, _us: u32) {}

    fn sleep(&self, timeout_ms: u64, done: &dyn Fn() -> bool) -> Result<()> {
        let deadline = self.clock.get() + timeout_ms;
        loop {
            let notes = self.notes.get();
            if notes > 0 {
                self.notes.set(notes - 1);
                return Err(Error::Interrupted);
            }
            if done() {
                return Ok(());
            }
            if !self.take_irq() {
                self.clock.set(deadline.max(self.clock.get()));
                return Ok(());
            }
            if let Some(handler) = self.handler.borrow().as_ref() {
                handler();
            }
        }
    }

    fn wakeup(&self) {}

    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

// =============================================================================
// Test Handle
// =============================================================================

/// Test-side handle on the model and clock
pub struct Sim {
    model: Rc<RefCell<Model>>,
    clock: Rc<Cell<u64>>,
    notes: Rc<Cell<u32>>,
}

impl Sim {
    /// Build a driver over simulated drives 0 and 1
    pub fn new(config: Config, disks: [Option<SimDisk>; 2]) -> (Rc<SimAta>, Sim) {
        Sim::try_new(config, disks).expect("valid config")
    }

    pub fn try_new(config: Config, disks: [Option<SimDisk>; 2]) -> Result<(Rc<SimAta>, Sim)> {
        let model = Rc::new(RefCell::new(Model::new(disks)));
        let clock = Rc::new(Cell::new(0));
        let notes = Rc::new(Cell::new(0));
        let handler: Handler = Rc::new(RefCell::new(None));
        let platform = SimPlatform {
            model: model.clone(),
            clock: clock.clone(),
            notes: notes.clone(),
            handler: handler.clone(),
        };
        let ports = SimPorts { model: model.clone() };
        let ata = Rc::new(Ata::new(ports, platform, config)?);

        let weak = Rc::downgrade(&ata);
        *handler.borrow_mut() = Some(Box::new(move || {
            if let Some(ata) = weak.upgrade() {
                ata.interrupt();
            }
        }));
        Ok((ata, Sim { model, clock, notes }))
    }

    /// One drive, attached
    pub fn attached(config: Config, disk: SimDisk) -> (Rc<SimAta>, Sim) {
        let (ata, sim) = Sim::new(config, [Some(disk), None]);
        ata.attach(0).expect("attach");
        (ata, sim)
    }

    pub fn model(&self) -> std::cell::RefMut<'_, Model> {
        self.model.borrow_mut()
    }

    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    pub fn advance(&self, ms: u64) {
        self.clock.set(self.clock.get() + ms);
    }

    /// Cancel the next `n` sleeps
    pub fn post_notes(&self, n: u32) {
        self.notes.set(n);
    }

    pub fn notes(&self) -> u32 {
        self.notes.get()
    }

    /// Times `cmd` was written to the command register
    pub fn count(&self, cmd: Command) -> usize {
        self.model.borrow().commands.iter().filter(|&&(_, c)| c == cmd.code()).count()
    }

    pub fn sector(&self, drive: usize, block: u32) -> Vec<u8> {
        let m = self.model.borrow();
        m.disks[drive].as_ref().map(|d| d.read(block)).unwrap_or_default()
    }

    pub fn put_sector(&self, drive: usize, block: u32, data: &[u8]) {
        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[..data.len()].copy_from_slice(data);
        if let Some(disk) = &mut self.model.borrow_mut().disks[drive] {
            disk.sectors.insert(block, sector);
        }
    }
}
