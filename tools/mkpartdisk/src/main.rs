//! mkpartdisk - Partitioned Disk Image Tool
//!
//! Creates raw disk images carrying the ascii partition table the ata-disk
//! driver reads, and prints the table of an existing image.
//!
//! # Usage
//! ```text
//! mkpartdisk create disk.img --sectors 20480 --unit wren \
//!     --part boot:0:2048 --part repl:2048:2176 --part fs:2176:20000 --repl 4711
//! mkpartdisk show disk.img
//! ```
//!
//! # Image Layout
//!
//! ```text
//! Last sector (or second-last with --second-last):
//!   plan9 partitions
//!   unit <name>
//!   <name> <start> <end>
//!   ...
//!
//! First sector of the "repl" partition, if any blocks are given:
//!   block replacements
//!   <block>
//!   ...
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use ata_disk::drive::{NPART, make_name};
use ata_disk::table::{NREPL, REPL_PARTITION, NTABLE, parse_number};
use ata_disk::{Partition, PartitionTable, ReplacementTable, SECTOR_SIZE};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mkpartdisk", about = "Create and inspect partitioned ATA disk images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a zero-filled image with a partition table
    Create {
        #[arg(value_name = "FILE")]
        image: PathBuf,

        /// Image size in 512-byte sectors
        #[arg(long)]
        sectors: u32,

        /// Volume name recorded in the table
        #[arg(long, value_name = "NAME")]
        unit: Option<String>,

        /// Partition as NAME:START:END (sectors, END exclusive)
        #[arg(long = "part", value_name = "NAME:START:END", value_parser = parse_part)]
        parts: Vec<Partition>,

        /// Bad block for the replacement table (needs a "repl" partition)
        #[arg(long = "repl", value_name = "BLOCK", value_parser = parse_block)]
        repl: Vec<u32>,

        /// Put the table in the second-last sector
        #[arg(long, action = clap::ArgAction::SetTrue)]
        second_last: bool,
    },

    /// Print the partition table of an image
    Show {
        #[arg(value_name = "FILE")]
        image: PathBuf,
    },
}

fn parse_part(arg: &str) -> std::result::Result<Partition, String> {
    let fields: Vec<&str> = arg.split(':').collect();
    let [name, start, end] = fields[..] else {
        return Err(format!("expected NAME:START:END, got {:?}", arg));
    };
    if name.is_empty() || name.contains(' ') || name.contains('\n') {
        return Err(format!("bad partition name {:?}", name));
    }
    let start = parse_number(start).ok_or_else(|| format!("bad start {:?}", start))?;
    let end = parse_number(end).ok_or_else(|| format!("bad end {:?}", end))?;
    Ok(Partition::new(name, start, end))
}

fn parse_block(arg: &str) -> std::result::Result<u32, String> {
    match parse_number(arg) {
        Some(0) | None => Err(format!("bad block number {:?}", arg)),
        Some(block) => Ok(block),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Create { image, sectors, unit, parts, repl, second_last } => {
            let req = ImageRequest { sectors, unit, parts, repl, second_last };
            let data = build_image(&req)?;
            fs::write(&image, &data)
                .with_context(|| format!("Failed to write image: {}", image.display()))?;

            println!("Created: {}", image.display());
            println!("Image size: {} bytes ({} sectors)", data.len(), sectors);
            println!();
            print!("{}", describe(&read_layout(&data)?));
        }
        Command::Show { image } => {
            let data = fs::read(&image)
                .with_context(|| format!("Failed to read image: {}", image.display()))?;
            print!("{}", describe(&read_layout(&data)?));
        }
    }
    Ok(())
}

// =============================================================================
// Building
// =============================================================================

/// Everything `create` needs
#[derive(Debug, Clone, Default)]
struct ImageRequest {
    sectors: u32,
    unit: Option<String>,
    parts: Vec<Partition>,
    repl: Vec<u32>,
    second_last: bool,
}

/// Copy `text` to the start of sector `block`
fn put_text(image: &mut [u8], block: u32, text: &str) -> Result<()> {
    // the driver never looks at the final byte of a table sector
    if text.len() >= SECTOR_SIZE {
        bail!("table is {} bytes, a sector holds {}", text.len(), SECTOR_SIZE - 1);
    }
    let at = block as usize * SECTOR_SIZE;
    image[at..at + text.len()].copy_from_slice(text.as_bytes());
    Ok(())
}

fn build_image(req: &ImageRequest) -> Result<Vec<u8>> {
    if req.sectors < 2 {
        bail!("image needs at least 2 sectors");
    }
    if req.parts.len() > NTABLE {
        bail!("at most {} partitions fit next to disk and partition", NTABLE);
    }

    // the driver bounds every partition by the "disk" partition
    let (table_sector, disk_end) = if req.second_last {
        (req.sectors - 2, req.sectors - 1)
    } else {
        (req.sectors - 1, req.sectors)
    };

    let mut table = PartitionTable { unit: req.unit.as_deref().map(make_name), ..Default::default() };
    for p in &req.parts {
        if p.start > p.end || p.end > disk_end {
            bail!("partition {} [{}, {}) does not fit a {} sector disk", p.name, p.start, p.end, disk_end);
        }
        if table.partitions.push(p.clone()).is_err() {
            bail!("too many partitions");
        }
    }

    let mut image = vec![0u8; req.sectors as usize * SECTOR_SIZE];
    put_text(&mut image, table_sector, &table.format())?;

    // read it back the way the driver will
    let sector = &image[table_sector as usize * SECTOR_SIZE..][..SECTOR_SIZE];
    let parsed = PartitionTable::parse(sector, disk_end)?;
    if parsed != table {
        bail!("partition table does not survive parsing (name too long?)");
    }

    if !req.repl.is_empty() {
        let Some(repl) = table.partitions.iter().find(|p| p.name.as_str() == REPL_PARTITION) else {
            bail!("replacement blocks need a \"{}\" partition", REPL_PARTITION);
        };
        if repl.sectors() < ReplacementTable::MIN_SECTORS {
            bail!(
                "\"{}\" partition needs at least {} sectors, has {}",
                REPL_PARTITION,
                ReplacementTable::MIN_SECTORS,
                repl.sectors()
            );
        }
        if req.repl.len() > NREPL {
            bail!("at most {} replacement blocks", NREPL);
        }
        put_text(&mut image, repl.start, &ReplacementTable::format(&req.repl))?;
    }

    Ok(image)
}

// =============================================================================
// Reading
// =============================================================================

/// What the driver would find in an image
#[derive(Debug, Clone, PartialEq, Eq)]
struct Layout {
    sectors: u32,
    /// Sector holding the table
    table_sector: u32,
    table: Option<PartitionTable>,
    repl: Option<Vec<u32>>,
}

fn read_layout(image: &[u8]) -> Result<Layout> {
    let sectors = u32::try_from(image.len() / SECTOR_SIZE).context("image too large")?;
    if sectors < 2 {
        bail!("image is smaller than 2 sectors");
    }
    let sector = |block: u32| &image[block as usize * SECTOR_SIZE..][..SECTOR_SIZE];

    let (table_sector, disk_end) = if PartitionTable::has_magic(sector(sectors - 1)) {
        (sectors - 1, sectors)
    } else {
        (sectors - 2, sectors - 1)
    };
    let table = PartitionTable::parse(sector(table_sector), disk_end).ok();

    let repl = table.as_ref().and_then(|t| {
        let p = t.partitions.iter().find(|p| p.name.as_str() == REPL_PARTITION)?;
        if p.sectors() < ReplacementTable::MIN_SECTORS {
            return None;
        }
        // index as the driver numbers it, after disk and partition
        let index = NPART - NTABLE + t.partitions.iter().position(|q| q == p)?;
        let repl = ReplacementTable::parse(index, sector(p.start)).ok()?;
        Some(repl.blocks.to_vec())
    });

    Ok(Layout { sectors, table_sector, table, repl })
}

fn describe(layout: &Layout) -> String {
    let mut out = String::new();
    let Some(table) = &layout.table else {
        out.push_str("No partition table\n");
        return out;
    };
    let unit = table.unit.as_deref().unwrap_or("hd0");
    out.push_str(&format!("Table sector: {} of {}\n", layout.table_sector, layout.sectors));
    out.push_str(&format!("Unit: {}\n", unit));
    for p in &table.partitions {
        out.push_str(&format!(
            "  {}{:<20} {:>10} {:>10}  ({} KB)\n",
            unit,
            p.name,
            p.start,
            p.end,
            p.sectors() as u64 * SECTOR_SIZE as u64 / 1024
        ));
    }
    if let Some(blocks) = &layout.repl {
        let list: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
        out.push_str(&format!("Replacement blocks: {}\n", list.join(" ")));
    }
    out
}
