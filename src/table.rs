//! On-disk Partition and Replacement Tables
//!
//! Both tables are ascii, newline separated, one sector long:
//!
//! ```text
//! plan9 partitions            block replacements
//! unit hd0                    1234
//! boot 0 20                   0x2000
//! fs 20 1000000               ...
//! ```
//!
//! Partition records are `unit <name>` or `<name> <start> <end>`, fields
//! separated by spaces. Numbers take C literal prefixes (`0x` hex, leading
//! `0` octal). Parsing stops at the first malformed or out-of-range record
//! but keeps everything accepted before it.

use crate::drive::{make_name, Name, Partition, NPART};
use crate::error::{Error, Result};
use alloc::string::String;
use core::fmt::Write;

pub const PART_MAGIC: &str = "plan9 partitions";
pub const REPL_MAGIC: &str = "block replacements";

/// Maximum replacement blocks
pub const NREPL: usize = 64;

/// Synthetic partition covering the whole disk
pub const DISK_PARTITION: &str = "disk";
/// Synthetic partition covering the table sector
pub const TABLE_PARTITION: &str = "partition";
/// Partition whose first sector holds the replacement table
pub const REPL_PARTITION: &str = "repl";

/// Partitions that can come from the table (the rest are synthetic)
pub const NTABLE: usize = NPART - 2;

// =============================================================================
// Helpers
// =============================================================================

/// Text of a table sector: up to the first NUL, never the final byte
fn sector_text(sector: &[u8]) -> &str {
    let limit = sector.len().saturating_sub(1);
    let bytes = &sector[..limit];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
    }
}

/// Non-empty lines, at most `max`
fn lines(text: &str, max: usize) -> impl Iterator<Item = &str> {
    text.split('\n').filter(|line| !line.is_empty()).take(max)
}

/// Space separated fields
fn fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(' ').filter(|field| !field.is_empty())
}

/// Parse a C style unsigned literal: `0x1f`, `017`, `42`
pub fn parse_number(field: &str) -> Option<u32> {
    let (digits, radix) = if let Some(hex) = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        (hex, 16)
    } else if field.len() > 1 && field.starts_with('0') {
        (&field[1..], 8)
    } else {
        (field, 10)
    };
    if digits.is_empty() || digits.starts_with('+') {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

// =============================================================================
// Partition Table
// =============================================================================

/// Contents of a partition table sector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionTable {
    /// Replacement display prefix from a `unit` record
    pub unit: Option<Name>,
    pub partitions: heapless::Vec<Partition, NTABLE>,
}

impl PartitionTable {
    /// True if the sector starts with the partition magic line
    pub fn has_magic(sector: &[u8]) -> bool {
        lines(sector_text(sector), 1).next() == Some(PART_MAGIC)
    }

    /// Parse a table sector. `disk_end` bounds every partition.
    ///
    /// Fails with `MalformedTable` only when the magic line is missing.
    pub fn parse(sector: &[u8], disk_end: u32) -> Result<Self> {
        let text = sector_text(sector);
        let mut records = lines(text, NPART + 1);
        if records.next() != Some(PART_MAGIC) {
            return Err(Error::MalformedTable);
        }

        let mut table = PartitionTable::default();
        for line in records {
            let mut f = fields(line);
            match (f.next(), f.next(), f.next(), f.next()) {
                (Some("unit"), Some(name), None, None) => {
                    table.unit = Some(make_name(name));
                }
                (Some(name), Some(start), Some(end), None) => {
                    let (Some(start), Some(end)) = (parse_number(start), parse_number(end)) else {
                        log::warn!("ata: bad partition record {:?}", line);
                        break;
                    };
                    if start > end || end > disk_end {
                        log::warn!("ata: partition {} [{}, {}) out of range", name, start, end);
                        break;
                    }
                    if table.partitions.push(Partition::new(name, start, end)).is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
        Ok(table)
    }

    /// Render the table in its on-disk form
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(PART_MAGIC);
        out.push('\n');
        if let Some(unit) = &self.unit {
            let _ = writeln!(out, "unit {}", unit);
        }
        for p in &self.partitions {
            let _ = writeln!(out, "{} {} {}", p.name, p.start, p.end);
        }
        out
    }
}

// =============================================================================
// Replacement Table
// =============================================================================

/// Legacy bad-block list. Blocks are only reported, never remapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementTable {
    /// Index of the owning partition in the drive's list
    pub partition: usize,
    pub blocks: heapless::Vec<u32, NREPL>,
}

impl ReplacementTable {
    /// Smallest `repl` partition that may carry a table, in sectors
    pub const MIN_SECTORS: u32 = NREPL as u32 + 1;

    /// Parse the first sector of the `repl` partition
    pub fn parse(partition: usize, sector: &[u8]) -> Result<Self> {
        let text = sector_text(sector);
        let mut records = lines(text, NREPL + 1);
        if records.next() != Some(REPL_MAGIC) {
            return Err(Error::MalformedTable);
        }

        let mut blocks = heapless::Vec::new();
        for line in records {
            let Some(block) = fields(line).next().and_then(parse_number) else {
                break;
            };
            if block == 0 || blocks.push(block).is_err() {
                break;
            }
        }
        Ok(Self { partition, blocks })
    }

    /// Position of `block` in the table
    pub fn lookup(&self, block: u32) -> Option<usize> {
        self.blocks.iter().position(|&b| b == block)
    }

    /// Render a table in its on-disk form
    pub fn format(blocks: &[u32]) -> String {
        let mut out = String::new();
        out.push_str(REPL_MAGIC);
        out.push('\n');
        for block in blocks.iter().take(NREPL) {
            let _ = writeln!(out, "{}", block);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn sector(text: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[..text.len()].copy_from_slice(text.as_bytes());
        buf
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_number("20"), Some(20));
        assert_eq!(parse_number("0x1F"), Some(31));
        assert_eq!(parse_number("017"), Some(15));
        assert_eq!(parse_number("0"), Some(0));
        assert_eq!(parse_number("09"), None);
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("-5"), None);
        assert_eq!(parse_number("12abc"), None);
    }

    #[test]
    fn test_parse_table() {
        let buf = sector("plan9 partitions\nunit hd0\nbootpart 0 20\n");
        let table = PartitionTable::parse(&buf, 1000).unwrap();
        assert_eq!(table.unit.as_deref(), Some("hd0"));
        assert_eq!(table.partitions.len(), 1);
        assert_eq!(table.partitions[0], Partition::new("bootpart", 0, 20));
    }

    #[test]
    fn test_bad_record_truncates() {
        let buf = sector("plan9 partitions\nboot 0 20\nbootpart 30 20\nfs 40 50\n");
        let table = PartitionTable::parse(&buf, 1000).unwrap();
        assert_eq!(table.partitions.len(), 1);
        assert_eq!(table.partitions[0].name.as_str(), "boot");

        let buf = sector("plan9 partitions\nboot 0 2000\nfs 40 50\n");
        assert!(PartitionTable::parse(&buf, 1000).unwrap().partitions.is_empty());

        let buf = sector("plan9 partitions\nboot 0 zz\nfs 40 50\n");
        assert!(PartitionTable::parse(&buf, 1000).unwrap().partitions.is_empty());
    }

    #[test]
    fn test_missing_magic() {
        let buf = sector("not a table\nboot 0 20\n");
        assert_eq!(PartitionTable::parse(&buf, 1000), Err(Error::MalformedTable));
        assert!(!PartitionTable::has_magic(&buf));
        assert_eq!(PartitionTable::parse(&[0u8; 512], 1000), Err(Error::MalformedTable));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let buf = sector("plan9 partitions\nunit sd\nboot 0 20\nfs 0x20 0x400\n");
        let first = PartitionTable::parse(&buf, 2000).unwrap();
        let second = PartitionTable::parse(&buf, 2000).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.partitions[1], Partition::new("fs", 32, 1024));
    }

    #[test]
    fn test_table_capacity() {
        let mut text = String::from("plan9 partitions\n");
        for i in 0..12 {
            let _ = writeln!(text, "p{} {} {}", i, i, i + 1);
        }
        let table = PartitionTable::parse(&sector(&text), 100).unwrap();
        assert_eq!(table.partitions.len(), NTABLE);
    }

    #[test]
    fn test_format_parses_back() {
        let mut table = PartitionTable { unit: Some(make_name("wren")), ..Default::default() };
        let _ = table.partitions.push(Partition::new("boot", 0, 20));
        let _ = table.partitions.push(Partition::new("repl", 20, 100));
        let text = table.format();
        assert_eq!(text, "plan9 partitions\nunit wren\nboot 0 20\nrepl 20 100\n");
        assert_eq!(PartitionTable::parse(&sector(&text), 100).unwrap(), table);
    }

    #[test]
    fn test_replacement_table() {
        let buf = sector("block replacements\n100\n0x200\n7\n");
        let repl = ReplacementTable::parse(3, &buf).unwrap();
        assert_eq!(repl.partition, 3);
        assert_eq!(&repl.blocks[..], &[100, 512, 7]);
        assert_eq!(repl.lookup(512), Some(1));
        assert_eq!(repl.lookup(8), None);
    }

    #[test]
    fn test_replacement_stops_at_zero() {
        let buf = sector("block replacements\n100\n0\n200\n");
        let repl = ReplacementTable::parse(2, &buf).unwrap();
        assert_eq!(&repl.blocks[..], &[100]);

        let buf = sector("block replacements\n100\n-3\n200\n");
        assert_eq!(&ReplacementTable::parse(2, &buf).unwrap().blocks[..], &[100]);

        let buf = sector("block replacement\n100\n");
        assert_eq!(ReplacementTable::parse(2, &buf), Err(Error::MalformedTable));
    }

    #[test]
    fn test_replacement_format() {
        let text = ReplacementTable::format(&[5, 6]);
        assert_eq!(text, "block replacements\n5\n6\n");
    }

    #[test]
    fn test_text_stops_at_last_byte() {
        // The final byte of the sector is never part of the table
        let mut buf = vec![b'x'; 16];
        buf[..PART_MAGIC.len()].copy_from_slice(PART_MAGIC.as_bytes());
        assert!(!PartitionTable::has_magic(&buf));
        let mut buf = vec![0u8; 18];
        buf[..PART_MAGIC.len()].copy_from_slice(PART_MAGIC.as_bytes());
        assert!(PartitionTable::has_magic(&buf));
    }
}
