// DOS/MBR partition tables
//
// Layout (per 512-byte table sector):
//   0x1BE  four 16-byte entries: boot flag @0, type @4, start LBA @8, sectors @12
//   0x1FE  signature 0x55 0xAA
// Extended partitions (0x05, 0x0F, 0x85) chain further tables; logical
// partition starts are relative to their table, chained table starts are
// relative to the first extended partition.

use std::collections::HashSet;
use tracing::{debug, trace, warn};

use super::{PartitionFlags, PartitionInfo, VolumeDecoder, VolumeSystem, VolumeSystemInfo};
use crate::common::binary::le_u32;
use crate::error::EngineResult;
use crate::image::ImageReader;

const TABLE_SIZE: usize = 512;
const ENTRY_TABLE_OFFSET: usize = 0x1BE;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 0x1FE;

/// Corrupt or looping chains are cut off after this many extended tables
const MAX_EXTENDED_TABLES: usize = 128;

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    boot_flag: u8,
    part_type: u8,
    start: u32,
    sectors: u32,
}

impl TableEntry {
    fn is_empty(&self) -> bool {
        self.part_type == 0 || self.sectors == 0
    }

    fn is_extended(&self) -> bool {
        matches!(self.part_type, 0x05 | 0x0F | 0x85)
    }
}

fn partition_type_name(part_type: u8) -> &'static str {
    match part_type {
        0x01 => "DOS FAT12",
        0x04 | 0x06 | 0x0E => "DOS FAT16",
        0x05 => "DOS Extended",
        0x07 => "NTFS / exFAT",
        0x0B | 0x0C => "Win95 FAT32",
        0x0F => "Win95 Extended",
        0x82 => "Linux Swap",
        0x83 => "Linux",
        0x85 => "Linux Extended",
        0x8E => "Linux Logical Volume Manager",
        0xA5 => "FreeBSD",
        0xAF => "Mac OS X HFS",
        0xEE => "GPT Safety Partition",
        0xEF => "EFI System Partition",
        _ => "Unknown Type",
    }
}

fn describe(part_type: u8) -> String {
    format!("{} (0x{:02x})", partition_type_name(part_type), part_type)
}

/// Read one table sector; `None` when short or unsigned
fn read_table(image: &dyn ImageReader, offset: u64) -> EngineResult<Option<[TableEntry; 4]>> {
    let mut sector = [0u8; TABLE_SIZE];
    if image.read_at(offset, &mut sector)? < TABLE_SIZE {
        return Ok(None);
    }
    if sector[SIGNATURE_OFFSET] != 0x55 || sector[SIGNATURE_OFFSET + 1] != 0xAA {
        return Ok(None);
    }

    let mut entries = [TableEntry {
        boot_flag: 0,
        part_type: 0,
        start: 0,
        sectors: 0,
    }; 4];
    for (i, entry) in entries.iter_mut().enumerate() {
        let base = ENTRY_TABLE_OFFSET + i * ENTRY_SIZE;
        *entry = TableEntry {
            boot_flag: sector[base],
            part_type: sector[base + 4],
            start: le_u32(&sector, base + 8)?,
            sectors: le_u32(&sector, base + 12)?,
        };
    }
    Ok(Some(entries))
}

/// DOS partition table decoder
#[derive(Debug, Default, Clone, Copy)]
pub struct DosVolumeDecoder;

impl DosVolumeDecoder {
    pub fn new() -> Self {
        DosVolumeDecoder
    }
}

struct DosVolumeSystem {
    info: VolumeSystemInfo,
    partitions: Vec<PartitionInfo>,
}

impl VolumeSystem for DosVolumeSystem {
    fn info(&self) -> &VolumeSystemInfo {
        &self.info
    }

    fn partitions(&self) -> EngineResult<Vec<PartitionInfo>> {
        Ok(self.partitions.clone())
    }
}

impl VolumeDecoder for DosVolumeDecoder {
    fn name(&self) -> &str {
        "dos"
    }

    fn open<'i>(
        &self,
        image: &'i dyn ImageReader,
        offset: u64,
    ) -> EngineResult<Option<Box<dyn VolumeSystem + 'i>>> {
        let Some(primary) = read_table(image, offset)? else {
            return Ok(None);
        };

        // Boot sectors of FAT/NTFS also end in 0x55AA; their code bytes
        // rarely look like valid boot flags
        if primary.iter().any(|e| e.boot_flag != 0x00 && e.boot_flag != 0x80) {
            trace!(offset, "Invalid boot flag, not a DOS partition table");
            return Ok(None);
        }
        if primary.iter().all(TableEntry::is_empty) {
            trace!(offset, "Empty DOS partition table");
            return Ok(None);
        }

        let block_size = image.sector_size().max(1);
        let info = VolumeSystemInfo {
            vs_type: self.name().to_string(),
            offset,
            block_size,
        };
        let image_blocks = image.size().saturating_sub(offset) / block_size as u64;

        let mut found = vec![PartitionInfo {
            index: 0,
            start: 0,
            len: 1,
            description: "Primary Table (#0)".to_string(),
            flags: PartitionFlags::METADATA,
        }];

        for entry in primary.iter().filter(|e| !e.is_empty()) {
            if entry.is_extended() {
                found.push(PartitionInfo {
                    index: 0,
                    start: entry.start as u64,
                    len: entry.sectors as u64,
                    description: describe(entry.part_type),
                    flags: PartitionFlags::METADATA,
                });
                walk_extended_chain(image, &info, entry.start as u64, &mut found)?;
            } else {
                found.push(PartitionInfo {
                    index: 0,
                    start: entry.start as u64,
                    len: entry.sectors as u64,
                    description: describe(entry.part_type),
                    flags: PartitionFlags::ALLOCATED,
                });
            }
        }

        let partitions = finalize_partitions(found, image_blocks);
        debug!(offset, partitions = partitions.len(), "Opened DOS volume system");
        Ok(Some(Box::new(DosVolumeSystem { info, partitions })))
    }
}

/// Follow extended tables starting at `ext_base` (blocks, relative to the volume system)
fn walk_extended_chain(
    image: &dyn ImageReader,
    info: &VolumeSystemInfo,
    ext_base: u64,
    found: &mut Vec<PartitionInfo>,
) -> EngineResult<()> {
    let mut visited = HashSet::new();
    let mut table_addr = ext_base;

    for table_no in 1..=MAX_EXTENDED_TABLES {
        if !visited.insert(table_addr) {
            warn!(table_addr, "Extended partition chain loops, stopping");
            return Ok(());
        }
        let table_offset = info.offset + table_addr * info.block_size as u64;
        let Some(entries) = read_table(image, table_offset)? else {
            warn!(table_addr, "Extended partition table unreadable or unsigned, stopping chain");
            return Ok(());
        };
        found.push(PartitionInfo {
            index: 0,
            start: table_addr,
            len: 1,
            description: format!("Extended Table (#{})", table_no),
            flags: PartitionFlags::METADATA,
        });

        let mut next = None;
        for entry in entries.iter().filter(|e| !e.is_empty()) {
            if entry.is_extended() {
                if next.is_none() {
                    next = Some(ext_base + entry.start as u64);
                }
            } else {
                found.push(PartitionInfo {
                    index: 0,
                    start: table_addr + entry.start as u64,
                    len: entry.sectors as u64,
                    description: describe(entry.part_type),
                    flags: PartitionFlags::ALLOCATED,
                });
            }
        }

        match next {
            Some(addr) => table_addr = addr,
            None => return Ok(()),
        }
    }
    warn!(limit = MAX_EXTENDED_TABLES, "Too many extended partition tables, stopping chain");
    Ok(())
}

/// Sort by start, fill space not covered by any entry with unallocated
/// entries and assign indices
fn finalize_partitions(mut found: Vec<PartitionInfo>, image_blocks: u64) -> Vec<PartitionInfo> {
    found.sort_by_key(|p| (p.start, p.flags.contains(PartitionFlags::ALLOCATED)));

    let mut gaps = Vec::new();
    let mut next_free = 0u64;
    for part in &found {
        if part.start > next_free {
            gaps.push(unallocated(next_free, part.start - next_free));
        }
        next_free = next_free.max(part.start.saturating_add(part.len));
    }
    if image_blocks > next_free {
        gaps.push(unallocated(next_free, image_blocks - next_free));
    }

    found.extend(gaps);
    found.sort_by_key(|p| (p.start, p.flags.contains(PartitionFlags::ALLOCATED)));
    for (index, part) in found.iter_mut().enumerate() {
        part.index = index as u32;
    }
    found
}

fn unallocated(start: u64, len: u64) -> PartitionInfo {
    PartitionInfo {
        index: 0,
        start,
        len,
        description: "Unallocated".to_string(),
        flags: PartitionFlags::UNALLOCATED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;

    fn write_entry(sector: &mut [u8], table_offset: usize, slot: usize, part_type: u8, start: u32, sectors: u32) {
        let base = table_offset + ENTRY_TABLE_OFFSET + slot * ENTRY_SIZE;
        sector[base + 4] = part_type;
        sector[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
        sector[base + 12..base + 16].copy_from_slice(&sectors.to_le_bytes());
    }

    fn sign(disk: &mut [u8], table_offset: usize) {
        disk[table_offset + SIGNATURE_OFFSET] = 0x55;
        disk[table_offset + SIGNATURE_OFFSET + 1] = 0xAA;
    }

    #[test]
    fn test_primary_partitions_and_gaps() {
        let mut disk = vec![0u8; 512 * 200];
        write_entry(&mut disk, 0, 0, 0x83, 100, 50);
        write_entry(&mut disk, 0, 1, 0x07, 10, 40);
        sign(&mut disk, 0);
        let image = MemoryImage::new(disk);

        let vs = DosVolumeDecoder::new().open(&image, 0).unwrap().unwrap();
        assert_eq!(vs.info().vs_type, "dos");
        assert_eq!(vs.info().block_size, 512);

        let parts = vs.partitions().unwrap();
        let layout: Vec<(u64, u64, PartitionFlags)> = parts.iter().map(|p| (p.start, p.len, p.flags)).collect();
        assert_eq!(
            layout,
            vec![
                (0, 1, PartitionFlags::METADATA),
                (1, 9, PartitionFlags::UNALLOCATED),
                (10, 40, PartitionFlags::ALLOCATED),
                (50, 50, PartitionFlags::UNALLOCATED),
                (100, 50, PartitionFlags::ALLOCATED),
                (150, 50, PartitionFlags::UNALLOCATED),
            ]
        );
        assert_eq!(parts[2].description, "NTFS / exFAT (0x07)");
        assert!(parts.iter().enumerate().all(|(i, p)| p.index == i as u32));
    }

    #[test]
    fn test_extended_chain() {
        let mut disk = vec![0u8; 512 * 400];
        write_entry(&mut disk, 0, 0, 0x0B, 1, 99);
        write_entry(&mut disk, 0, 1, 0x05, 100, 300);
        sign(&mut disk, 0);
        // first extended table at block 100: logical at 100+1, next table at 100+150
        write_entry(&mut disk, 100 * 512, 0, 0x83, 1, 99);
        write_entry(&mut disk, 100 * 512, 1, 0x05, 150, 150);
        sign(&mut disk, 100 * 512);
        // second table at block 250: logical at 250+1
        write_entry(&mut disk, 250 * 512, 0, 0x82, 1, 149);
        sign(&mut disk, 250 * 512);
        let image = MemoryImage::new(disk);

        let vs = DosVolumeDecoder::new().open(&image, 0).unwrap().unwrap();
        let parts = vs.partitions().unwrap();

        let allocated: Vec<(u64, &str)> = parts
            .iter()
            .filter(|p| p.is_allocated())
            .map(|p| (p.start, p.description.as_str()))
            .collect();
        assert_eq!(
            allocated,
            vec![(1, "Win95 FAT32 (0x0b)"), (101, "Linux (0x83)"), (251, "Linux Swap (0x82)")]
        );
        let tables: Vec<&str> = parts
            .iter()
            .filter(|p| p.description.contains("Table"))
            .map(|p| p.description.as_str())
            .collect();
        assert_eq!(tables, vec!["Primary Table (#0)", "Extended Table (#1)", "Extended Table (#2)"]);
        assert!(parts.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn test_looping_chain_terminates() {
        let mut disk = vec![0u8; 512 * 64];
        write_entry(&mut disk, 0, 0, 0x05, 8, 56);
        sign(&mut disk, 0);
        // table points back at itself
        write_entry(&mut disk, 8 * 512, 0, 0x83, 1, 4);
        write_entry(&mut disk, 8 * 512, 1, 0x05, 0, 56);
        sign(&mut disk, 8 * 512);
        let image = MemoryImage::new(disk);

        let vs = DosVolumeDecoder::new().open(&image, 0).unwrap().unwrap();
        let logical = vs.partitions().unwrap().into_iter().filter(|p| p.is_allocated()).count();
        assert_eq!(logical, 1);
    }

    #[test]
    fn test_rejects_non_tables() {
        let decoder = DosVolumeDecoder::new();

        // no signature
        let image = MemoryImage::new(vec![0u8; 1024]);
        assert!(decoder.open(&image, 0).unwrap().is_none());

        // signed but empty
        let mut disk = vec![0u8; 1024];
        sign(&mut disk, 0);
        assert!(decoder.open(&MemoryImage::new(disk.clone()), 0).unwrap().is_none());

        // boot sector code in the boot flag position
        write_entry(&mut disk, 0, 0, 0x83, 1, 1);
        disk[ENTRY_TABLE_OFFSET] = 0x4D;
        assert!(decoder.open(&MemoryImage::new(disk), 0).unwrap().is_none());

        // shorter than one sector
        assert!(decoder.open(&MemoryImage::new(vec![0u8; 100]), 0).unwrap().is_none());
    }
}
