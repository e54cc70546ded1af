//! AccessData AD1 logical images
//!
//! ## Layout
//! ```text
//! segment file: [segment header 512][item address space ...]
//! item @addr:   next u64 | first_child u64 | first_metadata u64 | zlib_metadata u64
//!               | decompressed_size u64 | item_type u32 | name_len u32 | name
//! zlib @addr:   chunk_count u64 | chunk_count+1 chunk start addresses
//! ```
//! Item addresses are global across segments: address `a` lives in segment
//! `a / span` at file offset `a % span + 512`.
//!
//! Nodes are read lazily; child lists and item headers are cached per
//! container so each item is parsed once per walk.

mod header;

use flate2::read::ZlibDecoder;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace};

use self::header::{
    build_segment_path, join_path, read_logical_header, read_segment_header, segment_span, LogicalHeader,
    SegmentHeader, AD1_FOLDER_SIGNATURE, AD1_LOGICAL_MARGIN, SEGMENT_BLOCK_SIZE,
};
use super::{ArchiveContainer, ArchiveEntryType};
use crate::common::binary::bytes_to_string;
use crate::error::{EngineError, EngineResult};

/// Address of the synthetic root node (the container itself)
const ROOT_ADDR: u64 = 0;

/// Preallocation ceiling for inflated content; larger files grow as they inflate
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Node handle: item address plus its relative path inside the image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ad1Node {
    addr: u64,
    path: String,
}

impl Ad1Node {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.addr == ROOT_ADDR
    }
}

/// Parsed fixed part of an item
#[derive(Debug, Clone)]
struct ItemHeader {
    next_item_addr: u64,
    first_child_addr: u64,
    zlib_metadata_addr: u64,
    decompressed_size: u64,
    item_type: u32,
    name: String,
}

pub struct Ad1Container {
    path: PathBuf,
    segment_header: SegmentHeader,
    logical_header: LogicalHeader,
    segments: Vec<File>,
    /// Item bytes per segment (file size minus the segment header)
    segment_sizes: Vec<u64>,
    span: u64,
    items: HashMap<u64, ItemHeader>,
    children: HashMap<u64, Vec<Ad1Node>>,
    /// Item addresses already listed under some parent
    claimed: HashSet<u64>,
}

impl Ad1Container {
    /// Open an AD1 image from its first segment (.ad1)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut first = File::open(&path)
            .map_err(|e| EngineError::Archive(format!("Failed to open AD1 file '{}': {}", path.display(), e)))?;
        let segment_header = read_segment_header(&mut first)?;
        let logical_header = read_logical_header(&mut first)?;
        debug!(
            segments = segment_header.segment_number,
            header_size = segment_header.header_size,
            first_item_addr = logical_header.first_item_addr,
            "AD1 headers parsed"
        );

        let mut segments = Vec::with_capacity(segment_header.segment_number as usize);
        let mut segment_sizes = Vec::with_capacity(segment_header.segment_number as usize);
        for index in 1..=segment_header.segment_number {
            let segment_path = build_segment_path(&path, index);
            trace!(index, segment = %segment_path.display(), "Opening AD1 segment");
            let mut file = File::open(&segment_path).map_err(|e| {
                EngineError::Archive(format!("Missing AD1 segment '{}': {}", segment_path.display(), e))
            })?;
            if index > 1 {
                let seg = read_segment_header(&mut file)?;
                if seg.segment_index != index {
                    return Err(EngineError::Archive(format!(
                        "Segment '{}' reports index {}, expected {}",
                        segment_path.display(),
                        seg.segment_index,
                        index
                    )));
                }
            }
            let size = file.seek(SeekFrom::End(0))?;
            segment_sizes.push(size.saturating_sub(AD1_LOGICAL_MARGIN));
            segments.push(file);
        }

        let span = segment_span(segment_header.fragments_size);
        Ok(Ad1Container {
            path,
            segment_header,
            logical_header,
            segments,
            segment_sizes,
            span,
            items: HashMap::new(),
            children: HashMap::new(),
            claimed: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_header.segment_number
    }

    pub fn image_version(&self) -> u32 {
        self.logical_header.image_version
    }

    pub fn chunk_size(&self) -> u32 {
        self.logical_header.zlib_chunk_size
    }

    /// Logical header signature ("ADLOGICALIMAGE")
    pub fn logical_signature(&self) -> &str {
        &self.logical_header.signature
    }

    /// Name of the acquired source (drive letter, folder)
    pub fn data_source_name(&self) -> &str {
        &self.logical_header.data_source_name
    }

    /// Read across segment boundaries at an item address
    fn read_into(&mut self, addr: u64, buf: &mut [u8]) -> EngineResult<()> {
        let mut filled = 0usize;
        let mut segment = (addr / self.span) as usize;
        let mut offset = addr % self.span;

        while filled < buf.len() {
            let out_of_range = || EngineError::Archive(format!("AD1 address {:#x} out of range", addr));
            let seg_size = *self.segment_sizes.get(segment).ok_or_else(out_of_range)?;
            let available = seg_size.saturating_sub(offset);
            if available == 0 {
                return Err(out_of_range());
            }
            let to_read = ((buf.len() - filled) as u64).min(available) as usize;

            let file = self.segments.get_mut(segment).ok_or_else(out_of_range)?;
            file.seek(SeekFrom::Start(offset + AD1_LOGICAL_MARGIN))?;
            file.read_exact(&mut buf[filled..filled + to_read])?;

            filled += to_read;
            segment += 1;
            offset = 0;
        }
        Ok(())
    }

    /// Item bytes stored from `addr` to the end of the last segment
    fn bytes_from(&self, addr: u64) -> u64 {
        let segment = (addr / self.span) as usize;
        let offset = addr % self.span;
        self.segment_sizes
            .iter()
            .skip(segment)
            .enumerate()
            .map(|(i, size)| if i == 0 { size.saturating_sub(offset) } else { *size })
            .sum()
    }

    fn read_bytes(&mut self, addr: u64, len: u64) -> EngineResult<Vec<u8>> {
        if len > self.bytes_from(addr) {
            return Err(EngineError::Archive(format!(
                "AD1 read of {} bytes at {:#x} runs past the end of the image",
                len, addr
            )));
        }
        let mut buf = vec![0u8; len as usize];
        if len > 0 {
            self.read_into(addr, &mut buf)?;
        }
        Ok(buf)
    }

    /// Largest compressed chunk accepted: twice the (at least 64 KiB) chunk size
    fn max_compressed_chunk(&self) -> u64 {
        (self.logical_header.zlib_chunk_size as u64).max(SEGMENT_BLOCK_SIZE) * 2
    }

    fn read_u64(&mut self, addr: u64) -> EngineResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn item(&mut self, addr: u64) -> EngineResult<ItemHeader> {
        if let Some(item) = self.items.get(&addr) {
            return Ok(item.clone());
        }
        let mut fixed = [0u8; 0x30];
        self.read_into(addr, &mut fixed)?;
        let field = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&fixed[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let small = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&fixed[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        let name_len = small(0x2c) as u64;
        let name_bytes = self.read_bytes(addr + 0x30, name_len)?;

        let item = ItemHeader {
            next_item_addr: field(0x00),
            first_child_addr: field(0x08),
            zlib_metadata_addr: field(0x18),
            decompressed_size: field(0x20),
            item_type: small(0x28),
            // names are single path components
            name: bytes_to_string(&name_bytes).replace('/', "_"),
        };
        trace!(addr, name = %item.name, item_type = item.item_type, "AD1 item");
        self.items.insert(addr, item.clone());
        Ok(item)
    }

    fn load_children(&mut self, node: &Ad1Node) -> EngineResult<&Vec<Ad1Node>> {
        if !self.children.contains_key(&node.addr) {
            let first = if node.is_root() {
                self.logical_header.first_item_addr
            } else {
                self.item(node.addr)?.first_child_addr
            };

            // each item has exactly one parent; a repeat means the chains loop
            let mut list = Vec::new();
            let mut addr = first;
            while addr != 0 {
                if !self.claimed.insert(addr) {
                    return Err(EngineError::Archive(format!("AD1 item {:#x} reached twice", addr)));
                }
                let item = self.item(addr)?;
                list.push(Ad1Node {
                    addr,
                    path: join_path(&node.path, &item.name),
                });
                addr = item.next_item_addr;
            }
            self.children.insert(node.addr, list);
        }
        self.children
            .get(&node.addr)
            .ok_or_else(|| EngineError::Archive("AD1 child list missing".to_string()))
    }

    /// Inflate the chunk list of a file item, in order
    fn decompress(&mut self, item: &ItemHeader, len: u64) -> EngineResult<Vec<u8>> {
        if item.zlib_metadata_addr == 0 {
            return Err(EngineError::Archive(format!("'{}' has no zlib metadata", item.name)));
        }
        let chunk_count = self.read_u64(item.zlib_metadata_addr)?;
        let table_len = chunk_count.checked_add(1).and_then(|n| n.checked_mul(0x08));
        match table_len {
            Some(table_len) if table_len <= self.bytes_from(item.zlib_metadata_addr + 0x08) => {}
            _ => {
                return Err(EngineError::Archive(format!(
                    "'{}' declares {} chunks, more than the image holds",
                    item.name, chunk_count
                )))
            }
        }
        let mut addresses = Vec::with_capacity(chunk_count.min(1 << 16) as usize + 1);
        for index in 0..=chunk_count {
            addresses.push(self.read_u64(item.zlib_metadata_addr + (index + 1) * 0x08)?);
        }

        let max_chunk = self.max_compressed_chunk();
        let mut output = Vec::with_capacity(len.min(item.decompressed_size).min(MAX_PREALLOC) as usize);
        for window in addresses.windows(2) {
            let wanted = len.saturating_sub(output.len() as u64);
            if wanted == 0 {
                break;
            }
            let compressed_len = window[1].saturating_sub(window[0]);
            if compressed_len == 0 {
                continue;
            }
            if compressed_len > max_chunk {
                return Err(EngineError::Archive(format!(
                    "'{}' has a {} byte chunk at {:#x}, limit is {}",
                    item.name, compressed_len, window[0], max_chunk
                )));
            }
            let compressed = self.read_bytes(window[0], compressed_len)?;
            ZlibDecoder::new(&compressed[..])
                .take(wanted)
                .read_to_end(&mut output)
                .map_err(|e| EngineError::Archive(format!("Zlib inflate error in '{}': {}", item.name, e)))?;
        }
        Ok(output)
    }
}

impl ArchiveContainer for Ad1Container {
    type Node = Ad1Node;

    fn root(&mut self) -> EngineResult<Option<Ad1Node>> {
        Ok(Some(Ad1Node {
            addr: ROOT_ADDR,
            path: String::new(),
        }))
    }

    fn name(&mut self, node: &Ad1Node) -> EngineResult<String> {
        if node.is_root() {
            return Ok(self.logical_header.data_source_name.clone());
        }
        Ok(node.path.clone())
    }

    fn entry_type(&mut self, node: &Ad1Node) -> EngineResult<ArchiveEntryType> {
        if node.is_root() {
            return Ok(ArchiveEntryType::Directory);
        }
        Ok(if self.item(node.addr)?.item_type == AD1_FOLDER_SIGNATURE {
            ArchiveEntryType::Directory
        } else {
            ArchiveEntryType::File
        })
    }

    fn size(&mut self, node: &Ad1Node) -> EngineResult<u64> {
        if node.is_root() {
            return Ok(0);
        }
        let item = self.item(node.addr)?;
        Ok(if item.item_type == AD1_FOLDER_SIGNATURE {
            0
        } else {
            item.decompressed_size
        })
    }

    fn child_count(&mut self, node: &Ad1Node) -> EngineResult<usize> {
        Ok(self.load_children(node)?.len())
    }

    fn child(&mut self, node: &Ad1Node, index: usize) -> EngineResult<Ad1Node> {
        self.load_children(node)?.get(index).cloned().ok_or_else(|| {
            EngineError::Archive(format!("'{}' has no child at index {}", node.path, index))
        })
    }

    fn read_content(&mut self, node: &Ad1Node, len: u64) -> EngineResult<Vec<u8>> {
        if node.is_root() || len == 0 {
            return Ok(Vec::new());
        }
        let item = self.item(node.addr)?;
        if item.item_type == AD1_FOLDER_SIGNATURE || item.decompressed_size == 0 {
            return Ok(Vec::new());
        }
        self.decompress(&item, len)
    }
}
