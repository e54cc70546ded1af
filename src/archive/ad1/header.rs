//! AD1 segment and logical headers

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::common::binary::{read_string_at, read_u32_at, read_u64_at};
use crate::error::{EngineError, EngineResult};

pub(crate) const AD1_SIGNATURE: &[u8; 15] = b"ADSEGMENTEDFILE";
/// Every segment starts with a 512-byte segment header before item data
pub(crate) const AD1_LOGICAL_MARGIN: u64 = 512;
pub(crate) const AD1_FOLDER_SIGNATURE: u32 = 0x05;
pub(crate) const SEGMENT_BLOCK_SIZE: u64 = 65_536;
const DATA_SOURCE_NAME_OFFSET: u64 = 0x25c;

/// Segment header (offset 0 of every segment)
#[derive(Debug, Clone)]
pub(crate) struct SegmentHeader {
    pub segment_index: u32,
    pub segment_number: u32,
    pub fragments_size: u32,
    pub header_size: u32,
}

/// Logical header (offset 512 of the first segment)
#[derive(Debug, Clone)]
pub(crate) struct LogicalHeader {
    pub signature: String,
    pub image_version: u32,
    pub zlib_chunk_size: u32,
    pub first_item_addr: u64,
    pub data_source_name: String,
}

pub(crate) fn read_segment_header(file: &mut File) -> EngineResult<SegmentHeader> {
    file.seek(SeekFrom::Start(0))?;
    let mut signature = [0u8; 16];
    file.read_exact(&mut signature)
        .map_err(|e| EngineError::Archive(format!("Failed to read AD1 signature: {}", e)))?;
    if &signature[..15] != AD1_SIGNATURE {
        return Err(EngineError::Archive("File is not an AD1 segmented image".to_string()));
    }

    let header = SegmentHeader {
        segment_index: read_u32_at(file, 0x18)?,
        segment_number: read_u32_at(file, 0x1c)?,
        fragments_size: read_u32_at(file, 0x22)?,
        header_size: read_u32_at(file, 0x28)?,
    };
    if header.segment_number == 0 {
        return Err(EngineError::Archive("Invalid AD1 segment count".to_string()));
    }
    if segment_span(header.fragments_size) == 0 {
        return Err(EngineError::Archive("Invalid AD1 fragment size".to_string()));
    }
    Ok(header)
}

pub(crate) fn read_logical_header(file: &mut File) -> EngineResult<LogicalHeader> {
    let signature = read_string_at(file, AD1_LOGICAL_MARGIN, 15)?;
    let image_version = read_u32_at(file, 0x210)?;
    let zlib_chunk_size = read_u32_at(file, 0x218)?;
    let first_item_addr = read_u64_at(file, 0x224)?;
    let data_source_name_length = read_u32_at(file, 0x22c)? as u64;
    let file_len = file.seek(SeekFrom::End(0))?;
    if DATA_SOURCE_NAME_OFFSET + data_source_name_length > file_len {
        return Err(EngineError::Archive(format!(
            "AD1 data source name of {} bytes runs past the end of the segment",
            data_source_name_length
        )));
    }
    let data_source_name = read_string_at(file, DATA_SOURCE_NAME_OFFSET, data_source_name_length as usize)?;

    Ok(LogicalHeader {
        signature,
        image_version,
        zlib_chunk_size,
        first_item_addr,
        data_source_name,
    })
}

/// Bytes of item address space held by each segment
pub(crate) fn segment_span(fragments_size: u32) -> u64 {
    (fragments_size as u64 * SEGMENT_BLOCK_SIZE).saturating_sub(AD1_LOGICAL_MARGIN)
}

/// Segment N of `first`: the last character of the path is replaced by N
/// (image.ad1, image.ad2, ... image.ad10)
pub(crate) fn build_segment_path(first: &Path, index: u32) -> PathBuf {
    let mut out = first.to_string_lossy().to_string();
    out.pop();
    out.push_str(&index.to_string());
    PathBuf::from(out)
}

/// Join archive path components with `/`
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
