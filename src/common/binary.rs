// Shared little-endian binary readers for the bundled decoders
//
// Two flavours: seek-and-read over any `Read + Seek` handle (container headers)
// and bounds-checked reads out of an in-memory sector buffer (partition tables).

use std::io::{Read, Seek, SeekFrom};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Read at Offset Functions (seek + read)
// =============================================================================

fn read_array_at<R: Read + Seek, const N: usize>(reader: &mut R, offset: u64) -> EngineResult<[u8; N]> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read u32 little-endian at specific offset
pub fn read_u32_at<R: Read + Seek>(reader: &mut R, offset: u64) -> EngineResult<u32> {
    Ok(u32::from_le_bytes(read_array_at(reader, offset)?))
}

/// Read u64 little-endian at specific offset
pub fn read_u64_at<R: Read + Seek>(reader: &mut R, offset: u64) -> EngineResult<u64> {
    Ok(u64::from_le_bytes(read_array_at(reader, offset)?))
}

/// Read exact bytes at specific offset
pub fn read_bytes_at<R: Read + Seek>(reader: &mut R, offset: u64, length: usize) -> EngineResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a fixed-length string at specific offset (stops at the first NUL)
pub fn read_string_at<R: Read + Seek>(reader: &mut R, offset: u64, length: usize) -> EngineResult<String> {
    let bytes = read_bytes_at(reader, offset, length)?;
    Ok(bytes_to_string(&bytes))
}

// =============================================================================
// Slice Readers
// =============================================================================

fn slice_at<const N: usize>(buf: &[u8], offset: usize) -> EngineResult<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| buf.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            EngineError::decoder(
                "binary",
                format!("read of {} bytes at {} past end of {}-byte buffer", N, offset, buf.len()),
            )
        })
}

/// u32 little-endian from a buffer
pub fn le_u32(buf: &[u8], offset: usize) -> EngineResult<u32> {
    Ok(u32::from_le_bytes(slice_at(buf, offset)?))
}

/// Convert bytes to null-terminated string
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}
