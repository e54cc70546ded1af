//! Disk image access
//!
//! The walkers only need random-access reads into a single addressable byte
//! space. Anything that can provide that (raw and split images here, EWF or
//! AFF readers elsewhere) implements [`ImageReader`].

mod raw;

pub use raw::RawImage;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};

/// Default device sector size
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Image container format tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    /// Single raw file (.dd, .raw, .img)
    Raw,
    /// Numbered raw segments (.001, .002, ...)
    Split,
    /// Expert Witness Format (E01/Ex01)
    Ewf,
    /// Advanced Forensic Format
    Aff,
    /// In-memory buffer
    Memory,
    Other(String),
}

impl ImageFormat {
    pub fn name(&self) -> &str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Split => "split",
            ImageFormat::Ewf => "ewf",
            ImageFormat::Aff => "aff",
            ImageFormat::Memory => "memory",
            ImageFormat::Other(name) => name,
        }
    }
}

/// Image-level attributes
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub sector_size: u32,
    pub total_size: u64,
    /// Underlying segment files in order (empty for memory images)
    pub segments: Vec<String>,
}

/// Random-access, read-only view of an opened image
pub trait ImageReader {
    fn info(&self) -> ImageInfo;

    /// Read up to `buf.len()` bytes at `offset`; returns 0 at end of image
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> EngineResult<usize>;

    fn size(&self) -> u64 {
        self.info().total_size
    }

    fn sector_size(&self) -> u32 {
        self.info().sector_size
    }

    /// Fill `buf` completely or fail with an I/O error
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> EngineResult<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {} bytes at offset {} past end of image",
                        buf.len(),
                        offset
                    ),
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

/// Image held entirely in memory
pub struct MemoryImage {
    data: Vec<u8>,
    sector_size: u32,
}

impl MemoryImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_sector_size(data, DEFAULT_SECTOR_SIZE)
    }

    pub fn with_sector_size(data: Vec<u8>, sector_size: u32) -> Self {
        Self { data, sector_size }
    }
}

impl ImageReader for MemoryImage {
    fn info(&self) -> ImageInfo {
        ImageInfo {
            format: ImageFormat::Memory,
            sector_size: self.sector_size,
            total_size: self.data.len() as u64,
            segments: Vec::new(),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> EngineResult<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
