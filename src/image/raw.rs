// RAW disk image reader (.dd, .raw, .img, .001, .002, etc.)
// Presents single and multi-segment raw images as one byte space

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace};

use super::{ImageFormat, ImageInfo, ImageReader, DEFAULT_SECTOR_SIZE};
use crate::common::segments::discover_numbered_segments;
use crate::error::{EngineError, EngineResult};

/// Currently open segment
struct SegmentCursor {
    index: usize,
    file: File,
}

pub struct RawImage {
    segments: Vec<PathBuf>,
    segment_sizes: Vec<u64>,
    total_size: u64,
    sector_size: u32,
    cursor: Mutex<Option<SegmentCursor>>,
}

impl RawImage {
    /// Open a raw image from any of its segments, discovering siblings
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let segments = discover_numbered_segments(path.as_ref())?;
        Self::open_segments(segments, DEFAULT_SECTOR_SIZE)
    }

    /// Open an explicit, already-ordered list of segment files
    pub fn open_segments(segments: Vec<PathBuf>, sector_size: u32) -> EngineResult<Self> {
        if segments.is_empty() {
            return Err(EngineError::InvalidImage("No image segments given".to_string()));
        }
        let sector_size = if sector_size == 0 { DEFAULT_SECTOR_SIZE } else { sector_size };

        let mut segment_sizes = Vec::with_capacity(segments.len());
        for segment in &segments {
            let size = std::fs::metadata(segment)
                .map_err(|e| {
                    EngineError::InvalidImage(format!("Failed to stat segment {}: {}", segment.display(), e))
                })?
                .len();
            segment_sizes.push(size);
        }
        let total_size = segment_sizes.iter().sum();
        debug!(segment_count = segments.len(), total_size, "Opened raw image");

        Ok(RawImage {
            segments,
            segment_sizes,
            total_size,
            sector_size,
            cursor: Mutex::new(None),
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Convert absolute position to (segment_index, offset_within_segment)
    fn position_to_segment(&self, pos: u64) -> Option<(usize, u64)> {
        let mut offset = pos;
        for (idx, &size) in self.segment_sizes.iter().enumerate() {
            if offset < size {
                return Some((idx, offset));
            }
            offset -= size;
        }
        None
    }
}

impl ImageReader for RawImage {
    fn info(&self) -> ImageInfo {
        ImageInfo {
            format: if self.segments.len() > 1 {
                ImageFormat::Split
            } else {
                ImageFormat::Raw
            },
            sector_size: self.sector_size,
            total_size: self.total_size,
            segments: self
                .segments
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> EngineResult<usize> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| EngineError::InvalidImage("raw image handle poisoned".to_string()))?;

        let mut position = offset;
        let mut total_read = 0usize;

        while total_read < buf.len() {
            let Some((seg_idx, seg_offset)) = self.position_to_segment(position) else {
                break; // end of image
            };

            // Open segment if needed
            let reopen = !matches!(cursor.as_ref(), Some(c) if c.index == seg_idx);
            if reopen {
                trace!(seg_idx, "Switching raw segment");
                let file = File::open(&self.segments[seg_idx])?;
                *cursor = Some(SegmentCursor { index: seg_idx, file });
            }
            let Some(current) = cursor.as_mut() else {
                break;
            };

            current.file.seek(SeekFrom::Start(seg_offset))?;
            let seg_remaining = self.segment_sizes[seg_idx] - seg_offset;
            let to_read = (buf.len() - total_read).min(seg_remaining as usize);
            let bytes_read = current.file.read(&mut buf[total_read..total_read + to_read])?;
            if bytes_read == 0 {
                break;
            }

            total_read += bytes_read;
            position += bytes_read as u64;
        }

        Ok(total_read)
    }
}
