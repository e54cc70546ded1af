//! Volume systems (partition tables)
//!
//! A [`VolumeDecoder`] probes an image at a byte offset and either returns an
//! opened [`VolumeSystem`] or `Ok(None)` when nothing it understands is there.
//! "No volume system" is an ordinary answer, not an error.

mod dos;

pub use dos::DosVolumeDecoder;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::EngineResult;
use crate::image::ImageReader;

/// Partition allocation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct PartitionFlags(u8);

impl PartitionFlags {
    pub const NONE: PartitionFlags = PartitionFlags(0);
    /// Space in use by a partition
    pub const ALLOCATED: PartitionFlags = PartitionFlags(0x01);
    /// Space not covered by any partition
    pub const UNALLOCATED: PartitionFlags = PartitionFlags(0x02);
    /// Partition tables and extended containers
    pub const METADATA: PartitionFlags = PartitionFlags(0x04);
    pub const ALL: PartitionFlags = PartitionFlags(0x07);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Every flag in `other` is set
    pub fn contains(self, other: PartitionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one flag in `other` is set
    pub fn intersects(self, other: PartitionFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PartitionFlags {
    type Output = PartitionFlags;

    fn bitor(self, rhs: PartitionFlags) -> PartitionFlags {
        PartitionFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PartitionFlags {
    fn bitor_assign(&mut self, rhs: PartitionFlags) {
        self.0 |= rhs.0;
    }
}

/// One partition table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    /// Position in the sorted partition list
    pub index: u32,
    /// First block, relative to the volume system offset
    pub start: u64,
    /// Length in blocks
    pub len: u64,
    pub description: String,
    pub flags: PartitionFlags,
}

impl PartitionInfo {
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(PartitionFlags::ALLOCATED)
    }
}

/// Volume system attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSystemInfo {
    /// Short type name ("dos", "gpt", ...)
    pub vs_type: String,
    /// Byte offset of the volume system within the image
    pub offset: u64,
    /// Block size in bytes that partition start/len are counted in
    pub block_size: u32,
}

impl VolumeSystemInfo {
    /// Absolute byte offset of a partition within the image
    pub fn partition_offset(&self, partition: &PartitionInfo) -> u64 {
        self.offset + partition.start * self.block_size as u64
    }
}

/// An opened volume system. Closed on drop.
pub trait VolumeSystem {
    fn info(&self) -> &VolumeSystemInfo;

    /// Partitions in ascending start order
    fn partitions(&self) -> EngineResult<Vec<PartitionInfo>>;
}

/// Probes for a volume system format
pub trait VolumeDecoder {
    fn name(&self) -> &str;

    /// `Ok(None)` when no volume system of this kind is present at `offset`
    fn open<'i>(
        &self,
        image: &'i dyn ImageReader,
        offset: u64,
    ) -> EngineResult<Option<Box<dyn VolumeSystem + 'i>>>;
}

/// Ordered set of decoders tried one after another (format autodetection)
#[derive(Default)]
pub struct VolumeDecoders {
    decoders: Vec<Box<dyn VolumeDecoder>>,
}

impl VolumeDecoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders bundled with the crate
    pub fn builtin() -> Self {
        Self::new().with(DosVolumeDecoder::new())
    }

    pub fn with(mut self, decoder: impl VolumeDecoder + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl VolumeDecoder for VolumeDecoders {
    fn name(&self) -> &str {
        "auto"
    }

    fn open<'i>(
        &self,
        image: &'i dyn ImageReader,
        offset: u64,
    ) -> EngineResult<Option<Box<dyn VolumeSystem + 'i>>> {
        let mut last_error = None;
        for decoder in &self.decoders {
            trace!(decoder = decoder.name(), offset, "Probing volume system");
            match decoder.open(image, offset) {
                Ok(Some(vs)) => return Ok(Some(vs)),
                Ok(None) => {}
                Err(e) => {
                    debug!(decoder = decoder.name(), offset, "Volume system probe failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
