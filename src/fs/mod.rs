//! File system collaborator interface
//!
//! On-disk decoding lives behind [`FileSystemDecoder`] / [`FileSystem`]. The
//! walkers only see directory listings as [`FsEntry`] values and pull
//! attribute content on demand.

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::EngineResult;
use crate::image::ImageReader;

/// Supported on-disk file system formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    Ext2,
    Ext3,
    Ext4,
    Hfs,
    Iso9660,
    Ufs,
    Yaffs2,
}

impl FsType {
    pub fn is_ntfs(self) -> bool {
        self == FsType::Ntfs
    }

    /// FAT family, exFAT included
    pub fn is_fat(self) -> bool {
        matches!(self, FsType::Fat12 | FsType::Fat16 | FsType::Fat32 | FsType::ExFat)
    }

    pub fn is_ext(self) -> bool {
        matches!(self, FsType::Ext2 | FsType::Ext3 | FsType::Ext4)
    }

    pub fn name(self) -> &'static str {
        match self {
            FsType::Ntfs => "NTFS",
            FsType::Fat12 => "FAT12",
            FsType::Fat16 => "FAT16",
            FsType::Fat32 => "FAT32",
            FsType::ExFat => "exFAT",
            FsType::Ext2 => "Ext2",
            FsType::Ext3 => "Ext3",
            FsType::Ext4 => "Ext4",
            FsType::Hfs => "HFS+",
            FsType::Iso9660 => "ISO9660",
            FsType::Ufs => "UFS",
            FsType::Yaffs2 => "YAFFS2",
        }
    }
}

/// File system attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsInfo {
    pub fs_type: FsType,
    /// Byte offset of the file system within the image
    pub offset: u64,
    pub block_size: u32,
    pub block_count: u64,
    /// Meta address of the root directory
    pub root_addr: u64,
    pub first_addr: u64,
    pub last_addr: u64,
}

/// Non-regular, non-directory entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OtherKind {
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    /// Decoder-generated entries ($OrphanFiles, FAT virtual files)
    Virtual,
    Unknown,
}

/// Entry type from the directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NameType {
    Regular,
    Directory,
    Other(OtherKind),
}

/// Unix epoch seconds, 0 when unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub crtime: i64,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

/// Attribute type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AttrType(pub u32);

impl AttrType {
    /// Primary data of non-NTFS file systems
    pub const DEFAULT: AttrType = AttrType(0x01);
    pub const NTFS_STANDARD_INFO: AttrType = AttrType(0x10);
    pub const NTFS_FILE_NAME: AttrType = AttrType(0x30);
    pub const NTFS_DATA: AttrType = AttrType(0x80);
    pub const NTFS_INDEX_ROOT: AttrType = AttrType(0x90);
    pub const NTFS_INDEX_ALLOCATION: AttrType = AttrType(0xA0);
}

/// One data stream of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    /// Position in the entry's attribute list
    pub index: u32,
    pub attr_type: AttrType,
    /// Stream name (NTFS alternate data streams), `None` for the unnamed stream
    pub name: Option<String>,
    /// Content stored inline in the metadata record
    pub resident: bool,
    pub size: u64,
}

/// A directory entry as listed by the decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsEntry {
    pub meta_addr: u64,
    pub name: String,
    pub name_type: NameType,
    pub allocated: bool,
    pub size: u64,
    pub times: Timestamps,
    /// Attributes in index order
    pub attributes: Vec<Attribute>,
}

/// An opened file system. Closed on drop.
pub trait FileSystem {
    fn info(&self) -> &FsInfo;

    /// Entries of the directory at `dir_addr`, in on-disk order
    fn read_dir(&self, dir_addr: u64) -> EngineResult<Vec<FsEntry>>;

    /// Full content of one attribute of an entry
    fn read_attribute(&self, entry: &FsEntry, attr: &Attribute) -> EngineResult<Vec<u8>>;
}

/// Probes for a file system format
pub trait FileSystemDecoder {
    fn name(&self) -> &str;

    /// `Ok(None)` when this format is not present at `offset`
    fn open<'i>(
        &self,
        image: &'i dyn ImageReader,
        offset: u64,
    ) -> EngineResult<Option<Box<dyn FileSystem + 'i>>>;
}

/// Ordered set of file system decoders tried one after another
#[derive(Default)]
pub struct FileSystemDecoders {
    decoders: Vec<Box<dyn FileSystemDecoder>>,
}

impl FileSystemDecoders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, decoder: impl FileSystemDecoder + 'static) -> Self {
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

impl FileSystemDecoder for FileSystemDecoders {
    fn name(&self) -> &str {
        "auto"
    }

    fn open<'i>(
        &self,
        image: &'i dyn ImageReader,
        offset: u64,
    ) -> EngineResult<Option<Box<dyn FileSystem + 'i>>> {
        // a failing probe does not hide the formats after it
        let mut last_error = None;
        for decoder in &self.decoders {
            trace!(decoder = decoder.name(), offset, "Probing file system");
            match decoder.open(image, offset) {
                Ok(Some(fs)) => return Ok(Some(fs)),
                Ok(None) => {}
                Err(e) => {
                    debug!(decoder = decoder.name(), offset, "File system probe failed: {}", e);
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
