//! Image traversal engine
//!
//! [`ImageWalker`] finds volume systems and file systems inside an image and
//! walks every directory entry, handing each one to a [`WalkHooks`]
//! implementation. Filter hooks decide which partitions and file systems get
//! walked; processing hooks see every entry and may stop the walk.
//!
//! ```rust,ignore
//! let image = RawImage::open("disk.001")?;
//! let volumes = VolumeDecoders::builtin();
//! let mut walker = ImageWalker::new(&image, &volumes, &my_fs_decoders);
//! let outcome = walker.find_files_in_image(&mut my_hooks);
//! ```

pub mod classify;
mod control;
mod filesystem;
mod volume;

pub use control::{FilterVerdict, WalkOutcome};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fs::{Attribute, FileSystem, FsEntry, FsInfo, FileSystemDecoder};
use crate::image::ImageReader;
use crate::volume::{PartitionFlags, PartitionInfo, VolumeDecoder};

/// One entry as presented to the processing hooks
pub struct FileVisit<'v> {
    pub fs: &'v dyn FileSystem,
    pub entry: &'v FsEntry,
    /// Parent directory path, always with leading and trailing `/`
    pub path: &'v str,
    /// Meta address of the directory the entry was listed in
    pub parent_addr: u64,
}

impl FileVisit<'_> {
    pub fn fs_info(&self) -> &FsInfo {
        self.fs.info()
    }

    /// Parent path joined with the entry name
    pub fn full_path(&self) -> String {
        format!("{}{}", self.path, self.entry.name)
    }
}

/// Caller-supplied behaviour at each level of the walk
pub trait WalkHooks {
    /// Decide whether a partition is searched for a file system
    fn filter_volume(&mut self, _partition: &PartitionInfo) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// Decide whether a detected file system is walked
    fn filter_file_system(&mut self, _fs: &FsInfo) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// Called for every entry the walk reaches
    fn process_file(&mut self, visit: &FileVisit<'_>) -> WalkOutcome;

    /// Called per attribute by [`WalkHooks::process_attributes`]
    fn process_attribute(&mut self, _visit: &FileVisit<'_>, _attr: &Attribute) -> WalkOutcome {
        WalkOutcome::Ok
    }

    /// Run [`WalkHooks::process_attribute`] over the entry's attributes in
    /// index order. The first non-`Ok` result ends the sub-walk and is returned.
    fn process_attributes(&mut self, visit: &FileVisit<'_>) -> WalkOutcome {
        for attr in &visit.entry.attributes {
            match self.process_attribute(visit, attr) {
                WalkOutcome::Ok => {}
                other => return other,
            }
        }
        WalkOutcome::Ok
    }
}

/// Which partitions are offered to `filter_volume`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeFilter {
    pub allocated: bool,
    pub unallocated: bool,
    pub metadata: bool,
}

impl Default for VolumeFilter {
    fn default() -> Self {
        Self {
            allocated: true,
            unallocated: false,
            metadata: false,
        }
    }
}

impl VolumeFilter {
    pub fn flags(&self) -> PartitionFlags {
        let mut flags = PartitionFlags::NONE;
        if self.allocated {
            flags |= PartitionFlags::ALLOCATED;
        }
        if self.unallocated {
            flags |= PartitionFlags::UNALLOCATED;
        }
        if self.metadata {
            flags |= PartitionFlags::METADATA;
        }
        flags
    }

    pub fn includes(&self, partition: &PartitionInfo) -> bool {
        partition.flags.intersects(self.flags())
    }
}

/// Which directory entries are reported and descended into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilter {
    pub allocated: bool,
    pub unallocated: bool,
    /// Descend into subdirectories; when false only the root is listed
    pub recurse: bool,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            allocated: true,
            unallocated: true,
            recurse: true,
        }
    }
}

impl FileFilter {
    pub fn includes(&self, entry: &FsEntry) -> bool {
        if entry.allocated {
            self.allocated
        } else {
            self.unallocated
        }
    }
}

/// Walk configuration, fixed for the lifetime of an [`ImageWalker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub volumes: VolumeFilter,
    pub files: FileFilter,
}

/// A partition that was abandoned during volume enumeration
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition: PartitionInfo,
    /// Byte offset that was probed
    pub offset: u64,
    pub error: EngineError,
}

/// Walks one opened image with a fixed set of decoders
pub struct ImageWalker<'a> {
    image: &'a dyn ImageReader,
    volumes: &'a dyn VolumeDecoder,
    file_systems: &'a dyn FileSystemDecoder,
    config: WalkConfig,
    partition_errors: Vec<PartitionFailure>,
}

impl<'a> ImageWalker<'a> {
    pub fn new(
        image: &'a dyn ImageReader,
        volumes: &'a dyn VolumeDecoder,
        file_systems: &'a dyn FileSystemDecoder,
    ) -> Self {
        Self::with_config(image, volumes, file_systems, WalkConfig::default())
    }

    pub fn with_config(
        image: &'a dyn ImageReader,
        volumes: &'a dyn VolumeDecoder,
        file_systems: &'a dyn FileSystemDecoder,
        config: WalkConfig,
    ) -> Self {
        Self {
            image,
            volumes,
            file_systems,
            config,
            partition_errors: Vec::new(),
        }
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    pub fn image(&self) -> &'a dyn ImageReader {
        self.image
    }

    /// Partitions absorbed by the most recent volume walk
    pub fn partition_errors(&self) -> &[PartitionFailure] {
        &self.partition_errors
    }

    /// Walk the whole image: volume system at offset 0, or a bare file system there
    pub fn find_files_in_image<H: WalkHooks + ?Sized>(&mut self, hooks: &mut H) -> WalkOutcome {
        self.walk_volumes(hooks, 0)
    }
}
