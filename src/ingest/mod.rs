//! Derived file ingestion
//!
//! Turns walk results into derived file records in an [`ImageDb`] and pushes
//! extracted content to a [`BlobStore`].
//!
//! - [`ArchiveIngestor`] consumes the flat list from [`crate::archive::walk_archive`]
//! - [`FsIngestor`] is a [`crate::walker::WalkHooks`] that records every visited entry
//!
//! Record creation is best effort: a rejected record is logged and skipped.
//! A blob storage failure ends the run.

mod archive;
mod blob;
mod database;
mod filesystem;

pub use archive::ArchiveIngestor;
pub use blob::LocalBlobStore;
pub use database::{ImageInfoRecord, SqliteImageDb};
pub use filesystem::FsIngestor;

use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::debug;

use crate::common::HashAlgorithm;
use crate::error::EngineResult;
use crate::image::ImageInfo;

/// Parent id used when a record has no known parent
pub const ROOT_PARENT_ID: u64 = 0;

/// Request to create a derived file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDerivedFile {
    pub name: String,
    /// [`ROOT_PARENT_ID`] or the id of a record created earlier
    pub parent_id: u64,
    pub is_directory: bool,
    pub size: u64,
    pub full_path: String,
    pub ctime: i64,
    pub crtime: i64,
    pub atime: i64,
    pub mtime: i64,
    /// Free-form JSON describing where the file came from
    pub details: String,
}

/// A persisted derived file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedFileRecord {
    pub file_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub full_path: String,
    pub is_directory: bool,
    pub size: u64,
    pub ctime: i64,
    pub crtime: i64,
    pub atime: i64,
    pub mtime: i64,
    pub details: String,
    pub status: String,
}

/// Image metadata store
pub trait ImageDb {
    fn add_image_info(&self, format: &str, sector_size: u32) -> EngineResult<()>;

    fn add_image_name(&self, name: &str) -> EngineResult<()>;

    /// Create a record and return its newly assigned file id
    fn add_derived_file(&self, file: &NewDerivedFile) -> EngineResult<u64>;
}

/// Result of storing one content stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredBlob {
    pub file_id: u64,
    pub size: u64,
    pub digest: String,
    pub algorithm: HashAlgorithm,
}

/// Durable storage for extracted content, keyed by file id
pub trait BlobStore {
    fn store(&self, file_id: u64, content: &mut dyn Read) -> EngineResult<StoredBlob>;
}

/// Where ingested records attach and how archive directories are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Parent for top-level records ([`ROOT_PARENT_ID`] unless the container itself has a record)
    pub container_file_id: u64,
    /// Prefix for every record's full path
    pub container_path: String,
    /// Persist archive directories and link records to their directories
    pub persist_directories: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            container_file_id: ROOT_PARENT_ID,
            container_path: String::new(),
            persist_directories: false,
        }
    }
}

impl IngestOptions {
    /// `container_path` joined with a `/`-separated relative path
    pub(crate) fn full_path(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        let prefix = self.container_path.trim_end_matches('/');
        if prefix.is_empty() {
            format!("/{}", relative)
        } else {
            format!("{}/{}", prefix, relative)
        }
    }
}

/// Record an opened image's format, sector size and segment names
pub fn record_image(db: &dyn ImageDb, info: &ImageInfo) -> EngineResult<()> {
    db.add_image_info(info.format.name(), info.sector_size)?;
    for segment in &info.segments {
        db.add_image_name(segment)?;
    }
    debug!(format = info.format.name(), segments = info.segments.len(), "Recorded image");
    Ok(())
}
