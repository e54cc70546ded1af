//! Evidence Walk
//!
//! Traversal of forensic disk images and logical evidence archives.
//!
//! ## Module Structure
//! ```text
//! image/    - ImageReader, raw and split images
//! volume/   - VolumeDecoder, DOS partition tables
//! fs/       - FileSystemDecoder collaborator interface
//! walker/   - ImageWalker, WalkHooks, filters and classification
//! archive/  - ArchiveContainer, walk_archive, AD1 reader
//! ingest/   - derived file records, SQLite image database, blob store
//! config    - EngineConfig (JSON)
//! logging   - tracing subscriber setup
//! ```

pub mod archive;
pub mod common;
pub mod config;
pub mod error;
pub mod fs;
pub mod image;
pub mod ingest;
pub mod logging;
pub mod volume;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::{walk_archive, Ad1Container, ArchiveContainer, ArchivedFile};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use image::{ImageReader, MemoryImage, RawImage};
pub use ingest::{ArchiveIngestor, FsIngestor, IngestOptions, LocalBlobStore, SqliteImageDb};
pub use volume::{DosVolumeDecoder, VolumeDecoders};
pub use walker::{FilterVerdict, ImageWalker, WalkConfig, WalkHooks, WalkOutcome};
