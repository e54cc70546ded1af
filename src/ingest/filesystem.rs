//! File system walk to derived file records

use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{BlobStore, ImageDb, IngestOptions, NewDerivedFile};
use crate::error::EngineError;
use crate::fs::FsInfo;
use crate::walker::classify::{default_attribute, is_dir, is_dot_dir, is_file};
use crate::walker::{FileVisit, FilterVerdict, WalkHooks, WalkOutcome};

/// Walk hooks that persist every visited entry and store regular file content
pub struct FsIngestor<'a> {
    db: &'a dyn ImageDb,
    blobs: &'a dyn BlobStore,
    options: IngestOptions,
    run_id: String,
    /// Directory meta address to file id, for the file system being walked
    directory_ids: HashMap<u64, u64>,
    fs_offset: u64,
    created: usize,
    stored: usize,
    skipped: usize,
}

impl<'a> FsIngestor<'a> {
    pub fn new(db: &'a dyn ImageDb, blobs: &'a dyn BlobStore, options: IngestOptions) -> Self {
        Self {
            db,
            blobs,
            options,
            run_id: Uuid::new_v4().to_string(),
            directory_ids: HashMap::new(),
            fs_offset: 0,
            created: 0,
            stored: 0,
            skipped: 0,
        }
    }

    /// Records created so far
    pub fn created(&self) -> usize {
        self.created
    }

    /// Content blobs stored so far
    pub fn stored(&self) -> usize {
        self.stored
    }

    /// Entries the database rejected
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn new_record(&self, visit: &FileVisit<'_>) -> NewDerivedFile {
        let entry = visit.entry;
        let info = visit.fs_info();
        NewDerivedFile {
            name: entry.name.clone(),
            parent_id: self
                .directory_ids
                .get(&visit.parent_addr)
                .copied()
                .unwrap_or(self.options.container_file_id),
            is_directory: is_dir(entry),
            size: entry.size,
            full_path: self.options.full_path(&visit.full_path()),
            ctime: entry.times.ctime,
            crtime: entry.times.crtime,
            atime: entry.times.atime,
            mtime: entry.times.mtime,
            details: json!({
                "source": "filesystem",
                "fs_type": info.fs_type,
                "fs_offset": info.offset,
                "meta_addr": entry.meta_addr,
                "allocated": entry.allocated,
                "run_id": self.run_id,
            })
            .to_string(),
        }
    }
}

impl WalkHooks for FsIngestor<'_> {
    fn filter_file_system(&mut self, fs: &FsInfo) -> FilterVerdict {
        // Meta addresses are only unique within one file system
        self.directory_ids.clear();
        self.fs_offset = fs.offset;
        debug!(fs_type = fs.fs_type.name(), offset = fs.offset, "Ingesting file system");
        FilterVerdict::Continue
    }

    fn process_file(&mut self, visit: &FileVisit<'_>) -> WalkOutcome {
        let entry = visit.entry;
        if is_dot_dir(entry) {
            return WalkOutcome::Ok;
        }

        let record = self.new_record(visit);
        let file_id = match self.db.add_derived_file(&record) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %record.full_path, error = %e, "Failed to create derived file, skipping");
                self.skipped += 1;
                return WalkOutcome::Ok;
            }
        };
        self.created += 1;

        if is_dir(entry) {
            self.directory_ids.insert(entry.meta_addr, file_id);
            return WalkOutcome::Ok;
        }

        if !(entry.allocated && is_file(entry) && entry.size > 0) {
            return WalkOutcome::Ok;
        }
        let Some(attr) = default_attribute(visit.fs_info(), entry) else {
            return WalkOutcome::Ok;
        };

        let content = match visit.fs.read_attribute(entry, attr) {
            Ok(content) => content,
            Err(e) => return WalkOutcome::Error(e),
        };
        match self.blobs.store(file_id, &mut Cursor::new(content)) {
            Ok(blob) => {
                self.stored += 1;
                trace!(file_id, size = blob.size, fs_offset = self.fs_offset, "File content stored");
                WalkOutcome::Ok
            }
            Err(e @ EngineError::Storage { .. }) => WalkOutcome::Error(e),
            Err(e) => WalkOutcome::Error(EngineError::Storage {
                file_id,
                reason: e.to_string(),
            }),
        }
    }
}
