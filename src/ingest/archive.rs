//! Archive entries to derived file records

use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::{BlobStore, ImageDb, IngestOptions, NewDerivedFile};
use crate::archive::ArchivedFile;
use crate::error::{EngineError, EngineResult};

/// Persists the flat entry list produced by [`crate::archive::walk_archive`]
pub struct ArchiveIngestor<'a> {
    db: &'a dyn ImageDb,
    blobs: &'a dyn BlobStore,
    options: IngestOptions,
    run_id: String,
}

impl<'a> ArchiveIngestor<'a> {
    pub fn new(db: &'a dyn ImageDb, blobs: &'a dyn BlobStore, options: IngestOptions) -> Self {
        Self {
            db,
            blobs,
            options,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Create a record for every entry and store file content.
    ///
    /// Returns the number of records created. Records the database rejects
    /// are skipped; a blob storage failure ends the run.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub fn ingest(&self, entries: Vec<ArchivedFile>) -> EngineResult<usize> {
        let mut directories: HashMap<String, u64> = HashMap::new();
        let mut created = 0usize;

        for entry in entries {
            let relative = normalize_path(&entry.name);
            if relative.is_empty() {
                warn!(name = %entry.name, "Skipping archive entry with empty path");
                continue;
            }

            if entry.is_dir() {
                if self.options.persist_directories {
                    self.directory_id(&relative, &mut directories, &mut created);
                }
                continue;
            }

            let parent_id = match parent_path(&relative) {
                Some(parent) if self.options.persist_directories => {
                    self.directory_id(parent, &mut directories, &mut created)
                }
                _ => self.options.container_file_id,
            };

            let record = self.new_record(&relative, parent_id, false, entry.size);
            let file_id = match self.db.add_derived_file(&record) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %record.full_path, error = %e, "Failed to create derived file, skipping");
                    continue;
                }
            };
            created += 1;

            if let Some(content) = entry.content {
                let blob = self
                    .blobs
                    .store(file_id, &mut Cursor::new(content))
                    .map_err(|e| into_storage_error(file_id, e))?;
                trace!(file_id, size = blob.size, digest = %blob.digest, "Archive content stored");
            }
        }

        info!(created, container = %self.options.container_path, "Archive ingestion complete");
        Ok(created)
    }

    /// Id of the directory at `path`, creating it and any missing ancestors.
    /// Falls back to the nearest ancestor that could be persisted.
    fn directory_id(&self, path: &str, directories: &mut HashMap<String, u64>, created: &mut usize) -> u64 {
        let mut parent_id = self.options.container_file_id;
        let mut end = 0usize;

        for component in path.split('/') {
            end += component.len();
            let prefix = &path[..end];
            end += 1;

            if let Some(&id) = directories.get(prefix) {
                parent_id = id;
                continue;
            }

            let record = self.new_record(prefix, parent_id, true, 0);
            match self.db.add_derived_file(&record) {
                Ok(id) => {
                    debug!(file_id = id, path = %record.full_path, "Archive directory recorded");
                    directories.insert(prefix.to_string(), id);
                    *created += 1;
                    parent_id = id;
                }
                Err(e) => {
                    warn!(path = %record.full_path, error = %e, "Failed to create directory, skipping");
                }
            }
        }
        parent_id
    }

    fn new_record(&self, relative: &str, parent_id: u64, is_directory: bool, size: u64) -> NewDerivedFile {
        NewDerivedFile {
            name: display_name(relative).to_string(),
            parent_id,
            is_directory,
            size,
            full_path: self.options.full_path(relative),
            ctime: 0,
            crtime: 0,
            atime: 0,
            mtime: 0,
            details: json!({
                "source": "archive",
                "container": self.options.container_path,
                "archive_path": relative,
                "run_id": self.run_id,
            })
            .to_string(),
        }
    }
}

fn into_storage_error(file_id: u64, e: EngineError) -> EngineError {
    match e {
        EngineError::Storage { .. } => e,
        other => EngineError::Storage {
            file_id,
            reason: other.to_string(),
        },
    }
}

/// `/`-separated path with no empty components
fn normalize_path(name: &str) -> String {
    name.split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_path(normalized: &str) -> Option<&str> {
    normalized.rfind('/').map(|idx| &normalized[..idx])
}

/// Last path component; both `/` and `\` separate
pub(crate) fn display_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).find(|c| !c.is_empty()).unwrap_or(path)
}
