//! Local directory blob store
//!
//! Content for file id N lands in `<root>/N`. Bytes are streamed through a
//! digest so large files are never held twice.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{BlobStore, StoredBlob};
use crate::common::{HashAlgorithm, StreamingHasher, BUFFER_SIZE};
use crate::error::{EngineError, EngineResult};

pub struct LocalBlobStore {
    root: PathBuf,
    algorithm: HashAlgorithm,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            root: root.into(),
            algorithm,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn path_for(&self, file_id: u64) -> PathBuf {
        self.root.join(file_id.to_string())
    }

    /// Read back a stored blob
    pub fn read(&self, file_id: u64) -> EngineResult<Vec<u8>> {
        fs::read(self.path_for(file_id)).map_err(|e| storage_error(file_id, e))
    }

    fn write_blob(&self, file_id: u64, content: &mut dyn Read) -> std::io::Result<(u64, String)> {
        fs::create_dir_all(&self.root)?;
        let final_path = self.path_for(file_id);
        let partial_path = self.root.join(format!("{}.partial", file_id));

        // the partial file never outlives a failed store
        let result = self
            .write_partial(&partial_path, content)
            .and_then(|written| fs::rename(&partial_path, &final_path).map(|_| written));
        if result.is_err() {
            let _ = fs::remove_file(&partial_path);
        }
        result
    }

    fn write_partial(&self, partial_path: &Path, content: &mut dyn Read) -> std::io::Result<(u64, String)> {
        let mut writer = BufWriter::new(File::create(partial_path)?);
        let mut hasher = StreamingHasher::new(self.algorithm);
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        writer.flush()?;
        Ok((total, hasher.finalize()))
    }
}

fn storage_error(file_id: u64, e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage {
        file_id,
        reason: e.to_string(),
    }
}

impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, content))]
    fn store(&self, file_id: u64, content: &mut dyn Read) -> EngineResult<StoredBlob> {
        let (size, digest) = self
            .write_blob(file_id, content)
            .map_err(|e| storage_error(file_id, e))?;
        debug!(file_id, size, algorithm = self.algorithm.name(), "Blob stored");
        Ok(StoredBlob {
            file_id,
            size,
            digest,
            algorithm: self.algorithm,
        })
    }
}
