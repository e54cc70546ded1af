//! Engine configuration
//!
//! One JSON document with a section per concern. Every section falls back to
//! its defaults, so `{}` is a valid configuration.
//!
//! ```json
//! {
//!   "walk": { "volumes": { "unallocated": true }, "files": { "recurse": true } },
//!   "ingest": { "container_path": "/evidence/disk.dd" },
//!   "storage": { "digest": "blake3" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::HashAlgorithm;
use crate::error::{EngineError, EngineResult};
use crate::ingest::IngestOptions;
use crate::walker::WalkConfig;

/// Application directory name under the platform data dir
const APP_DIR: &str = "evidence-walk";

/// Where the image database and extracted content live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blob_root: PathBuf,
    pub database_path: PathBuf,
    pub digest: HashAlgorithm,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            blob_root: base.join("blobs"),
            database_path: base.join("evidence.db"),
            digest: HashAlgorithm::default(),
        }
    }
}

/// Platform data dir for the engine, or the working directory when unknown
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub walk: WalkConfig,
    pub ingest: IngestOptions,
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&json)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!("Saved configuration to {:?}", path);
        Ok(())
    }
}
