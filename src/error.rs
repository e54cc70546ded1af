//! Error types for image traversal and ingestion

use std::fmt;
use std::io;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while walking images and archives or ingesting results
#[derive(Debug)]
pub enum EngineError {
    /// Image or segment I/O failure
    Io(io::Error),
    /// No supported file system was detected at the byte offset
    NoFileSystem { offset: u64 },
    /// A format decoder reported corrupt or unreadable metadata
    Decoder { decoder: String, reason: String },
    /// Logical archive could not be read
    Archive(String),
    /// Entry content was shorter than its declared size
    ShortRead { name: String, expected: u64, actual: u64 },
    /// A caller-supplied hook failed
    Hook(String),
    /// SQLite error
    Database(rusqlite::Error),
    /// Image database rejected a record
    Persistence(String),
    /// Blob storage failed for a file id
    Storage { file_id: u64, reason: String },
    /// Invalid configuration
    Config(String),
    /// Serialization error
    Json(serde_json::Error),
    /// Image could not be opened
    InvalidImage(String),
}

impl EngineError {
    /// Build a decoder error
    pub fn decoder(decoder: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Decoder {
            decoder: decoder.into(),
            reason: reason.into(),
        }
    }

    /// Build a hook error
    pub fn hook(reason: impl Into<String>) -> Self {
        EngineError::Hook(reason.into())
    }

    /// True when nothing recognizable was found at an offset
    pub fn is_detection_failure(&self) -> bool {
        matches!(self, EngineError::NoFileSystem { .. })
    }

    /// Failures that only abandon the partition being walked during volume enumeration.
    /// Image I/O and ingestion storage failures still end the whole walk.
    pub fn is_recoverable_in_partition(&self) -> bool {
        matches!(
            self,
            EngineError::NoFileSystem { .. } | EngineError::Decoder { .. } | EngineError::Hook(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::NoFileSystem { offset } => {
                write!(f, "No supported file system found at offset {}", offset)
            }
            EngineError::Decoder { decoder, reason } => {
                write!(f, "{} decoder error: {}", decoder, reason)
            }
            EngineError::Archive(e) => write!(f, "Archive error: {}", e),
            EngineError::ShortRead { name, expected, actual } => write!(
                f,
                "Short read for '{}': expected {} bytes, got {}",
                name, expected, actual
            ),
            EngineError::Hook(e) => write!(f, "Hook failed: {}", e),
            EngineError::Database(e) => write!(f, "Database error: {}", e),
            EngineError::Persistence(e) => write!(f, "Persistence error: {}", e),
            EngineError::Storage { file_id, reason } => {
                write!(f, "Failed to store content for file {}: {}", file_id, reason)
            }
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::Json(e) => write!(f, "Serialization error: {}", e),
            EngineError::InvalidImage(e) => write!(f, "Invalid image: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Database(e) => Some(e),
            EngineError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Database(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_recoverability() {
        assert!(EngineError::NoFileSystem { offset: 0 }.is_recoverable_in_partition());
        assert!(EngineError::decoder("ntfs", "bad MFT").is_recoverable_in_partition());
        assert!(EngineError::hook("boom").is_recoverable_in_partition());
        let storage = EngineError::Storage {
            file_id: 3,
            reason: "disk full".to_string(),
        };
        assert!(!storage.is_recoverable_in_partition());
        let io = EngineError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(!io.is_recoverable_in_partition());
    }

    #[test]
    fn test_display() {
        let err = EngineError::ShortRead {
            name: "a.txt".to_string(),
            expected: 11,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Short read for 'a.txt': expected 11 bytes, got 4");
        assert!(EngineError::NoFileSystem { offset: 512 }.is_detection_failure());
    }
}
