// Common utilities shared by the bundled decoders and storage

pub mod binary;
pub mod hash;
pub mod segments;

pub use hash::{compute_hash, HashAlgorithm, StreamingHasher};
pub use segments::{discover_numbered_segments, is_numbered_segment};

// Shared constants
pub const BUFFER_SIZE: usize = 1024 * 1024; // 1MB copy buffer for blob streaming
