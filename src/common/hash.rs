// Content digests for stored blobs
//
// MD5/SHA-1 match what examiners compare against legacy tooling, SHA-256 is
// the default record digest, BLAKE3 is offered for large evidence sets.

use blake3::Hasher as Blake3Hasher;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;


/// Supported digest algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Get the canonical algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

/// Incremental hasher over all supported algorithms
/// Blake3Hasher is boxed because it's ~1920 bytes
pub enum StreamingHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Blake3(Box<Blake3Hasher>),
}

impl StreamingHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => StreamingHasher::Md5(Md5::new()),
            HashAlgorithm::Sha1 => StreamingHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => StreamingHasher::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => StreamingHasher::Blake3(Box::new(Blake3Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Md5(h) => Digest::update(h, data),
            StreamingHasher::Sha1(h) => Digest::update(h, data),
            StreamingHasher::Sha256(h) => Digest::update(h, data),
            StreamingHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finalize and return the hash as a lowercase hex string
    pub fn finalize(self) -> String {
        match self {
            StreamingHasher::Md5(h) => hex::encode(h.finalize()),
            StreamingHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamingHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamingHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// One-shot hash of a buffer
pub fn compute_hash(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = StreamingHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}
