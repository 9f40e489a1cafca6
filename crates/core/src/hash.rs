//! Content hashing for duplicate detection.

use sha2::{Digest, Sha256};

/// sha-256 of the input, hex-encoded.
///
/// Used both as the variant content hash (title+description) and as the
/// asset checksum (raw bytes).
pub fn content_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}
