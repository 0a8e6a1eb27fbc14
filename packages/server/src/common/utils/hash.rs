use sha2::{Digest, Sha256};

/// SHA-256 of the raw bytes as lowercase hex.
///
/// Documents are content-addressed: two downloads with the same bytes map
/// to the same hash and therefore to the same stored blob, regardless of
/// which databox entry delivered them.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
