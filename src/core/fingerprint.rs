// src/core/fingerprint.rs

use crate::core::paths;
use std::path::Path;

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

fn truncated_hash(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hex::encode(hash.as_bytes().get(..HASH_TRUNCATE_LENGTH).unwrap_or_default())
}

/// Derives the stable catalog id of a script from its normalized absolute path.
///
/// The id only changes when the file moves; editing the file keeps it.
pub fn script_id(path: &Path) -> String {
    let normalized = paths::normalize(path);
    truncated_hash(normalized.to_string_lossy().as_bytes())
}

/// Hashes file content, used to detect that a script changed between two scans.
pub fn content_fingerprint(content: &[u8]) -> String {
    truncated_hash(content)
}
