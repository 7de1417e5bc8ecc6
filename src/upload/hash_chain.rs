//! Hash-chain finalizer
//!
//! Each accepted chunk is hashed as it streams in; the ordered hex digests
//! are reduced into a single file-level hash at finalize time. The reduction
//! is a left fold over the hex strings: the first digest seeds the
//! accumulator, and every later step hashes the concatenation of the
//! accumulator with the next digest. This fingerprints the whole upload
//! without re-reading the assembled file.

use sha2::{Digest, Sha256};

/// SHA-256 of `data`, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reduce ordered chunk digests into the file-level hash.
///
/// Returns `None` for an empty sequence. For a single chunk the file hash
/// is that chunk's digest unchanged.
pub fn fold_chunk_hashes(hashes: &[String]) -> Option<String> {
    let mut iter = hashes.iter();
    let mut acc = iter.next()?.clone();
    for next in iter {
        acc.push_str(next);
        acc = sha256_hex(acc.as_bytes());
    }
    Some(acc)
}
