//! Stable key derivation
//!
//! Keys must be identical across process restarts and poll cycles, so they are
//! derived with SHA-256 rather than `std::hash` (whose output is not stable).

use sha2::{Digest, Sha256};

/// Hash colon-joined parts into a lowercase hex digest.
///
/// Absent optional parts should be passed as an empty string so that
/// `("matrix", "", "$q")` and `("matrix", "!room", "$q")` stay distinct.
pub fn stable_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    format!("{:x}", hasher.finalize())
}
