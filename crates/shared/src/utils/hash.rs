use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a canonical string form.
pub fn stable_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn hash_seed(seed: u64) -> String {
    stable_hash(&seed.to_string())
}

/// Hashes the compact JSON form of `value`. Used for groupings, whose JSON
/// form is fully determined by the order of their members.
pub fn hash_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let canonical = serde_json::to_string(value)?;
    Ok(stable_hash(&canonical))
}
