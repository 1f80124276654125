use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Short content hash used for tool-version stamps and snapshot hashes.
pub fn short_hash(bytes: &[u8], len: usize) -> String {
    let mut hex = sha256_hex(bytes);
    hex.truncate(len);
    hex
}
