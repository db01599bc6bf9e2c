// Cryptographic utilities

use base64::Engine;
use sha2::{Digest, Sha256};

/// SHA-256 base64 digest (STANDARD).
pub fn sha256_base64(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Compute a safe fingerprint for a secret (hash only; never log the raw secret).
///
/// Truncated to 12 characters: enough to correlate two log lines, useless for recovery.
pub fn secret_fingerprint(input: &str) -> String {
    let full = sha256_base64(input.as_bytes());
    full.chars().take(12).collect()
}
