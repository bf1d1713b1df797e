//! Hash helpers shared by entries and blocks.

use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 of arbitrary bytes.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Count leading zero bits of a hex-encoded digest.
///
/// Stops at the first non-hex character.
pub fn leading_zero_bits(hex_digest: &str) -> u32 {
    let mut bits = 0;
    for c in hex_digest.chars() {
        match c.to_digit(16) {
            Some(0) => bits += 4,
            Some(nibble) => {
                // nibble occupies the low 4 bits of a u32
                bits += nibble.leading_zeros() - 28;
                break;
            }
            None => break,
        }
    }
    bits
}

/// Whether a digest satisfies a leading-zero-bit difficulty.
pub fn meets_difficulty(hex_digest: &str, difficulty: u32) -> bool {
    difficulty == 0 || leading_zero_bits(hex_digest) >= difficulty
}
