use blake3::Hasher;

/// Computes the 32-byte BLAKE3 digest identifying `path` within `namespace`.
///
/// The separator keeps `("AB", "/c")` and `("A", "B/c")` apart. Equal inputs always map
/// to the same digest, so this is the local tier's map key.
#[inline]
pub fn hash_cache_key(namespace: &str, path: &str) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Computes a 64-bit fingerprint of the input, truncated from the BLAKE3 output.
///
/// Used for log correlation only. A collision merges two log lines, never two cache
/// entries; use [`hash_cache_key`] wherever identity matters.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}
