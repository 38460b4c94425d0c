//! Half-SHA-512 hashing.
//!
//! This module provides the `sha512_half` digest in both single-shot and
//! streaming modes. All functions return [`Hash256`], the first 32 bytes of
//! the SHA-512 digest.
//!
//! # Single-shot Hashing
//!
//! For hashing data that is available all at once:
//!
//! ```
//! use rill_crypto::sha512_half;
//!
//! let hash = sha512_half(b"hello world");
//! ```
//!
//! # Streaming Hashing
//!
//! For hashing data that arrives in chunks:
//!
//! ```
//! use rill_crypto::Sha512HalfHasher;
//!
//! let mut hasher = Sha512HalfHasher::new();
//! hasher.update(b"hello ");
//! hasher.update(b"world");
//! let hash = hasher.finalize();
//! ```

use rill_common::Hash256;
use sha2::{Digest, Sha512};

fn truncate(digest: &[u8]) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest[..32]);
    Hash256(bytes)
}

/// Computes the half-SHA-512 hash of the given data.
pub fn sha512_half(data: &[u8]) -> Hash256 {
    let mut hasher = Sha512::new();
    hasher.update(data);
    truncate(&hasher.finalize())
}

/// Computes the half-SHA-512 hash of multiple data chunks.
///
/// Equivalent to concatenating all chunks and hashing the result, without
/// the intermediate buffer.
pub fn sha512_half_multi(chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    truncate(&hasher.finalize())
}

/// A streaming half-SHA-512 hasher for incremental computation.
pub struct Sha512HalfHasher {
    inner: Sha512,
}

impl Sha512HalfHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha512::new(),
        }
    }

    /// Feeds data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consumes the hasher and returns the computed hash.
    pub fn finalize(self) -> Hash256 {
        truncate(&self.inner.finalize())
    }
}

impl Default for Sha512HalfHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_half() {
        // First half of the NIST SHA-512 vector for "abc".
        let hash = sha512_half(b"abc");
        assert_eq!(
            hash.to_hex(),
            "DDAF35A193617ABACC417349AE20413112E6FA4E89A97EA20A9EEEE64B55D39A"
        );
    }

    #[test]
    fn test_sha512_half_empty() {
        let hash = sha512_half(b"");
        assert_eq!(
            hash.to_hex(),
            "CF83E1357EEFB8BDF1542850D66D8007D620E4050B5715DC83F4A921D36CE9CE"
        );
    }

    #[test]
    fn test_multi_matches_concat() {
        let hash1 = sha512_half(b"helloworld");
        let hash2 = sha512_half_multi(&[b"hello", b"world"]);
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_streaming_hasher() {
        let mut hasher = Sha512HalfHasher::new();
        hasher.update(b"hello");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), sha512_half(b"helloworld"));
    }
}
