//! Hashing primitives for the rill ledger engine.
//!
//! Every authenticated digest in the system is `sha512_half`: the first 32
//! bytes of SHA-512, computed over a domain-separating [`HashPrefix`]
//! followed by the body.

pub mod hash;
pub mod prefix;

pub use hash::{sha512_half, sha512_half_multi, Sha512HalfHasher};
pub use prefix::HashPrefix;
