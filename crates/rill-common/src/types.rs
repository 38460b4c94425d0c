//! Fixed-width identifier types.

use std::cmp::Ordering;
use std::fmt;

/// 32-byte hash value.
///
/// This is the universal key of the engine: tree keys, node content hashes
/// and ledger hashes are all `Hash256`. Values order lexicographically, which
/// for quality-indexed keys means ascending exchange-rate order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Zero hash. Also the root hash of an empty tree.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Convert to an uppercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The low 64 bits viewed as a big-endian integer.
    ///
    /// Quality-indexed directory keys store the exchange rate here so that
    /// key order equals rate order.
    pub fn low_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[24..32]);
        u64::from_be_bytes(buf)
    }

    /// Copy of this hash with the low 64 bits replaced by `value`
    /// (big-endian).
    pub fn with_low_u64(&self, value: u64) -> Self {
        let mut out = self.0;
        out[24..32].copy_from_slice(&value.to_be_bytes());
        Self(out)
    }

    /// Returns the nibble (half-byte) at `depth`, counted from the most
    /// significant end. Tree traversal consumes one nibble per level.
    pub fn nibble(&self, depth: usize) -> usize {
        debug_assert!(depth < 64);
        let byte = self.0[depth / 2];
        if depth % 2 == 0 {
            (byte >> 4) as usize
        } else {
            (byte & 0x0f) as usize
        }
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 160-bit account identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    /// Zero account.
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 20]> for AccountId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 160-bit currency code.
///
/// Shares the width of [`AccountId`] but is a distinct type so book and
/// trust-line keys cannot mix up the argument order silently.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Currency(pub [u8; 20]);

impl Currency {
    /// The native currency (all zero).
    pub const NATIVE: Self = Self([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn is_native(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.to_hex())
    }
}

impl From<[u8; 20]> for Currency {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Currency {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_hex_roundtrip() {
        let hash = Hash256::from_bytes([0xAB; 32]);
        let parsed = Hash256::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_hash256_bad_hex() {
        assert!(Hash256::from_hex("abcd").is_err());
        assert!(Hash256::from_hex("zz").is_err());
    }

    #[test]
    fn test_hash256_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256::from_bytes([1; 32]).is_zero());
    }

    #[test]
    fn test_low_u64_view() {
        let base = Hash256::from_hex(
            "D2DC44E5DC189318DB36EF87D2104CDF0A0FE3A4B698BEEE55038D7EA4C68000",
        )
        .unwrap();
        assert_eq!(base.low_u64(), 6125895493223874560);

        let replaced = base.with_low_u64(42);
        assert_eq!(replaced.low_u64(), 42);
        assert_eq!(&replaced.0[..24], &base.0[..24]);
    }

    #[test]
    fn test_nibbles() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xA5;
        bytes[31] = 0x3C;
        let h = Hash256::from_bytes(bytes);
        assert_eq!(h.nibble(0), 0xA);
        assert_eq!(h.nibble(1), 0x5);
        assert_eq!(h.nibble(62), 0x3);
        assert_eq!(h.nibble(63), 0xC);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut lo = [0u8; 32];
        let mut hi = [0u8; 32];
        lo[0] = 1;
        hi[0] = 2;
        assert!(Hash256::from_bytes(lo) < Hash256::from_bytes(hi));
    }
}
