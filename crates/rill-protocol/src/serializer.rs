//! Byte-exact serialization.
//!
//! [`Serializer`] appends big-endian primitives and length-prefixed blobs to
//! a growing buffer; [`SerializerIterator`] reads them back. All multi-byte
//! integers are big-endian. The variable-length prefix packs lengths up to
//! 918744 bytes into one to three bytes; the exact breakpoints are part of
//! the wire contract and must never change.

use rill_common::Hash256;
use rill_crypto::{sha512_half, HashPrefix};

use crate::error::ProtocolError;
use crate::Result;

/// Longest blob a VL prefix can describe.
pub const MAX_VL_LENGTH: usize = 918744;

/// An append-only byte writer.
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    data: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn add8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn add16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn add32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn add64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a 160-bit value.
    pub fn add160(&mut self, value: &[u8; 20]) {
        self.data.extend_from_slice(value);
    }

    /// Append a 256-bit value.
    pub fn add256(&mut self, value: &Hash256) {
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Append a domain-separating hash prefix.
    pub fn add_prefix(&mut self, prefix: HashPrefix) {
        self.data.extend_from_slice(&prefix.to_be_bytes());
    }

    /// Append raw bytes with no length prefix.
    pub fn add_raw(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a blob with its self-describing length prefix.
    pub fn add_vl(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        if len <= 192 {
            self.data.push(len as u8);
        } else if len <= 12480 {
            let rest = len - 193;
            self.data.push(193 + (rest >> 8) as u8);
            self.data.push((rest & 0xff) as u8);
        } else if len <= MAX_VL_LENGTH {
            let rest = len - 12481;
            self.data.push(241 + (rest >> 16) as u8);
            self.data.push(((rest >> 8) & 0xff) as u8);
            self.data.push((rest & 0xff) as u8);
        } else {
            return Err(ProtocolError::Oversize(len));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// The accumulated bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the serializer, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Half-SHA-512 of the accumulated bytes.
    pub fn sha512_half(&self) -> Hash256 {
        sha512_half(&self.data)
    }
}

/// A cursor reading the formats [`Serializer`] writes.
#[derive(Debug)]
pub struct SerializerIterator<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SerializerIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(ProtocolError::ShortRead {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn get160(&mut self) -> Result<[u8; 20]> {
        let bytes = self.take(20)?;
        let mut buf = [0u8; 20];
        buf.copy_from_slice(bytes);
        Ok(buf)
    }

    pub fn get256(&mut self) -> Result<Hash256> {
        let bytes = self.take(32)?;
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(Hash256(buf))
    }

    /// Read a length-prefixed blob.
    pub fn get_vl(&mut self) -> Result<Vec<u8>> {
        let b1 = self.get8()? as usize;
        let len = if b1 <= 192 {
            b1
        } else if b1 <= 240 {
            let b2 = self.get8()? as usize;
            193 + (b1 - 193) * 256 + b2
        } else if b1 <= 254 {
            let b2 = self.get8()? as usize;
            let b3 = self.get8()? as usize;
            12481 + (b1 - 241) * 65536 + b2 * 256 + b3
        } else {
            return Err(ProtocolError::BadLengthPrefix(format!(
                "reserved first byte {b1}"
            )));
        };
        if len > MAX_VL_LENGTH {
            return Err(ProtocolError::BadLengthPrefix(format!(
                "declared length {len} out of range"
            )));
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Bytes remaining past the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor has consumed all input.
    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut s = Serializer::new();
        s.add8(0x12);
        s.add16(0x3456);
        s.add32(0x789ABCDE);
        s.add64(0x0123456789ABCDEF);
        s.add160(&[0xAA; 20]);
        s.add256(&Hash256::from_bytes([0xBB; 32]));

        let mut it = SerializerIterator::new(s.as_slice());
        assert_eq!(it.get8().unwrap(), 0x12);
        assert_eq!(it.get16().unwrap(), 0x3456);
        assert_eq!(it.get32().unwrap(), 0x789ABCDE);
        assert_eq!(it.get64().unwrap(), 0x0123456789ABCDEF);
        assert_eq!(it.get160().unwrap(), [0xAA; 20]);
        assert_eq!(it.get256().unwrap(), Hash256::from_bytes([0xBB; 32]));
        assert!(it.at_end());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut s = Serializer::new();
        s.add32(1);
        assert_eq!(s.as_slice(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_vl_prefix_breakpoints() {
        for len in [0usize, 1, 192, 193, 500, 12480, 12481, 20000] {
            let blob = vec![0x5A; len];
            let mut s = Serializer::new();
            s.add_vl(&blob).unwrap();

            let expected_prefix = if len <= 192 {
                1
            } else if len <= 12480 {
                2
            } else {
                3
            };
            assert_eq!(s.len(), len + expected_prefix, "len {len}");

            let mut it = SerializerIterator::new(s.as_slice());
            assert_eq!(it.get_vl().unwrap(), blob);
            assert!(it.at_end());
        }
    }

    #[test]
    fn test_vl_oversize_rejected() {
        let blob = vec![0u8; MAX_VL_LENGTH + 1];
        let mut s = Serializer::new();
        assert!(matches!(s.add_vl(&blob), Err(ProtocolError::Oversize(_))));
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut it = SerializerIterator::new(&[0x01, 0x02]);
        assert!(it.get32().is_err());
    }

    #[test]
    fn test_truncated_vl_fails() {
        // Declares 10 bytes but supplies 2.
        let mut it = SerializerIterator::new(&[10, 0xAB, 0xCD]);
        assert!(it.get_vl().is_err());
    }

    #[test]
    fn test_reserved_vl_prefix_fails() {
        let mut it = SerializerIterator::new(&[255, 0, 0, 0]);
        assert!(it.get_vl().is_err());
    }

    #[test]
    fn test_sha512_half_with_prefix() {
        let mut s = Serializer::new();
        s.add_prefix(HashPrefix::LedgerMaster);
        s.add32(1);
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x4C57_5200u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());
        assert_eq!(s.sha512_half(), sha512_half(&raw));
    }
}
