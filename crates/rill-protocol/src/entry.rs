//! Ledger entries.
//!
//! A [`LedgerEntry`] is a typed, serialised record addressed by a 256-bit
//! key inside the state tree: a type tag, its tree index, and a field map.
//! The canonical encoding orders fields by field code, so two entries with
//! the same contents always serialise to the same bytes.

use std::collections::BTreeMap;

use rill_common::{AccountId, Hash256};

use crate::error::ProtocolError;
use crate::serializer::{Serializer, SerializerIterator};
use crate::Result;

/// Entry type tags. Values are the ASCII codes of their mnemonics and are
/// part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum LedgerEntryType {
    /// An account: balance, sequence, owner count (`a`).
    AccountRoot = 0x0061,
    /// One page of a directory (`d`).
    DirectoryNode = 0x0064,
    /// A generator map (`g`).
    Generator = 0x0067,
    /// A trust line between two accounts (`r`).
    RippleState = 0x0072,
    /// An order-book offer (`o`).
    Offer = 0x006F,
    /// A historical-hash skiplist page (`h`).
    LedgerHashes = 0x0068,
    /// The enabled-amendment table (`f`).
    Amendments = 0x0066,
    /// The fee schedule (`s`).
    FeeSettings = 0x0073,
    /// A sequence-reservation ticket (`T`).
    Ticket = 0x0054,
}

impl LedgerEntryType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0061 => Some(Self::AccountRoot),
            0x0064 => Some(Self::DirectoryNode),
            0x0067 => Some(Self::Generator),
            0x0072 => Some(Self::RippleState),
            0x006F => Some(Self::Offer),
            0x0068 => Some(Self::LedgerHashes),
            0x0066 => Some(Self::Amendments),
            0x0073 => Some(Self::FeeSettings),
            0x0054 => Some(Self::Ticket),
            _ => None,
        }
    }
}

/// Field codes. The numeric code is the canonical sort key of the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldId {
    Flags = 1,
    Sequence = 2,
    Balance = 3,
    OwnerCount = 4,
    PreviousTxnId = 5,
    PreviousTxnLgrSeq = 6,
    Account = 7,
    Owner = 8,
    RootIndex = 9,
    Indexes = 10,
    IndexNext = 11,
    IndexPrevious = 12,
    OwnerNode = 13,
    BookDirectory = 14,
    BookNode = 15,
    ExchangeRate = 16,
    TakerPaysCurrency = 17,
    TakerPaysIssuer = 18,
    TakerGetsCurrency = 19,
    TakerGetsIssuer = 20,
    Expiration = 21,
    LowNode = 22,
    HighNode = 23,
    LastLedgerSequence = 24,
    Hashes = 25,
    Amendments = 26,
    BaseFee = 27,
    ReferenceFeeUnits = 28,
    ReserveBase = 29,
    ReserveIncrement = 30,
    Generator = 31,
}

impl FieldId {
    pub fn from_code(code: u8) -> Option<Self> {
        use FieldId::*;
        Some(match code {
            1 => Flags,
            2 => Sequence,
            3 => Balance,
            4 => OwnerCount,
            5 => PreviousTxnId,
            6 => PreviousTxnLgrSeq,
            7 => Account,
            8 => Owner,
            9 => RootIndex,
            10 => Indexes,
            11 => IndexNext,
            12 => IndexPrevious,
            13 => OwnerNode,
            14 => BookDirectory,
            15 => BookNode,
            16 => ExchangeRate,
            17 => TakerPaysCurrency,
            18 => TakerPaysIssuer,
            19 => TakerGetsCurrency,
            20 => TakerGetsIssuer,
            21 => Expiration,
            22 => LowNode,
            23 => HighNode,
            24 => LastLedgerSequence,
            25 => Hashes,
            26 => Amendments,
            27 => BaseFee,
            28 => ReferenceFeeUnits,
            29 => ReserveBase,
            30 => ReserveIncrement,
            31 => Generator,
            _ => return None,
        })
    }
}

/// A field value. Self-describing on the wire via a one-byte kind code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    H160([u8; 20]),
    H256(Hash256),
    /// A currency amount in drops.
    Amount(u64),
    Account(AccountId),
    Blob(Vec<u8>),
    V256(Vec<Hash256>),
}

impl FieldValue {
    fn kind_code(&self) -> u8 {
        match self {
            FieldValue::U8(_) => 1,
            FieldValue::U16(_) => 2,
            FieldValue::U32(_) => 3,
            FieldValue::U64(_) => 4,
            FieldValue::H160(_) => 5,
            FieldValue::H256(_) => 6,
            FieldValue::Amount(_) => 7,
            FieldValue::Account(_) => 8,
            FieldValue::Blob(_) => 9,
            FieldValue::V256(_) => 10,
        }
    }

    fn serialize_payload(&self, s: &mut Serializer) -> Result<()> {
        match self {
            FieldValue::U8(v) => s.add8(*v),
            FieldValue::U16(v) => s.add16(*v),
            FieldValue::U32(v) => s.add32(*v),
            FieldValue::U64(v) => s.add64(*v),
            FieldValue::H160(v) => s.add160(v),
            FieldValue::H256(v) => s.add256(v),
            FieldValue::Amount(v) => s.add64(*v),
            FieldValue::Account(v) => s.add160(v.as_bytes()),
            FieldValue::Blob(v) => s.add_vl(v)?,
            FieldValue::V256(v) => {
                s.add32(v.len() as u32);
                for hash in v {
                    s.add256(hash);
                }
            }
        }
        Ok(())
    }

    fn deserialize_payload(kind: u8, it: &mut SerializerIterator<'_>) -> Result<Self> {
        Ok(match kind {
            1 => FieldValue::U8(it.get8()?),
            2 => FieldValue::U16(it.get16()?),
            3 => FieldValue::U32(it.get32()?),
            4 => FieldValue::U64(it.get64()?),
            5 => FieldValue::H160(it.get160()?),
            6 => FieldValue::H256(it.get256()?),
            7 => FieldValue::Amount(it.get64()?),
            8 => FieldValue::Account(AccountId::from_bytes(it.get160()?)),
            9 => FieldValue::Blob(it.get_vl()?),
            10 => {
                let count = it.get32()? as usize;
                // A count the input cannot possibly satisfy is malformed.
                if count > it.remaining() / 32 {
                    return Err(ProtocolError::BadField(format!(
                        "vector declares {count} hashes, input has {} bytes",
                        it.remaining()
                    )));
                }
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    hashes.push(it.get256()?);
                }
                FieldValue::V256(hashes)
            }
            other => {
                return Err(ProtocolError::BadField(format!(
                    "unknown field kind {other}"
                )))
            }
        })
    }
}

/// A typed, keyed state record.
///
/// Entries returned from immutable accessors are shared and must not be
/// mutated; mutate a clone and write it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    entry_type: LedgerEntryType,
    index: Hash256,
    fields: BTreeMap<FieldId, FieldValue>,
}

impl LedgerEntry {
    /// Create an empty entry of the given type at `index`.
    pub fn new(entry_type: LedgerEntryType, index: Hash256) -> Self {
        Self {
            entry_type,
            index,
            fields: BTreeMap::new(),
        }
    }

    pub fn entry_type(&self) -> LedgerEntryType {
        self.entry_type
    }

    /// The entry's tree key.
    pub fn index(&self) -> Hash256 {
        self.index
    }

    pub fn has_field(&self, id: FieldId) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldValue> {
        self.fields.get(&id)
    }

    pub fn set_field(&mut self, id: FieldId, value: FieldValue) {
        self.fields.insert(id, value);
    }

    pub fn remove_field(&mut self, id: FieldId) {
        self.fields.remove(&id);
    }

    pub fn get_u32(&self, id: FieldId) -> Option<u32> {
        match self.fields.get(&id) {
            Some(FieldValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, id: FieldId) -> Option<u64> {
        match self.fields.get(&id) {
            Some(FieldValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_amount(&self, id: FieldId) -> Option<u64> {
        match self.fields.get(&id) {
            Some(FieldValue::Amount(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_account(&self, id: FieldId) -> Option<AccountId> {
        match self.fields.get(&id) {
            Some(FieldValue::Account(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_h160(&self, id: FieldId) -> Option<[u8; 20]> {
        match self.fields.get(&id) {
            Some(FieldValue::H160(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_h256(&self, id: FieldId) -> Option<Hash256> {
        match self.fields.get(&id) {
            Some(FieldValue::H256(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_blob(&self, id: FieldId) -> Option<&[u8]> {
        match self.fields.get(&id) {
            Some(FieldValue::Blob(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_v256(&self, id: FieldId) -> Option<&[Hash256]> {
        match self.fields.get(&id) {
            Some(FieldValue::V256(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_u32(&mut self, id: FieldId, value: u32) {
        self.set_field(id, FieldValue::U32(value));
    }

    pub fn set_u64(&mut self, id: FieldId, value: u64) {
        self.set_field(id, FieldValue::U64(value));
    }

    pub fn set_amount(&mut self, id: FieldId, value: u64) {
        self.set_field(id, FieldValue::Amount(value));
    }

    pub fn set_account(&mut self, id: FieldId, value: AccountId) {
        self.set_field(id, FieldValue::Account(value));
    }

    pub fn set_h160(&mut self, id: FieldId, value: [u8; 20]) {
        self.set_field(id, FieldValue::H160(value));
    }

    pub fn set_h256(&mut self, id: FieldId, value: Hash256) {
        self.set_field(id, FieldValue::H256(value));
    }

    pub fn set_blob(&mut self, id: FieldId, value: Vec<u8>) {
        self.set_field(id, FieldValue::Blob(value));
    }

    pub fn set_v256(&mut self, id: FieldId, value: Vec<Hash256>) {
        self.set_field(id, FieldValue::V256(value));
    }

    /// Iterate over the fields in canonical order.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldId, &FieldValue)> {
        self.fields.iter()
    }

    /// Every account referenced by this entry's fields.
    pub fn account_fields(&self) -> Vec<AccountId> {
        self.fields
            .values()
            .filter_map(|value| match value {
                FieldValue::Account(account) => Some(*account),
                _ => None,
            })
            .collect()
    }

    /// Append the canonical encoding (type tag, then fields sorted by code).
    ///
    /// The tree index is not part of the encoding; it is the leaf tag.
    pub fn serialize_to(&self, s: &mut Serializer) -> Result<()> {
        s.add16(self.entry_type as u16);
        for (id, value) in &self.fields {
            s.add8(*id as u8);
            s.add8(value.kind_code());
            value.serialize_payload(s)?;
        }
        Ok(())
    }

    /// The canonical encoding as a byte vector.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut s = Serializer::new();
        self.serialize_to(&mut s)?;
        Ok(s.into_bytes())
    }

    /// Decode an entry stored under tree key `index`.
    pub fn from_bytes(data: &[u8], index: Hash256) -> Result<Self> {
        let mut it = SerializerIterator::new(data);
        let type_tag = it.get16()?;
        let entry_type = LedgerEntryType::from_u16(type_tag)
            .ok_or(ProtocolError::UnknownEntryType(type_tag))?;
        let mut fields = BTreeMap::new();
        while !it.at_end() {
            let code = it.get8()?;
            let id = FieldId::from_code(code).ok_or(ProtocolError::UnknownField(code))?;
            let kind = it.get8()?;
            let value = FieldValue::deserialize_payload(kind, &mut it)?;
            fields.insert(id, value);
        }
        Ok(Self {
            entry_type,
            index,
            fields,
        })
    }
}
