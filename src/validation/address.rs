//! Account addresses
//!
//! An address is either a raw compressed public key or a dotted name that
//! the ledger resolves to one. Names are stored leaf-first: `shop.alice`
//! is `["shop", "alice"]`, with the root-most part last.

use std::fmt;
use thiserror::Error;

use crate::codec::{write_short_bytes, ByteReader, CodecError};
use crate::constants::{NOWHERE_KEY, SUPPLY_KEY};

const RAW_TAG: u8 = 0;
const NAME_TAG: u8 = 1;

/// Maximum length of a single name part
pub const MAX_NAME_PART_LEN: usize = 16;

/// Sigil that marks a printed name address
pub const NAME_SIGIL: char = '@';

/// Address parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid name part: {0:?}")]
    InvalidName(String),
    #[error("Invalid public key encoding")]
    InvalidKey,
}

/// 33-byte compressed public key used directly as an account
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawAddress(pub [u8; 33]);

impl RawAddress {
    /// Fee-collection source; conceptually unlimited, never tracked
    pub const NOWHERE: RawAddress = RawAddress(NOWHERE_KEY);
    /// Holder of the unminted supply
    pub const SUPPLY: RawAddress = RawAddress(SUPPLY_KEY);

    pub fn public_key(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn from_hex(hex: &str) -> Result<Self, AddressError> {
        let bytes = hex::decode(hex).map_err(|_| AddressError::InvalidKey)?;
        Self::from_slice(&bytes)
    }

    pub fn from_base58(encoded: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| AddressError::InvalidKey)?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let key: [u8; 33] = bytes.try_into().map_err(|_| AddressError::InvalidKey)?;
        Ok(RawAddress(key))
    }
}

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawAddress({})", self)
    }
}

/// Hierarchical name, leaf part first
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct NameAddress {
    parts: Vec<String>,
}

impl NameAddress {
    /// Build from leaf-first parts, checking every part
    pub fn new<I, S>(parts: I) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if let Some(bad) = parts.iter().find(|p| !is_valid_name_part(p)) {
            return Err(AddressError::InvalidName(bad.clone()));
        }
        Ok(Self { parts })
    }

    /// Parse `shop.alice` (an optional leading sigil is accepted)
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let text = text.strip_prefix(NAME_SIGIL).unwrap_or(text);
        Self::new(text.split('.'))
    }

    /// Leaf-first parts
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Prepend a new leaf
    pub fn push(&self, part: &str) -> NameAddress {
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        parts.push(part.to_string());
        parts.extend(self.parts.iter().cloned());
        NameAddress { parts }
    }

    /// Split into the leaf and the scope that owns it
    pub fn pop(&self) -> Option<(&str, NameAddress)> {
        let (first, rest) = self.parts.split_first()?;
        Some((first.as_str(), NameAddress { parts: rest.to_vec() }))
    }

    /// Root-first dotted bytes, the ordering used by the ledger index
    pub fn index_key(&self) -> Vec<u8> {
        let mut key = Vec::new();
        for (i, part) in self.parts.iter().rev().enumerate() {
            if i > 0 {
                key.push(b'.');
            }
            key.extend_from_slice(part.as_bytes());
        }
        key
    }

    fn write(&self, out: &mut Vec<u8>) {
        let count = self.parts.len().min(u8::MAX as usize);
        out.push(count as u8);
        for part in &self.parts[..count] {
            write_short_bytes(out, part.as_bytes());
        }
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_u8()?;
        let parts = (0..count)
            .map(|_| reader.read_ascii())
            .collect::<Result<Vec<_>, _>>()?;
        let name = NameAddress { parts };
        if !name.is_valid() {
            return Err(CodecError::CorruptedEncoding("invalid name part"));
        }
        Ok(name)
    }

    /// Every part passes [`is_valid_name_part`]. Only such names can be
    /// registered, and the index key is unambiguous only for them.
    pub fn is_valid(&self) -> bool {
        self.parts.len() <= u8::MAX as usize && self.parts.iter().all(|p| is_valid_name_part(p))
    }
}

impl fmt::Display for NameAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NAME_SIGIL, self.parts.join("."))
    }
}

impl fmt::Debug for NameAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameAddress({})", self)
    }
}

/// `1..=16` characters from `[a-z0-9-]`
pub fn is_valid_name_part(part: &str) -> bool {
    !part.is_empty()
        && part.len() <= MAX_NAME_PART_LEN
        && part
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Any address a transaction may name
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Raw(RawAddress),
    Name(NameAddress),
}

impl Address {
    /// Accepts `@leaf.root`, a 66-char hex key, or a base-58 key
    pub fn from_string(text: &str) -> Result<Self, AddressError> {
        if text.starts_with(NAME_SIGIL) {
            return NameAddress::parse(text).map(Address::Name);
        }
        if text.len() == 66 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return RawAddress::from_hex(text).map(Address::Raw);
        }
        if let Ok(raw) = RawAddress::from_base58(text) {
            return Ok(Address::Raw(raw));
        }
        NameAddress::parse(text).map(Address::Name)
    }

    /// The name `part` registered under this address's scope
    pub fn push(&self, part: &str) -> NameAddress {
        match self {
            Address::Raw(_) => NameAddress { parts: vec![part.to_string()] },
            Address::Name(name) => name.push(part),
        }
    }

    pub fn as_raw(&self) -> Option<&RawAddress> {
        match self {
            Address::Raw(raw) => Some(raw),
            Address::Name(_) => None,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Address::Raw(raw) => {
                out.push(RAW_TAG);
                out.extend_from_slice(&raw.0);
            }
            Address::Name(name) => {
                out.push(NAME_TAG);
                name.write(out);
            }
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            RAW_TAG => Ok(Address::Raw(RawAddress(reader.read_array()?))),
            NAME_TAG => Ok(Address::Name(NameAddress::read(reader)?)),
            _ => Err(CodecError::CorruptedEncoding("unknown address tag")),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }
}

impl From<RawAddress> for Address {
    fn from(raw: RawAddress) -> Self {
        Address::Raw(raw)
    }
}

impl From<NameAddress> for Address {
    fn from(name: NameAddress) -> Self {
        Address::Name(name)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Raw(raw) => raw.fmt(f),
            Address::Name(name) => name.fmt(f),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Raw(raw) => raw.fmt(f),
            Address::Name(name) => name.fmt(f),
        }
    }
}
