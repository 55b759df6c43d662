//! Transaction structure
//!
//! Account-based transfers that may also claim a name under the
//! destination's scope.

use crate::codec::{read_framed_list, write_framed_list, write_short_bytes, ByteReader, CodecError};
use crate::constants::VERSION;
use crate::crypto::{hash_bytes, Hash, PrivateKey, SignatureError};

use super::{is_valid_name_part, Address, Data, NameAddress, RawAddress};

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version
    pub version: u8,
    /// The only block index this transaction may be included at
    pub target: u32,
    /// Fee paid by the source on top of `amount`
    pub fee: u64,
    /// Claimed name; empty means no claim
    pub name: String,
    /// Paying account
    pub source: Address,
    /// Receiving account, and the scope of any claimed name
    pub destination: Address,
    /// Amount in base units
    pub amount: u64,
    /// Opaque payload
    pub data: Data,
    /// DER signature over [`Transaction::signable`]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Create an unsigned transaction at the current protocol version
    pub fn new(target: u32, source: Address, destination: Address, amount: u64, fee: u64) -> Self {
        Self {
            version: VERSION,
            target,
            fee,
            name: String::new(),
            source,
            destination,
            amount,
            data: Data::None,
            signature: Vec::new(),
        }
    }

    /// Unsigned, fee-less transfer out of a sentinel account
    pub fn from_sentinel(
        version: u8,
        target: u32,
        source: RawAddress,
        destination: Address,
        amount: u64,
    ) -> Self {
        Self {
            version,
            ..Self::new(target, Address::Raw(source), destination, amount, 0)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data = data;
        self
    }

    /// Sign the signable encoding with `key`
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignatureError> {
        self.signature = key.sign(&self.signable())?;
        Ok(())
    }

    /// Full encoding, signature included
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.signable();
        write_short_bytes(&mut out, &self.signature);
        out
    }

    /// Encoding without the signature field; this is what gets signed
    pub fn signable(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.version);
        out.extend_from_slice(&self.target.to_be_bytes());
        out.extend_from_slice(&self.fee.to_be_bytes());
        write_short_bytes(&mut out, self.name.as_bytes());
        self.source.write(&mut out);
        self.destination.write(&mut out);
        out.extend_from_slice(&self.amount.to_be_bytes());
        self.data.write(&mut out);
        out
    }

    /// Decode a full encoding; the buffer must be consumed exactly
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self {
            version: reader.read_u8()?,
            target: reader.read_u32()?,
            fee: reader.read_u64()?,
            name: reader.read_ascii()?,
            source: Address::read(&mut reader)?,
            destination: Address::read(&mut reader)?,
            amount: reader.read_u64()?,
            data: Data::read(&mut reader)?,
            signature: reader.read_short_bytes()?.to_vec(),
        };
        reader.finish()?;
        Ok(tx)
    }

    /// Identity: hash of the full encoding, signature included
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.serialize())
    }

    pub fn serialized_size(&self) -> usize {
        self.serialize().len()
    }

    /// The fully-qualified name this transaction registers, if any
    pub fn claimed_name(&self) -> Option<NameAddress> {
        if self.name.is_empty() {
            None
        } else {
            Some(self.destination.push(&self.name))
        }
    }

    /// Structural check: an empty name or a single valid name part, and
    /// every variable-length field fits its length prefix
    pub fn is_well_formed(&self) -> bool {
        (self.name.is_empty() || is_valid_name_part(&self.name))
            && self.signature.len() <= u8::MAX as usize
            && self.data.is_encodable()
    }

    pub fn serialize_list(transactions: &[Transaction]) -> Vec<u8> {
        let mut out = Vec::new();
        write_framed_list(&mut out, transactions, Transaction::serialize);
        out
    }

    pub fn deserialize_list(bytes: &[u8]) -> Result<Vec<Transaction>, CodecError> {
        read_framed_list(bytes, Transaction::deserialize)
    }
}
