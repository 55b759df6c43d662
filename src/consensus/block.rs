//! Block structure for the Daten blockchain
//!
//! Header fields are encoded big-endian in a fixed 80-byte layout; the block
//! hash covers the header only, and the Merkle root commits to the
//! transactions.

use crate::codec::{read_framed_list, write_framed_list, ByteReader, CodecError};
use crate::crypto::{hash_bytes, Hash, MerkleError, MerkleTree};
use crate::validation::Transaction;

/// Size of the encoded header
pub const HEADER_SIZE: usize = 80;

/// Byte offset of the timestamp inside the header
pub const TIMESTAMP_OFFSET: usize = 4;

/// Byte offset of the nonce inside the header
pub const NONCE_OFFSET: usize = 76;

/// Block header containing all metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Height of this block, 0 for genesis
    pub index: u32,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u32,
    /// Hash of the previous header
    pub previous_hash: Hash,
    /// Merkle root of the transaction hashes, `None` without transactions
    pub merkle_root: Option<Hash>,
    /// Difficulty target (compact representation)
    pub difficulty: u32,
    /// Nonce used for PoW
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize the header; a missing Merkle root encodes as 32 zero bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.previous_hash.0);
        bytes.extend_from_slice(&self.merkle_root.unwrap_or_default().0);
        bytes.extend_from_slice(&self.difficulty.to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let header = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let index = reader.read_u32()?;
        let timestamp = reader.read_u32()?;
        let previous_hash = Hash(reader.read_array()?);
        let merkle_root = Hash(reader.read_array()?);
        Ok(Self {
            index,
            timestamp,
            previous_hash,
            merkle_root: (!merkle_root.is_zero()).then_some(merkle_root),
            difficulty: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// List of transactions in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block whose Merkle root matches `transactions`
    pub fn new(
        index: u32,
        timestamp: u32,
        previous_hash: Hash,
        difficulty: u32,
        transactions: Vec<Transaction>,
        nonce: u32,
    ) -> Self {
        let mut block = Self {
            header: BlockHeader {
                index,
                timestamp,
                previous_hash,
                merkle_root: None,
                difficulty,
                nonce,
            },
            transactions,
        };
        block.update_merkle_root();
        block
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    fn transaction_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    pub fn calculate_merkle_root(&self) -> Option<Hash> {
        MerkleTree::new(&self.transaction_hashes()).root()
    }

    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.calculate_merkle_root();
    }

    /// Inclusion proof for one of this block's transactions
    pub fn merkle_path(&self, tx_hash: &Hash) -> Result<Vec<Hash>, MerkleError> {
        MerkleTree::new(&self.transaction_hashes()).path(tx_hash)
    }

    /// Stored Merkle root commits to the transactions
    pub fn has_valid_merkle_root(&self) -> bool {
        self.header.merkle_root == self.calculate_merkle_root()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes();
        bytes.extend_from_slice(&Transaction::serialize_list(&self.transactions));
        bytes
    }

    pub fn serialized_size(&self) -> usize {
        self.serialize().len()
    }

    /// Decode a full block. The Merkle root is taken as stored, not recomputed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let header = BlockHeader::read(&mut reader)?;
        let transactions = Transaction::deserialize_list(reader.read_rest())?;
        Ok(Self { header, transactions })
    }

    /// Frame blocks (or just their headers) as a list
    pub fn serialize_list(blocks: &[Block], header_only: bool) -> Vec<u8> {
        let mut out = Vec::new();
        write_framed_list(&mut out, blocks, |block| {
            if header_only {
                block.header.to_bytes()
            } else {
                block.serialize()
            }
        });
        out
    }

    pub fn deserialize_list(bytes: &[u8]) -> Result<Vec<Block>, CodecError> {
        read_framed_list(bytes, Block::deserialize)
    }

    pub fn deserialize_header_list(bytes: &[u8]) -> Result<Vec<BlockHeader>, CodecError> {
        read_framed_list(bytes, BlockHeader::from_bytes)
    }
}
