//! Mining template protocol
//!
//! External workers get the serialized header of a candidate, where the
//! nonce and timestamp live inside it, and the target to beat. They send
//! back a header with those two fields changed.

use crate::codec::CodecError;
use crate::consensus::{decompress, Block, BlockHeader, Target, HEADER_SIZE, NONCE_OFFSET, TIMESTAMP_OFFSET};

/// Work handed to an external miner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningTemplate {
    /// Serialized candidate header
    pub header: Vec<u8>,
    pub nonce_offset: usize,
    pub nonce_size: usize,
    pub timestamp_offset: usize,
    pub timestamp_size: usize,
    /// Decompressed target the header hash must not exceed
    pub target: Target,
}

impl MiningTemplate {
    /// `None` when the candidate's target cannot be decoded
    pub fn from_block(block: &Block) -> Option<Self> {
        Some(Self {
            header: block.header.to_bytes(),
            nonce_offset: NONCE_OFFSET,
            nonce_size: 4,
            timestamp_offset: TIMESTAMP_OFFSET,
            timestamp_size: 4,
            target: decompress(block.header.difficulty)?,
        })
    }
}

/// Copy the worker-controlled fields of `solved` into `candidate`.
///
/// Returns `false` when anything other than nonce and timestamp differs, in
/// which case `candidate` is left untouched.
pub fn apply_solution(candidate: &mut Block, solved: &[u8]) -> Result<bool, CodecError> {
    if solved.len() != HEADER_SIZE {
        return Err(CodecError::CorruptedEncoding("header size"));
    }
    let solved = BlockHeader::from_bytes(solved)?;
    let expected = BlockHeader {
        nonce: solved.nonce,
        timestamp: solved.timestamp,
        ..candidate.header.clone()
    };
    if solved != expected {
        return Ok(false);
    }
    candidate.header = solved;
    Ok(true)
}
