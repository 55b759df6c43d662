//! Block and transaction validation errors, plus the chain-independent
//! block checks.
//!
//! Everything here is pure. Checks that need the ledger live on the chain
//! engine.

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ChainParams;
use crate::consensus::{decompress, less_or_equal, Block};

/// Validation errors. Each rejects a single candidate and never touches
/// stored state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Block too large")]
    BlockTooLarge,
    #[error("Invalid merkle root")]
    InvalidBlock,
    #[error("Block is older than the tip")]
    BlockOld,
    #[error("Invalid block index")]
    InvalidIndex,
    #[error("Invalid previous hash")]
    InvalidPreviousHash,
    #[error("Invalid timestamp")]
    InvalidTimestamp,
    #[error("Invalid difficulty target")]
    InvalidDifficulty,
    #[error("Block hash does not meet its target")]
    InsufficientWork,
    #[error("Invalid transaction")]
    InvalidTransaction,
    #[error("Transaction version not supported")]
    NotSupportedTransaction,
    #[error("Invalid transaction target")]
    InvalidTransactionTarget,
    #[error("Duplicated transactions found")]
    DuplicatedTransactionsFound,
    #[error("Name already taken")]
    NameTaken,
    #[error("Invalid transaction source")]
    InvalidTransactionSource,
    #[error("Invalid transaction destination")]
    InvalidTransactionDestination,
    #[error("Invalid transaction signature")]
    InvalidTransactionSignature,
    #[error("Invalid fee transaction")]
    InvalidFeeTransaction,
    #[error("Invalid reward transaction")]
    InvalidRewardTransaction,
    #[error("Balance not enough")]
    BalanceNotEnough,
    #[error("Invalid genesis block")]
    InvalidGenesis,
    #[error(transparent)]
    CorruptedEncoding(#[from] CodecError),
}

/// Checks that depend only on the block and the index of the next slot:
/// size, Merkle commitment, staleness and proof of work.
pub fn is_valid_block(block: &Block, height: u32, params: &ChainParams) -> Result<(), ValidationError> {
    if block.serialized_size() > params.max_block_size {
        return Err(ValidationError::BlockTooLarge);
    }

    if !block.has_valid_merkle_root() {
        return Err(ValidationError::InvalidBlock);
    }

    if block.index() < height {
        return Err(ValidationError::BlockOld);
    }

    validate_pow(block, params)
}

/// Block hash must not exceed its claimed target, and the claimed target
/// must not be easier than the network floor
pub fn validate_pow(block: &Block, params: &ChainParams) -> Result<(), ValidationError> {
    let claimed = decompress(block.header.difficulty).ok_or(ValidationError::InvalidDifficulty)?;
    if !less_or_equal(&claimed, &params.minimum_target) {
        return Err(ValidationError::InvalidDifficulty);
    }
    if !less_or_equal(&block.hash().0, &claimed) {
        return Err(ValidationError::InsufficientWork);
    }
    Ok(())
}

/// Median of block timestamps; the two middle values are averaged
/// (rounding down) for an even count
pub fn median(timestamps: &[u32]) -> Option<u32> {
    if timestamps.is_empty() {
        return None;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(((u64::from(sorted[mid - 1]) + u64::from(sorted[mid])) / 2) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::compress;
    use crate::crypto::Hash;
    use crate::validation::{Address, RawAddress, Transaction};

    fn candidate(index: u32, params: &ChainParams) -> Block {
        let miner = Address::Raw(RawAddress([9u8; 33]));
        let txs = vec![
            Transaction::from_sentinel(1, index, RawAddress::NOWHERE, miner.clone(), 0),
            Transaction::from_sentinel(1, index, RawAddress::SUPPLY, miner, 10),
        ];
        let mut block = Block::new(index, 100, Hash::zero(), compress(&params.minimum_target), txs, 0);
        let target = params.minimum_target;
        while !less_or_equal(&block.hash().0, &target) {
            block.header.nonce += 1;
        }
        block
    }

    #[test]
    fn test_valid_candidate_passes() {
        let params = ChainParams::devnet();
        let block = candidate(3, &params);
        assert_eq!(is_valid_block(&block, 3, &params), Ok(()));
    }

    #[test]
    fn test_check_order() {
        let params = ChainParams::devnet();

        let mut tampered = candidate(3, &params);
        tampered.transactions[1].amount += 1;
        assert_eq!(is_valid_block(&tampered, 3, &params), Err(ValidationError::InvalidBlock));

        let stale = candidate(2, &params);
        assert_eq!(is_valid_block(&stale, 3, &params), Err(ValidationError::BlockOld));

        let small = ChainParams {
            max_block_size: 100,
            ..params.clone()
        };
        assert_eq!(
            is_valid_block(&tampered, 3, &small),
            Err(ValidationError::BlockTooLarge)
        );
    }

    #[test]
    fn test_easier_than_floor_rejected() {
        let params = ChainParams::devnet();
        let mut block = candidate(1, &params);
        block.header.difficulty = 0x20ffffff;
        let strict = ChainParams::default();
        assert_eq!(validate_pow(&block, &strict), Err(ValidationError::InvalidDifficulty));

        block.header.difficulty = 0x21000000;
        assert_eq!(validate_pow(&block, &params), Err(ValidationError::InvalidDifficulty));
    }

    #[test]
    fn test_hash_above_target_rejected() {
        let params = ChainParams::devnet();
        let mut block = candidate(1, &params);
        // Target of 0x000..0001 is met by no realistic hash
        block.header.difficulty = 0x03000001;
        assert_eq!(validate_pow(&block, &params), Err(ValidationError::InsufficientWork));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[5, 1, 3]), Some(3));
        assert_eq!(median(&[4, 1, 3, 2]), Some(2));
        assert_eq!(median(&[u32::MAX, u32::MAX]), Some(u32::MAX));
    }
}
