//! Genesis block generation
//!
//! Creates the fixed initial block that allocates the total supply. Its
//! difficulty is the network floor; it is never mined.

use crate::config::ChainParams;
use crate::consensus::{compress, Block};
use crate::constants::{
    CONTRIBUTORS_ALLOCATION, CONTRIBUTORS_KEY, FOUNDER_ALLOCATION, FOUNDER_KEY, GENESIS_TIMESTAMP,
    SUPPLY_ALLOCATION, TOTAL_SUPPLY,
};
use crate::crypto::Hash;
use crate::validation::{Address, RawAddress, Transaction};

/// Version of the allocation transactions
const GENESIS_VERSION: u8 = 0;

/// Genesis nonce
const GENESIS_NONCE: u32 = 0;

/// Create the genesis block
///
/// Byte-for-byte reproducible for a given network floor.
pub fn create_genesis_block(params: &ChainParams) -> Block {
    let allocations = [
        (RawAddress::SUPPLY, SUPPLY_ALLOCATION),
        (RawAddress(FOUNDER_KEY), FOUNDER_ALLOCATION),
        (RawAddress(CONTRIBUTORS_KEY), CONTRIBUTORS_ALLOCATION),
    ];
    let transactions = allocations
        .into_iter()
        .map(|(account, amount)| {
            Transaction::from_sentinel(GENESIS_VERSION, 0, RawAddress::NOWHERE, Address::Raw(account), amount)
        })
        .collect();

    Block::new(
        0,
        GENESIS_TIMESTAMP,
        Hash::zero(),
        compress(&params.minimum_target),
        transactions,
        GENESIS_NONCE,
    )
}

/// Genesis block statistics
#[derive(Debug, Clone)]
pub struct GenesisInfo {
    pub hash: Hash,
    pub merkle_root: Option<Hash>,
    pub timestamp: u32,
    pub difficulty: u32,
    pub total_supply: u64,
    pub founder_allocation: u64,
    pub contributors_allocation: u64,
}

impl GenesisInfo {
    pub fn new(params: &ChainParams) -> Self {
        let genesis = create_genesis_block(params);
        Self {
            hash: genesis.hash(),
            merkle_root: genesis.header.merkle_root,
            timestamp: genesis.header.timestamp,
            difficulty: genesis.header.difficulty,
            total_supply: TOTAL_SUPPLY,
            founder_allocation: FOUNDER_ALLOCATION,
            contributors_allocation: CONTRIBUTORS_ALLOCATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let params = ChainParams::default();
        assert_eq!(create_genesis_block(&params).hash(), create_genesis_block(&params).hash());
        assert_ne!(
            create_genesis_block(&params).hash(),
            create_genesis_block(&ChainParams::devnet()).hash()
        );
    }

    #[test]
    fn test_genesis_allocates_whole_supply() {
        let genesis = create_genesis_block(&ChainParams::default());
        assert_eq!(genesis.transactions.len(), 3);
        let total: u64 = genesis.transactions.iter().map(|tx| tx.amount).sum();
        assert_eq!(total, TOTAL_SUPPLY);
        assert!(genesis
            .transactions
            .iter()
            .all(|tx| tx.source == Address::Raw(RawAddress::NOWHERE) && tx.target == 0));
        assert_eq!(genesis.transactions[0].destination, Address::Raw(RawAddress::SUPPLY));
    }

    #[test]
    fn test_genesis_header() {
        let params = ChainParams::default();
        let genesis = create_genesis_block(&params);
        assert_eq!(genesis.index(), 0);
        assert!(genesis.header.previous_hash.is_zero());
        assert!(genesis.has_valid_merkle_root());
        assert_eq!(genesis.header.difficulty, 0x1effffff);
    }

    #[test]
    fn test_genesis_info() {
        let info = GenesisInfo::new(&ChainParams::default());
        assert_eq!(info.founder_allocation, FOUNDER_ALLOCATION);
        assert_eq!(info.timestamp, GENESIS_TIMESTAMP);
        assert!(info.merkle_root.is_some());
    }
}
