//! Chain engine
//!
//! Owns the ledger, the mempool and the consensus rules. It is the only
//! writer of the ledger: every mutation goes through `push_block`,
//! `pop_block` or `fork`, all of which take `&mut self`, so a single owner
//! (or a single lock around it) serializes chain changes and mempool
//! clearing together.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::CodecError;
use crate::config::ChainParams;
use crate::constants::VERSION;
use crate::crypto::{Hash, MerkleError, SignatureVerifier};
use crate::node::create_genesis_block;
use crate::storage::{KvStore, Ledger, StorageError};
use crate::validation::{Address, NameAddress, RawAddress, Transaction};

use super::{
    calculate_next_target, calculate_reward, compress, decompress, is_valid_block, median,
    should_adjust_difficulty, Block, BlockHeader, Target, ValidationError,
};

/// Chain errors: either the candidate was rejected or storage failed
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

impl From<CodecError> for ChainError {
    fn from(e: CodecError) -> Self {
        ChainError::Invalid(ValidationError::CorruptedEncoding(e))
    }
}

impl ChainError {
    /// The validation failure behind this error, if it is one
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            ChainError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

/// `a.fee / a.size` against `b.fee / b.size` without rounding
fn compare_byte_price(a: &(Transaction, usize), b: &(Transaction, usize)) -> Ordering {
    let left = u128::from(a.0.fee) * b.1 as u128;
    let right = u128::from(b.0.fee) * a.1 as u128;
    left.cmp(&right)
}

/// Proof-of-work chain with a name registry
pub struct Blockchain<S: KvStore> {
    ledger: Ledger<S>,
    params: ChainParams,
    verifier: Arc<dyn SignatureVerifier>,
    genesis: Block,
    /// Pending transactions, all targeting the next block
    pool: Vec<Transaction>,
}

impl<S: KvStore> Blockchain<S> {
    /// Open a chain over `store`, writing genesis into an empty one and
    /// checking it otherwise
    pub fn new(store: S, params: ChainParams, verifier: Arc<dyn SignatureVerifier>) -> Result<Self, ChainError> {
        let genesis = create_genesis_block(&params);
        let mut chain = Self {
            ledger: Ledger::new(store),
            params,
            verifier,
            genesis,
            pool: Vec::new(),
        };

        if chain.ledger.height()? == 0 {
            chain.push_block(chain.genesis.clone())?;
        } else if chain.ledger.get_header(0)?.hash() != chain.genesis.hash() {
            return Err(StorageError::GenesisMismatch.into());
        }

        info!(height = chain.height()?, tip = %chain.tip_hash()?, "Chain opened");
        Ok(chain)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Next free block index
    pub fn height(&self) -> Result<u32, ChainError> {
        Ok(self.ledger.height()?)
    }

    pub fn latest_header(&self) -> Result<BlockHeader, ChainError> {
        self.ledger
            .latest_header()?
            .ok_or_else(|| StorageError::NotFound("chain has no blocks".into()).into())
    }

    pub fn tip_hash(&self) -> Result<Hash, ChainError> {
        Ok(self.latest_header()?.hash())
    }

    pub fn get_block(&self, index: u32) -> Result<Block, ChainError> {
        Ok(self.ledger.get_block(index)?)
    }

    /// Blocks `start..end`, clipped to the chain
    pub fn get_block_range(&self, start: u32, end: u32) -> Result<Vec<Block>, ChainError> {
        let end = end.min(self.height()?);
        (start..end).map(|index| self.get_block(index)).collect()
    }

    pub fn resolve(&self, address: &Address) -> Result<Option<RawAddress>, ChainError> {
        Ok(self.ledger.resolve(address)?)
    }

    pub fn get_balance(&self, account: &RawAddress) -> Result<u64, ChainError> {
        Ok(self.ledger.get_balance(account)?)
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pool
    }

    /// Reward of the next block
    pub fn calculate_reward(&self) -> Result<u64, ChainError> {
        let supply = self.ledger.get_balance(&RawAddress::SUPPLY)?;
        Ok(calculate_reward(supply, &self.params))
    }

    /// Target the next block must claim
    pub fn calculate_hash_difficulty(&self) -> Result<Target, ChainError> {
        let tip = self.latest_header()?;
        let current = decompress(tip.difficulty).ok_or(ValidationError::InvalidDifficulty)?;
        let span = self.params.difficulty_adjustment_span;
        if !should_adjust_difficulty(tip.index, span) {
            return Ok(current);
        }

        let period_start = self.ledger.get_header(tip.index - span)?;
        let average = u64::from(tip.timestamp.saturating_sub(period_start.timestamp)) / u64::from(span);
        let next = calculate_next_target(&current, average, &self.params);
        debug!(index = tip.index + 1, target = %hex::encode(next), "Difficulty retarget");
        Ok(next)
    }

    /// Whether `tx` could be included in a future block on the current tip
    pub fn is_valid_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        if !tx.is_well_formed() {
            return Err(ValidationError::InvalidTransaction.into());
        }

        if tx.version > VERSION {
            return Err(ValidationError::NotSupportedTransaction.into());
        }

        if tx.target < self.height()? {
            return Err(ValidationError::InvalidTransactionTarget.into());
        }

        if let Some(name) = tx.claimed_name() {
            if self.ledger.resolve(&Address::Name(name))?.is_some() {
                return Err(ValidationError::NameTaken.into());
            }
        }

        let source = self
            .ledger
            .resolve(&tx.source)?
            .ok_or(ValidationError::InvalidTransactionSource)?;
        if !self.verifier.verify(&tx.signable(), source.public_key(), &tx.signature) {
            return Err(ValidationError::InvalidTransactionSignature.into());
        }

        if self.ledger.resolve(&tx.destination)?.is_none() {
            return Err(ValidationError::InvalidTransactionDestination.into());
        }

        Ok(())
    }

    /// Whether `block` extends the current tip
    pub fn is_next_block(&self, block: &Block) -> Result<(), ChainError> {
        let height = self.height()?;
        if height == 0 {
            return if block == &self.genesis {
                Ok(())
            } else {
                Err(ValidationError::InvalidGenesis.into())
            };
        }

        is_valid_block(block, height, &self.params)?;

        if block.index() != height {
            return Err(ValidationError::InvalidIndex.into());
        }

        let tip = self.latest_header()?;
        if block.header.previous_hash != tip.hash() {
            return Err(ValidationError::InvalidPreviousHash.into());
        }

        let window = self.params.blocks_clock_check;
        if window > 0 && block.index() >= window {
            let timestamps = (block.index() - window..block.index())
                .map(|index| self.ledger.get_header(index).map(|header| header.timestamp))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(median) = median(&timestamps) {
                if block.header.timestamp <= median {
                    return Err(ValidationError::InvalidTimestamp.into());
                }
            }
        }

        let claimed = decompress(block.header.difficulty).ok_or(ValidationError::InvalidDifficulty)?;
        if claimed != self.calculate_hash_difficulty()? {
            return Err(ValidationError::InvalidDifficulty.into());
        }

        self.validate_block_transactions(block)
    }

    fn validate_block_transactions(&self, block: &Block) -> Result<(), ChainError> {
        let count = block.transactions.len();
        if count < 2 {
            return Err(ValidationError::InvalidFeeTransaction.into());
        }
        let (regular, special) = block.transactions.split_at(count - 2);

        let mut payers: HashMap<RawAddress, i128> = HashMap::new();
        let mut hashes = HashSet::new();
        let mut names = HashSet::new();
        let mut fees: u128 = 0;

        for tx in regular {
            self.is_valid_transaction(tx)?;

            if tx.target != block.index() {
                return Err(ValidationError::InvalidTransactionTarget.into());
            }

            if !hashes.insert(tx.hash()) {
                return Err(ValidationError::DuplicatedTransactionsFound.into());
            }

            if let Some(name) = tx.claimed_name() {
                if !names.insert(name.index_key()) {
                    return Err(ValidationError::NameTaken.into());
                }
            }

            let source = self
                .ledger
                .resolve(&tx.source)?
                .ok_or(ValidationError::InvalidTransactionSource)?;
            let destination = self
                .ledger
                .resolve(&tx.destination)?
                .ok_or(ValidationError::InvalidTransactionDestination)?;
            *payers.entry(source).or_insert(0) += i128::from(tx.amount) + i128::from(tx.fee);
            *payers.entry(destination).or_insert(0) -= i128::from(tx.amount);

            fees += u128::from(tx.fee);
        }

        for (payer, owed) in &payers {
            if *owed > i128::from(self.ledger.get_balance(payer)?) {
                return Err(ValidationError::BalanceNotEnough.into());
            }
        }

        let fee_tx = &special[0];
        if fee_tx.source != Address::Raw(RawAddress::NOWHERE)
            || u128::from(fee_tx.amount) != fees
            || fee_tx.fee != 0
            || self.ledger.resolve(&fee_tx.destination)?.is_none()
        {
            return Err(ValidationError::InvalidFeeTransaction.into());
        }
        self.check_special_claim(fee_tx, &mut names)?;

        let reward_tx = &special[1];
        if reward_tx.source != Address::Raw(RawAddress::SUPPLY)
            || reward_tx.amount != self.calculate_reward()?
            || reward_tx.fee != 0
            || self.ledger.resolve(&reward_tx.destination)?.is_none()
        {
            return Err(ValidationError::InvalidRewardTransaction.into());
        }
        self.check_special_claim(reward_tx, &mut names)?;

        Ok(())
    }

    /// Fee and reward transactions may claim a name under the usual rules
    fn check_special_claim(&self, tx: &Transaction, names: &mut HashSet<Vec<u8>>) -> Result<(), ChainError> {
        if !tx.is_well_formed() {
            return Err(ValidationError::InvalidTransaction.into());
        }
        if let Some(name) = tx.claimed_name() {
            if !names.insert(name.index_key()) || self.ledger.resolve(&Address::Name(name))?.is_some() {
                return Err(ValidationError::NameTaken.into());
            }
        }
        Ok(())
    }

    /// Validate and append a block. Clears the mempool.
    pub fn push_block(&mut self, block: Block) -> Result<(), ChainError> {
        self.is_next_block(&block)?;
        self.ledger.push(&block)?;
        self.pool.clear();
        info!(
            index = block.index(),
            hash = %block.hash(),
            txs = block.transactions.len(),
            "Block accepted"
        );
        Ok(())
    }

    /// Remove the tip block. Genesis is never popped. Clears the mempool.
    pub fn pop_block(&mut self) -> Result<Block, ChainError> {
        if self.height()? <= 1 {
            return Err(StorageError::NotFound("no block above genesis".into()).into());
        }
        let block = self.ledger.pop()?;
        self.pool.clear();
        debug!(index = block.index(), "Block popped");
        Ok(block)
    }

    /// Try to switch to the chain whose blocks continue from
    /// `blocks[0].index - 1`. Succeeds only if the result is taller than
    /// the current chain; otherwise the current chain is restored exactly.
    pub fn fork(&mut self, blocks: &[Block]) -> Result<bool, ChainError> {
        let previous_height = self.height()?;
        let Some(first) = blocks.first() else {
            return Ok(false);
        };
        let fork_point = match first.index().checked_sub(1) {
            Some(point) if point < previous_height => point,
            _ => return Ok(false),
        };

        let mut popped = Vec::new();
        while self.height()? > fork_point + 1 {
            popped.push(self.pop_block()?);
        }

        for block in blocks {
            match self.push_block(block.clone()) {
                Ok(()) => {}
                Err(ChainError::Invalid(e)) => {
                    warn!(index = block.index(), error = %e, "Fork block rejected");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let height = self.height()?;
        if height > previous_height {
            info!(fork_point, previous_height, height, "Fork adopted");
            return Ok(true);
        }

        while self.height()? > fork_point + 1 {
            self.pop_block()?;
        }
        while let Some(block) = popped.pop() {
            self.push_block(block)?;
        }
        info!(fork_point, height = self.height()?, "Fork rejected, chain restored");
        Ok(false)
    }

    /// Admit `tx` to the mempool for the next block
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), ChainError> {
        self.is_valid_transaction(&tx)?;

        if tx.target != self.height()? {
            return Err(ValidationError::InvalidTransactionTarget.into());
        }

        let tx_hash = tx.hash();
        if self.pool.iter().any(|pooled| pooled.hash() == tx_hash) {
            return Err(ValidationError::DuplicatedTransactionsFound.into());
        }

        if let Some(name) = tx.claimed_name() {
            let key = name.index_key();
            if self
                .pool
                .iter()
                .filter_map(Transaction::claimed_name)
                .any(|pooled| pooled.index_key() == key)
            {
                return Err(ValidationError::NameTaken.into());
            }
        }

        let source = self
            .ledger
            .resolve(&tx.source)?
            .ok_or(ValidationError::InvalidTransactionSource)?;

        let mut spent: i128 = 0;
        for pooled in &self.pool {
            if self.ledger.resolve(&pooled.source)? == Some(source) {
                spent += i128::from(pooled.amount) + i128::from(pooled.fee);
            }
            if self.ledger.resolve(&pooled.destination)? == Some(source) {
                spent -= i128::from(pooled.amount);
            }
        }
        spent += i128::from(tx.amount) + i128::from(tx.fee);

        if spent > i128::from(self.ledger.get_balance(&source)?) {
            return Err(ValidationError::BalanceNotEnough.into());
        }

        debug!(hash = %tx_hash, pool = self.pool.len() + 1, "Transaction pooled");
        self.pool.push(tx);
        Ok(())
    }

    /// Candidate for the next block paying fees and reward to `miner`.
    ///
    /// Pooled transactions are ordered by ascending byte-price; while the
    /// block is too large the cheapest one is dropped and its fee taken
    /// back out of the fee transaction. The nonce starts at zero.
    pub fn new_block(&self, miner: &Address, timestamp: u32) -> Result<Block, ChainError> {
        let index = self.height()?;
        let tip = self.latest_header()?;

        let mut pooled: Vec<(Transaction, usize)> = self
            .pool
            .iter()
            .map(|tx| (tx.clone(), tx.serialized_size()))
            .collect();
        pooled.sort_by(compare_byte_price);

        let fees = pooled.iter().fold(0u64, |sum, (tx, _)| sum.saturating_add(tx.fee));
        let fee_tx = Transaction::from_sentinel(VERSION, index, RawAddress::NOWHERE, miner.clone(), fees);
        let reward_tx =
            Transaction::from_sentinel(VERSION, index, RawAddress::SUPPLY, miner.clone(), self.calculate_reward()?);

        let difficulty = compress(&self.calculate_hash_difficulty()?);
        let mut transactions: Vec<Transaction> = pooled.into_iter().map(|(tx, _)| tx).collect();
        transactions.push(fee_tx);
        transactions.push(reward_tx);

        let mut block = Block {
            header: BlockHeader {
                index,
                timestamp,
                previous_hash: tip.hash(),
                merkle_root: None,
                difficulty,
                nonce: 0,
            },
            transactions,
        };

        let mut size = block.serialized_size();
        while size > self.params.max_block_size && block.transactions.len() > 2 {
            let evicted = block.transactions.remove(0);
            size -= 4 + evicted.serialized_size();
            let fee_index = block.transactions.len() - 2;
            let fee_tx = &mut block.transactions[fee_index];
            fee_tx.amount = fee_tx.amount.saturating_sub(evicted.fee);
            debug!(hash = %evicted.hash(), "Evicted transaction from oversized block");
        }
        block.update_merkle_root();

        Ok(block)
    }

    /// Every transaction in the recent window touching `address`
    pub fn latest(&self, address: &Address) -> Result<Vec<Transaction>, ChainError> {
        let Some(account) = self.ledger.resolve(address)? else {
            return Ok(Vec::new());
        };
        let tip = self.latest_header()?;
        let start = tip.index.saturating_sub(self.params.query_max_blocks);

        let mut history = Vec::new();
        for index in start..=tip.index {
            for tx in self.ledger.get_block(index)?.transactions {
                let source = self.ledger.resolve(&tx.source)?;
                let destination = self.ledger.resolve(&tx.destination)?;
                if source == Some(account) || destination == Some(account) {
                    history.push(tx);
                }
            }
        }
        Ok(history)
    }

    /// Name claims under the scope of `destination` (top-level claims when
    /// absent), optionally only those for the leaf `name`
    pub fn query(&self, name: Option<&str>, destination: Option<&Address>) -> Result<Vec<Transaction>, ChainError> {
        if name.is_none() && destination.is_none() {
            return Ok(Vec::new());
        }

        let scope = match destination {
            Some(Address::Name(scope)) => scope.clone(),
            _ => NameAddress::default(),
        };
        let claims = self.ledger.query_children(&scope)?;
        Ok(claims
            .into_iter()
            .filter(|tx| destination.map_or(true, |d| &tx.destination == d))
            .filter(|tx| name.map_or(true, |n| tx.name == n))
            .collect())
    }

    /// Merkle proof of `tx_hash` within block `index`
    pub fn confirm(&self, index: u32, tx_hash: &Hash) -> Result<Vec<Hash>, ChainError> {
        Ok(self.get_block(index)?.merkle_path(tx_hash)?)
    }
}
