//! Node facade
//!
//! What a transport layer talks to: serialized blocks and transactions in,
//! serialized results or typed errors out. One mutex guards the chain, so
//! block arrival, local mining and reorgs are serialized, and so is mempool
//! admission against them.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::codec::CodecError;
use crate::config::{ConfigError, NodeConfig};
use crate::consensus::{is_valid_block, Block, Blockchain, ChainError};
use crate::crypto::{Hash, Secp256k1Verifier, SignatureVerifier};
use crate::mining::{apply_solution, MiningTemplate};
use crate::storage::{KvStore, SledStore, StorageError};
use crate::validation::{Address, AddressError, RawAddress, Transaction};

/// Node errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Candidate block has an undecodable target")]
    InvalidTemplate,
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        NodeError::Chain(e.into())
    }
}

impl From<StorageError> for NodeError {
    fn from(e: StorageError) -> Self {
        NodeError::Chain(e.into())
    }
}

/// Snapshot of the chain tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub height: u32,
    pub tip_hash: Hash,
    pub pending_transactions: usize,
}

/// Shared handle to a chain
pub struct Node<S: KvStore> {
    chain: Arc<Mutex<Blockchain<S>>>,
    /// Candidate handed out through the last mining template
    candidate: Arc<Mutex<Option<Block>>>,
}

impl<S: KvStore> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            candidate: Arc::clone(&self.candidate),
        }
    }
}

impl Node<SledStore> {
    /// Open the on-disk chain described by `config`
    pub fn open(config: &NodeConfig) -> Result<Self, NodeError> {
        config.chain.validate()?;
        let store = SledStore::open(&config.data_dir)?;
        let verifier: Arc<dyn SignatureVerifier> = Arc::new(Secp256k1Verifier);
        let chain = Blockchain::new(store, config.chain.clone(), verifier)?;
        info!(data_dir = %config.data_dir.display(), "Ledger opened");
        Ok(Self::new(chain))
    }
}

impl<S: KvStore> Node<S> {
    pub fn new(chain: Blockchain<S>) -> Self {
        Self {
            chain: Arc::new(Mutex::new(chain)),
            candidate: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` with exclusive access to the chain
    pub fn with_chain<R>(&self, f: impl FnOnce(&mut Blockchain<S>) -> R) -> R {
        f(&mut self.chain.lock())
    }

    pub fn status(&self) -> Result<NodeStatus, NodeError> {
        let chain = self.chain.lock();
        Ok(NodeStatus {
            height: chain.height()?,
            tip_hash: chain.tip_hash()?,
            pending_transactions: chain.pending_transactions().len(),
        })
    }

    /// Decode and append a block
    pub fn push_block(&self, bytes: &[u8]) -> Result<(), NodeError> {
        let block = Block::deserialize(bytes)?;
        self.submit_block(block)
    }

    /// Append an already decoded block
    pub fn submit_block(&self, block: Block) -> Result<(), NodeError> {
        self.chain.lock().push_block(block)?;
        Ok(())
    }

    /// Decode and pool a transaction
    pub fn add_transaction(&self, bytes: &[u8]) -> Result<(), NodeError> {
        let tx = Transaction::deserialize(bytes)?;
        self.chain.lock().add_transaction(tx)?;
        Ok(())
    }

    pub fn get_block(&self, index: u32, header_only: bool) -> Result<Vec<u8>, NodeError> {
        let block = self.chain.lock().get_block(index)?;
        Ok(if header_only {
            block.header.to_bytes()
        } else {
            block.serialize()
        })
    }

    pub fn get_block_range(&self, start: u32, end: u32, header_only: bool) -> Result<Vec<u8>, NodeError> {
        let blocks = self.chain.lock().get_block_range(start, end)?;
        Ok(Block::serialize_list(&blocks, header_only))
    }

    /// Resolve a printed address
    pub fn resolve(&self, address: &str) -> Result<Option<RawAddress>, NodeError> {
        let address = Address::from_string(address)?;
        Ok(self.chain.lock().resolve(&address)?)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64, NodeError> {
        let chain = self.chain.lock();
        match chain.resolve(&Address::from_string(address)?)? {
            Some(account) => Ok(chain.get_balance(&account)?),
            None => Ok(0),
        }
    }

    /// Name claims as a serialized transaction list
    pub fn query(&self, name: Option<&str>, destination: Option<&str>) -> Result<Vec<u8>, NodeError> {
        let destination = destination.map(Address::from_string).transpose()?;
        let claims = self.chain.lock().query(name, destination.as_ref())?;
        Ok(Transaction::serialize_list(&claims))
    }

    /// Recent history of an account as a serialized transaction list
    pub fn latest(&self, address: &str) -> Result<Vec<u8>, NodeError> {
        let address = Address::from_string(address)?;
        let history = self.chain.lock().latest(&address)?;
        Ok(Transaction::serialize_list(&history))
    }

    pub fn confirm(&self, index: u32, tx_hash: &Hash) -> Result<Vec<Hash>, NodeError> {
        Ok(self.chain.lock().confirm(index, tx_hash)?)
    }

    /// Decode a candidate chain suffix and try to adopt it
    pub fn fork(&self, bytes: &[u8]) -> Result<bool, NodeError> {
        let blocks = Block::deserialize_list(bytes)?;
        let adopted = self.chain.lock().fork(&blocks)?;
        if adopted {
            self.candidate.lock().take();
        }
        Ok(adopted)
    }

    /// Fresh candidate for the next block
    pub fn new_candidate(&self, miner: &Address, timestamp: u32) -> Result<Block, NodeError> {
        Ok(self.chain.lock().new_block(miner, timestamp)?)
    }

    /// Hand out a template for an external worker and remember its candidate
    pub fn mining_template(&self, miner: &Address, timestamp: u32) -> Result<MiningTemplate, NodeError> {
        let candidate = self.new_candidate(miner, timestamp)?;
        let template = MiningTemplate::from_block(&candidate).ok_or(NodeError::InvalidTemplate)?;
        *self.candidate.lock() = Some(candidate);
        Ok(template)
    }

    /// Merge a solved header into the outstanding candidate and push it.
    ///
    /// Returns `false` when there is no candidate or the header does not
    /// belong to it.
    pub fn submit_solution(&self, header: &[u8]) -> Result<bool, NodeError> {
        let mut slot = self.candidate.lock();
        let Some(mut candidate) = slot.clone() else {
            return Ok(false);
        };
        if !apply_solution(&mut candidate, header)? {
            warn!("Solution does not match the outstanding candidate");
            return Ok(false);
        }

        let mut chain = self.chain.lock();
        is_valid_block(&candidate, chain.height()?, chain.params()).map_err(ChainError::from)?;
        chain.push_block(candidate)?;
        slot.take();
        Ok(true)
    }
}
