//! Ledger index
//!
//! Persistent state of the chain, keyed by single-byte prefixes:
//!
//! | prefix | key                                          | value                  |
//! |--------|----------------------------------------------|------------------------|
//! | `0x00` | -                                            | height (`u32`)         |
//! | `0x01` | height                                       | header bytes           |
//! | `0x02` | height, position (`u16`)                     | transaction bytes      |
//! | `0x03` | root-first name path                         | `0x06` key of its claim|
//! | `0x04` | root-first name path                         | owner key, claim height|
//! | `0x05` | public key                                   | balance (`u64`)        |
//! | `0x06` | scope path, `|`, height, position, leaf name | transaction bytes      |
//!
//! `push` and `pop` each build one [`WriteBatch`] and are exact inverses.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::codec::CodecError;
use crate::consensus::{Block, BlockHeader};
use crate::validation::{Address, NameAddress, RawAddress, Transaction};

use super::store::{KvStore, StorageError, WriteBatch};

const HEIGHT_KEY: [u8; 1] = [0x00];
const HEADER_PREFIX: u8 = 0x01;
const BLOCK_TX_PREFIX: u8 = 0x02;
const SHORTCUT_PREFIX: u8 = 0x03;
const RESOLVE_PREFIX: u8 = 0x04;
const BALANCE_PREFIX: u8 = 0x05;
const NAMED_TX_PREFIX: u8 = 0x06;
const SCOPE_SEPARATOR: u8 = b'|';

fn header_key(index: u32) -> Vec<u8> {
    let mut key = vec![HEADER_PREFIX];
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn block_tx_prefix(index: u32) -> Vec<u8> {
    let mut key = vec![BLOCK_TX_PREFIX];
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn block_tx_key(index: u32, position: u16) -> Vec<u8> {
    let mut key = block_tx_prefix(index);
    key.extend_from_slice(&position.to_be_bytes());
    key
}

fn prefixed(prefix: u8, path: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1);
    key.push(prefix);
    key.extend_from_slice(path);
    key
}

fn scope_prefix(scope: &NameAddress) -> Vec<u8> {
    let mut key = prefixed(NAMED_TX_PREFIX, &scope.index_key());
    key.push(SCOPE_SEPARATOR);
    key
}

fn named_tx_key(scope: &NameAddress, index: u32, position: u16, leaf: &str) -> Vec<u8> {
    let mut key = scope_prefix(scope);
    key.extend_from_slice(&index.to_be_bytes());
    key.extend_from_slice(&position.to_be_bytes());
    key.extend_from_slice(leaf.as_bytes());
    key
}

fn balance_key(raw: &RawAddress) -> Vec<u8> {
    prefixed(BALANCE_PREFIX, &raw.0)
}

fn corrupted(e: CodecError) -> StorageError {
    StorageError::Corrupted(e.to_string())
}

/// Name bindings made by the block being pushed, keyed by root-first path
type PendingClaims = HashMap<Vec<u8>, RawAddress>;

/// Ledger state over a backing store
#[derive(Debug, Clone)]
pub struct Ledger<S> {
    store: S,
}

impl<S: KvStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Next free block index
    pub fn height(&self) -> Result<u32, StorageError> {
        match self.store.get(&HEIGHT_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Corrupted("height".into()))?;
                Ok(u32::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    pub fn get_header(&self, index: u32) -> Result<BlockHeader, StorageError> {
        let bytes = self
            .store
            .get(&header_key(index))?
            .ok_or_else(|| StorageError::NotFound(format!("header {}", index)))?;
        BlockHeader::from_bytes(&bytes).map_err(corrupted)
    }

    pub fn get_block(&self, index: u32) -> Result<Block, StorageError> {
        let header = self.get_header(index)?;
        let transactions = self
            .store
            .scan_prefix(&block_tx_prefix(index))?
            .into_iter()
            .map(|(_, bytes)| Transaction::deserialize(&bytes).map_err(corrupted))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block { header, transactions })
    }

    /// Header of the tip, `None` before genesis
    pub fn latest_header(&self) -> Result<Option<BlockHeader>, StorageError> {
        match self.height()? {
            0 => Ok(None),
            height => self.get_header(height - 1).map(Some),
        }
    }

    /// Current owner of `name` and the height it was claimed at
    pub fn name_binding(&self, name: &NameAddress) -> Result<Option<(RawAddress, u32)>, StorageError> {
        let Some(bytes) = self.store.get(&prefixed(RESOLVE_PREFIX, &name.index_key()))? else {
            return Ok(None);
        };
        if bytes.len() != 37 {
            return Err(StorageError::Corrupted(format!("binding for {}", name)));
        }
        let mut key = [0u8; 33];
        key.copy_from_slice(&bytes[..33]);
        let mut height = [0u8; 4];
        height.copy_from_slice(&bytes[33..]);
        Ok(Some((RawAddress(key), u32::from_be_bytes(height))))
    }

    /// Raw key behind `address`; raw addresses resolve to themselves
    pub fn resolve(&self, address: &Address) -> Result<Option<RawAddress>, StorageError> {
        self.resolve_pending(address, &PendingClaims::new())
    }

    fn resolve_pending(
        &self,
        address: &Address,
        pending: &PendingClaims,
    ) -> Result<Option<RawAddress>, StorageError> {
        match address {
            Address::Raw(raw) => Ok(Some(*raw)),
            Address::Name(name) if !name.is_valid() => Ok(None),
            Address::Name(name) => {
                if let Some(raw) = pending.get(&name.index_key()) {
                    return Ok(Some(*raw));
                }
                Ok(self.name_binding(name)?.map(|(raw, _)| raw))
            }
        }
    }

    fn resolve_required(
        &self,
        address: &Address,
        pending: &PendingClaims,
    ) -> Result<RawAddress, StorageError> {
        self.resolve_pending(address, pending)?
            .ok_or_else(|| StorageError::Unresolved(address.to_string()))
    }

    pub fn get_balance(&self, raw: &RawAddress) -> Result<u64, StorageError> {
        match self.store.get(&balance_key(raw))? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Corrupted(format!("balance of {}", raw)))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Transactions claiming a name directly under `scope`; the empty scope
    /// lists top-level claims
    pub fn query_children(&self, scope: &NameAddress) -> Result<Vec<Transaction>, StorageError> {
        self.store
            .scan_prefix(&scope_prefix(scope))?
            .into_iter()
            .map(|(_, bytes)| Transaction::deserialize(&bytes).map_err(corrupted))
            .collect()
    }

    /// The transaction that claimed `name`
    pub fn lookup_by_name(&self, name: &NameAddress) -> Result<Option<Transaction>, StorageError> {
        let Some(named_key) = self.store.get(&prefixed(SHORTCUT_PREFIX, &name.index_key()))? else {
            return Ok(None);
        };
        let bytes = self
            .store
            .get(&named_key)?
            .ok_or_else(|| StorageError::Corrupted(format!("dangling shortcut for {}", name)))?;
        Transaction::deserialize(&bytes).map(Some).map_err(corrupted)
    }

    /// Sum of every stored balance, `SUPPLY` included
    pub fn total_tracked_balance(&self) -> Result<u128, StorageError> {
        let mut total = 0u128;
        for (key, bytes) in self.store.scan_prefix(&[BALANCE_PREFIX])? {
            let bytes: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StorageError::Corrupted(format!("balance key {}", hex::encode(key))))?;
            total += u128::from(u64::from_be_bytes(bytes));
        }
        Ok(total)
    }

    /// Append `block` at the current height in one batch. No consensus
    /// checks happen here; only index consistency is enforced.
    pub fn push(&self, block: &Block) -> Result<(), StorageError> {
        let height = self.height()?;
        if block.index() != height {
            return Err(StorageError::IndexMismatch {
                expected: height,
                actual: block.index(),
            });
        }
        let positions = u16::try_from(block.transactions.len())
            .map_err(|_| StorageError::Corrupted("too many transactions in block".into()))?;

        let mut pending = PendingClaims::new();
        for tx in &block.transactions {
            if let Some(name) = tx.claimed_name() {
                let path = name.index_key();
                if pending.contains_key(&path) || self.name_binding(&name)?.is_some() {
                    return Err(StorageError::NameConflict(name.to_string()));
                }
                let owner = self.resolve_required(&tx.source, &pending)?;
                pending.insert(path, owner);
            }
        }

        let mut batch = WriteBatch::new();
        batch.put(HEIGHT_KEY, (height + 1).to_be_bytes().to_vec());
        batch.put(header_key(height), block.header.to_bytes());

        for (position, tx) in (0..positions).zip(&block.transactions) {
            let bytes = tx.serialize();
            batch.put(block_tx_key(height, position), bytes.clone());
            let Some(name) = tx.claimed_name() else {
                continue;
            };
            let Some((leaf, scope)) = name.pop() else {
                continue;
            };
            let path = name.index_key();
            let named_key = named_tx_key(&scope, height, position, leaf);
            batch.put(named_key.clone(), bytes);
            batch.put(prefixed(SHORTCUT_PREFIX, &path), named_key);

            let owner = pending
                .get(&path)
                .copied()
                .ok_or_else(|| StorageError::Unresolved(name.to_string()))?;
            let mut binding = owner.0.to_vec();
            binding.extend_from_slice(&height.to_be_bytes());
            batch.put(prefixed(RESOLVE_PREFIX, &path), binding);
        }

        let deltas = self.balance_deltas(&block.transactions, &pending)?;
        self.write_balances(&mut batch, deltas, false)?;

        self.store.apply(batch)?;
        debug!(index = height, txs = block.transactions.len(), "Ledger pushed block");
        Ok(())
    }

    /// Remove the tip block and undo its effects
    pub fn pop(&self) -> Result<Block, StorageError> {
        let height = self.height()?;
        let index = height
            .checked_sub(1)
            .ok_or_else(|| StorageError::NotFound("no block to pop".into()))?;
        let block = self.get_block(index)?;

        // Bindings of this block are still stored, so resolution matches push
        let deltas = self.balance_deltas(&block.transactions, &PendingClaims::new())?;

        let mut batch = WriteBatch::new();
        if index == 0 {
            batch.delete(HEIGHT_KEY);
        } else {
            batch.put(HEIGHT_KEY, index.to_be_bytes().to_vec());
        }
        batch.delete(header_key(index));

        for (position, tx) in (0u16..).zip(&block.transactions) {
            batch.delete(block_tx_key(index, position));
            let Some(name) = tx.claimed_name() else {
                continue;
            };
            let Some((leaf, scope)) = name.pop() else {
                continue;
            };
            let path = name.index_key();
            batch.delete(named_tx_key(&scope, index, position, leaf));
            batch.delete(prefixed(SHORTCUT_PREFIX, &path));
            batch.delete(prefixed(RESOLVE_PREFIX, &path));
        }

        self.write_balances(&mut batch, deltas, true)?;

        self.store.apply(batch)?;
        debug!(index, "Ledger popped block");
        Ok(block)
    }

    /// Net effect of `transactions` per resolved account
    fn balance_deltas(
        &self,
        transactions: &[Transaction],
        pending: &PendingClaims,
    ) -> Result<BTreeMap<RawAddress, i128>, StorageError> {
        let mut deltas = BTreeMap::new();
        for tx in transactions {
            let source = self.resolve_required(&tx.source, pending)?;
            let destination = self.resolve_required(&tx.destination, pending)?;
            *deltas.entry(source).or_insert(0i128) -= i128::from(tx.amount) + i128::from(tx.fee);
            *deltas.entry(destination).or_insert(0i128) += i128::from(tx.amount);
        }
        Ok(deltas)
    }

    fn write_balances(
        &self,
        batch: &mut WriteBatch,
        deltas: BTreeMap<RawAddress, i128>,
        revert: bool,
    ) -> Result<(), StorageError> {
        for (raw, delta) in deltas {
            if raw == RawAddress::NOWHERE || delta == 0 {
                continue;
            }
            let delta = if revert { -delta } else { delta };
            let updated = i128::from(self.get_balance(&raw)?) + delta;
            let updated =
                u64::try_from(updated).map_err(|_| StorageError::BalanceOverflow(raw.to_string()))?;
            if updated == 0 {
                batch.delete(balance_key(&raw));
            } else {
                batch.put(balance_key(&raw), updated.to_be_bytes().to_vec());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;
    use crate::storage::MemoryStore;

    fn account(byte: u8) -> RawAddress {
        RawAddress([byte; 33])
    }

    fn block(index: u32, transactions: Vec<Transaction>) -> Block {
        Block::new(index, 1000 + index, Hash([index as u8; 32]), 0x20ffffff, transactions, 0)
    }

    fn mint(index: u32, to: Address, amount: u64) -> Transaction {
        Transaction::from_sentinel(1, index, RawAddress::NOWHERE, to, amount)
    }

    fn everything(ledger: &Ledger<MemoryStore>) -> Vec<(Vec<u8>, Vec<u8>)> {
        ledger.store().scan_prefix(&[]).unwrap()
    }

    #[test]
    fn test_push_requires_next_index() {
        let ledger = Ledger::new(MemoryStore::new());
        let err = ledger.push(&block(1, vec![])).unwrap_err();
        assert!(matches!(err, StorageError::IndexMismatch { expected: 0, actual: 1 }));
    }

    #[test]
    fn test_balance_credit_and_rollback() {
        let ledger = Ledger::new(MemoryStore::new());
        let x = account(7);

        ledger.push(&block(0, vec![mint(0, x.into(), 1000)])).unwrap();
        assert_eq!(ledger.get_balance(&x).unwrap(), 1000);

        ledger.push(&block(1, vec![mint(1, x.into(), 500)])).unwrap();
        assert_eq!(ledger.get_balance(&x).unwrap(), 1500);
        assert_eq!(ledger.height().unwrap(), 2);

        assert_eq!(ledger.pop().unwrap().index(), 1);
        assert_eq!(ledger.get_balance(&x).unwrap(), 1000);
        assert_eq!(ledger.pop().unwrap().index(), 0);
        assert_eq!(ledger.get_balance(&x).unwrap(), 0);
        assert_eq!(ledger.height().unwrap(), 0);
        assert!(ledger.store().is_empty());
    }

    #[test]
    fn test_nowhere_is_never_tracked() {
        let ledger = Ledger::new(MemoryStore::new());
        ledger.push(&block(0, vec![mint(0, account(1).into(), 5)])).unwrap();
        assert_eq!(ledger.get_balance(&RawAddress::NOWHERE).unwrap(), 0);
        assert_eq!(ledger.total_tracked_balance().unwrap(), 5);
    }

    #[test]
    fn test_pop_restores_exact_state() {
        let ledger = Ledger::new(MemoryStore::new());
        let alice = account(1);
        let bob = account(2);
        ledger.push(&block(0, vec![mint(0, alice.into(), 100)])).unwrap();
        let before = everything(&ledger);

        let pay = Transaction::new(1, alice.into(), bob.into(), 30, 2).with_name("alice");
        ledger.push(&block(1, vec![pay, mint(1, bob.into(), 2)])).unwrap();
        assert_eq!(ledger.get_balance(&alice).unwrap(), 68);
        assert_eq!(ledger.get_balance(&bob).unwrap(), 32);
        assert_ne!(everything(&ledger), before);

        ledger.pop().unwrap();
        assert_eq!(everything(&ledger), before);
    }

    #[test]
    fn test_name_binding_lifecycle() {
        let ledger = Ledger::new(MemoryStore::new());
        let owner = account(3);
        let bob = NameAddress::parse("bob").unwrap();
        ledger.push(&block(0, vec![])).unwrap();

        let claim = mint(1, owner.into(), 0).with_name("bob");
        let mut claim = claim;
        claim.source = owner.into();
        ledger.push(&block(1, vec![claim.clone()])).unwrap();

        assert_eq!(ledger.resolve(&bob.clone().into()).unwrap(), Some(owner));
        assert_eq!(ledger.name_binding(&bob).unwrap(), Some((owner, 1)));
        assert_eq!(ledger.lookup_by_name(&bob).unwrap(), Some(claim.clone()));
        assert_eq!(ledger.query_children(&NameAddress::default()).unwrap(), vec![claim.clone()]);

        let again = ledger.push(&block(2, vec![claim.clone()])).unwrap_err();
        assert!(matches!(again, StorageError::NameConflict(_)));

        ledger.pop().unwrap();
        assert_eq!(ledger.resolve(&bob.clone().into()).unwrap(), None);
        assert_eq!(ledger.lookup_by_name(&bob).unwrap(), None);

        ledger.push(&block(1, vec![claim])).unwrap();
        assert_eq!(ledger.resolve(&bob.into()).unwrap(), Some(owner));
    }

    #[test]
    fn test_nested_scope_queries() {
        let ledger = Ledger::new(MemoryStore::new());
        let owner = account(4);
        let alice = NameAddress::parse("alice").unwrap();

        let mut root_claim = mint(0, owner.into(), 0).with_name("alice");
        root_claim.source = owner.into();
        ledger.push(&block(0, vec![root_claim])).unwrap();

        let mut shop = Transaction::new(1, owner.into(), alice.clone().into(), 0, 0).with_name("shop");
        shop.signature = vec![1];
        let mut cafe = Transaction::new(1, owner.into(), alice.clone().into(), 0, 0).with_name("cafe");
        cafe.signature = vec![2];
        ledger.push(&block(1, vec![shop.clone(), cafe.clone()])).unwrap();

        let children = ledger.query_children(&alice).unwrap();
        assert_eq!(children, vec![shop, cafe]);
        assert_eq!(ledger.query_children(&NameAddress::default()).unwrap().len(), 1);
        let shop_alice = NameAddress::parse("shop.alice").unwrap();
        assert_eq!(ledger.name_binding(&shop_alice).unwrap(), Some((owner, 1)));
    }

    #[test]
    fn test_dotted_part_does_not_alias_nested_name() {
        let ledger = Ledger::new(MemoryStore::new());
        let owner = account(4);
        let mut bob = mint(0, owner.into(), 0).with_name("bob");
        bob.source = owner.into();
        ledger.push(&block(0, vec![bob])).unwrap();
        let mut shop = Transaction::new(1, owner.into(), NameAddress::parse("bob").unwrap().into(), 0, 0).with_name("shop");
        shop.signature = vec![1];
        ledger.push(&block(1, vec![shop])).unwrap();

        let nested = Address::Name(NameAddress::parse("shop.bob").unwrap());
        let dotted = Address::Name(NameAddress::default().push("bob.shop"));
        assert_eq!(ledger.resolve(&nested).unwrap(), Some(owner));
        assert_eq!(ledger.resolve(&dotted).unwrap(), None);

        let err = ledger.push(&block(2, vec![mint(2, dotted, 1)])).unwrap_err();
        assert!(matches!(err, StorageError::Unresolved(_)));
    }

    #[test]
    fn test_duplicate_claim_in_one_block() {
        let ledger = Ledger::new(MemoryStore::new());
        let owner = account(5);
        let mut a = mint(0, owner.into(), 0).with_name("dup");
        a.source = owner.into();
        let mut b = a.clone();
        b.amount = 0;
        b.signature = vec![9];
        let err = ledger.push(&block(0, vec![a, b])).unwrap_err();
        assert!(matches!(err, StorageError::NameConflict(_)));
        assert_eq!(ledger.height().unwrap(), 0);
        assert!(ledger.store().is_empty());
    }

    #[test]
    fn test_overdraft_is_rejected_atomically() {
        let ledger = Ledger::new(MemoryStore::new());
        let poor = account(6);
        ledger.push(&block(0, vec![])).unwrap();
        let spend = Transaction::new(1, poor.into(), account(7).into(), 10, 0);
        let err = ledger.push(&block(1, vec![spend])).unwrap_err();
        assert!(matches!(err, StorageError::BalanceOverflow(_)));
        assert_eq!(ledger.height().unwrap(), 1);
    }

    #[test]
    fn test_unresolved_name_is_rejected() {
        let ledger = Ledger::new(MemoryStore::new());
        let ghost = Address::Name(NameAddress::parse("ghost").unwrap());
        let err = ledger.push(&block(0, vec![mint(0, ghost, 1)])).unwrap_err();
        assert!(matches!(err, StorageError::Unresolved(_)));
    }

    #[test]
    fn test_pop_on_empty_ledger() {
        let ledger = Ledger::new(MemoryStore::new());
        assert!(matches!(ledger.pop(), Err(StorageError::NotFound(_))));
    }
}
