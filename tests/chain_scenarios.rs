//! End-to-end chain scenarios
//!
//! Multi-block histories driven through the public API: reorgs, the name
//! registry, balance bookkeeping, block assembly and persistence.

use std::sync::Arc;

use daten_core::config::ChainParams;
use daten_core::consensus::{decompress, less_or_equal, Block, Blockchain, ChainError, ValidationError};
use daten_core::constants::{GENESIS_TIMESTAMP, TOTAL_SUPPLY};
use daten_core::crypto::{verify_merkle_path, SignatureVerifier};
use daten_core::storage::{KvStore, MemoryStore, SledStore, StorageError};
use daten_core::validation::{Address, NameAddress, RawAddress, Transaction};

/// Signature checks are covered elsewhere; these scenarios are about state
struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _message: &[u8], _public_key: &[u8; 33], _signature: &[u8]) -> bool {
        true
    }
}

fn open<S: KvStore>(store: S, params: ChainParams) -> Blockchain<S> {
    Blockchain::new(store, params, Arc::new(AcceptAll)).unwrap()
}

fn miner() -> Address {
    Address::Raw(RawAddress([0x02; 33]))
}

fn account(byte: u8) -> RawAddress {
    let mut key = [byte; 33];
    key[0] = 0x03;
    RawAddress(key)
}

fn name(text: &str) -> Address {
    Address::Name(NameAddress::parse(text).unwrap())
}

fn mine(mut block: Block) -> Block {
    let target = decompress(block.header.difficulty).unwrap();
    while !less_or_equal(&block.hash().0, &target) {
        block.header.nonce += 1;
    }
    block
}

/// Mine and push the next block with whatever the pool holds
fn next<S: KvStore>(chain: &mut Blockchain<S>) -> Block {
    let index = chain.height().unwrap();
    let block = mine(chain.new_block(&miner(), GENESIS_TIMESTAMP + index).unwrap());
    chain.push_block(block.clone()).unwrap();
    block
}

fn spend(target: u32, source: RawAddress, destination: Address, amount: u64, fee: u64) -> Transaction {
    let mut tx = Transaction::new(target, Address::Raw(source), destination, amount, fee);
    tx.signature = vec![0x30];
    tx
}

/// A block whose only user transaction claims `leaf` at the top level
fn claim_block<S: KvStore>(chain: &mut Blockchain<S>, leaf: &str) -> Block {
    let height = chain.height().unwrap();
    let claim = spend(height, RawAddress::SUPPLY, miner(), 1, 0).with_name(leaf);
    chain.add_transaction(claim).unwrap();
    next(chain)
}

fn assert_conserved<S: KvStore>(chain: &Blockchain<S>) {
    assert_eq!(chain.ledger().total_tracked_balance().unwrap(), u128::from(TOTAL_SUPPLY));
}

#[test]
fn test_longer_fork_is_adopted_and_shorter_is_rolled_back() {
    let mut first = open(MemoryStore::new(), ChainParams::devnet());
    claim_block(&mut first, "1");
    claim_block(&mut first, "2");
    assert_eq!(first.height().unwrap(), 3);

    let mut second = open(first.ledger().store().snapshot(), ChainParams::devnet());
    claim_block(&mut first, "3");
    claim_block(&mut first, "4");
    for leaf in ["5", "6", "7", "8"] {
        claim_block(&mut second, leaf);
    }
    assert_eq!(first.height().unwrap(), 5);
    assert_eq!(second.height().unwrap(), 7);

    let mut third = open(first.ledger().store().snapshot(), ChainParams::devnet());
    let third_tip = third.tip_hash().unwrap();

    let candidate = second.get_block_range(3, 7).unwrap();
    assert!(first.fork(&candidate).unwrap());
    assert_eq!(first.height().unwrap(), 7);
    assert_eq!(first.tip_hash().unwrap(), second.tip_hash().unwrap());
    assert_eq!(first.resolve(&name("3")).unwrap(), None);
    assert_eq!(first.resolve(&name("5")).unwrap(), Some(RawAddress::SUPPLY));
    assert_conserved(&first);

    // Starts one block past the fork point, so the first block does not link
    let detached = second.get_block_range(4, 7).unwrap();
    assert!(!third.fork(&detached).unwrap());
    assert_eq!(third.height().unwrap(), 5);
    assert_eq!(third.tip_hash().unwrap(), third_tip);
    assert_eq!(third.resolve(&name("3")).unwrap(), Some(RawAddress::SUPPLY));
    assert_eq!(third.resolve(&name("5")).unwrap(), None);
    assert_conserved(&third);
}

#[test]
fn test_fork_that_does_not_outgrow_is_rejected() {
    let mut chain = open(MemoryStore::new(), ChainParams::devnet());
    let mut rival = open(chain.ledger().store().snapshot(), ChainParams::devnet());
    claim_block(&mut chain, "a");
    claim_block(&mut chain, "b");
    claim_block(&mut rival, "c");
    claim_block(&mut rival, "d");
    let tip = chain.tip_hash().unwrap();

    // Same height is not enough
    assert!(!chain.fork(&rival.get_block_range(1, 3).unwrap()).unwrap());
    assert_eq!(chain.tip_hash().unwrap(), tip);
    assert!(!chain.fork(&[]).unwrap());
    assert!(!chain.fork(&rival.get_block_range(0, 1).unwrap()).unwrap());
}

#[test]
fn test_name_lifecycle() {
    let mut chain = open(MemoryStore::new(), ChainParams::devnet());
    let bob = account(0xb0);
    chain.add_transaction(spend(1, RawAddress::SUPPLY, Address::Raw(bob), 500, 0)).unwrap();
    next(&mut chain);

    let claim = spend(2, bob, Address::Raw(bob), 0, 1).with_name("bob");
    chain.add_transaction(claim.clone()).unwrap();
    let duplicate = spend(2, RawAddress::SUPPLY, miner(), 0, 0).with_name("bob");
    assert_eq!(
        chain.add_transaction(duplicate).unwrap_err().validation(),
        Some(&ValidationError::NameTaken)
    );
    next(&mut chain);

    assert_eq!(chain.resolve(&name("@bob")).unwrap(), Some(bob));
    assert_eq!(chain.ledger().lookup_by_name(&NameAddress::parse("bob").unwrap()).unwrap(), Some(claim.clone()));
    assert_eq!(chain.query(Some("bob"), None).unwrap(), vec![claim]);

    let late = spend(3, RawAddress::SUPPLY, miner(), 0, 0).with_name("bob");
    assert_eq!(
        chain.add_transaction(late).unwrap_err().validation(),
        Some(&ValidationError::NameTaken)
    );

    // Payments to the name reach the key, and sub-names live under it
    chain.add_transaction(spend(3, RawAddress::SUPPLY, name("bob"), 100, 0)).unwrap();
    let shop = spend(3, bob, name("bob"), 0, 0).with_name("shop");
    chain.add_transaction(shop.clone()).unwrap();
    next(&mut chain);
    assert_eq!(chain.get_balance(&bob).unwrap(), 500 - 1 + 100);
    assert_eq!(chain.resolve(&name("shop.bob")).unwrap(), Some(bob));
    assert_eq!(chain.query(None, Some(&name("bob"))).unwrap(), vec![shop]);

    // A single part spelled with a dot is not the nested name
    let dotted = Address::Name(NameAddress::default().push("bob.shop"));
    assert_eq!(chain.resolve(&dotted).unwrap(), None);
    let misdirected = spend(4, RawAddress::SUPPLY, dotted, 100, 0);
    assert!(Transaction::deserialize(&misdirected.serialize()).is_err());
    assert_eq!(
        chain.add_transaction(misdirected).unwrap_err().validation(),
        Some(&ValidationError::InvalidTransactionDestination)
    );

    chain.pop_block().unwrap();
    chain.pop_block().unwrap();
    assert_eq!(chain.resolve(&name("bob")).unwrap(), None);
    assert_eq!(chain.resolve(&name("shop.bob")).unwrap(), None);
    assert_eq!(chain.get_balance(&bob).unwrap(), 500);
}

#[test]
fn test_retarget_boundary_and_median_clock() {
    let params = ChainParams {
        difficulty_adjustment_span: 4,
        blocks_clock_check: 3,
        ..ChainParams::devnet()
    };
    let floor = ChainParams::devnet().minimum_target;
    let mut chain = open(MemoryStore::new(), params);
    let difficulties: Vec<u32> = (1..=9).map(|_| next(&mut chain).header.difficulty).collect();

    // Blocks arrive one second apart, so each retarget hardens by the full ratio
    assert!(difficulties[..4].iter().all(|&d| decompress(d) == Some(floor)));
    assert!(difficulties[4..8].iter().all(|&d| d == difficulties[4]));
    assert_ne!(difficulties[8], difficulties[7]);
    let harder = decompress(difficulties[4]).unwrap();
    let hardest = decompress(difficulties[8]).unwrap();
    assert!(less_or_equal(&harder, &floor) && harder != floor);
    assert!(less_or_equal(&hardest, &harder) && hardest != harder);

    // Blocks 7, 8 and 9 carry +7, +8 and +9; the median is +8
    let tip = chain.latest_header().unwrap();
    for timestamp in [tip.timestamp - 2, tip.timestamp - 1] {
        let early = mine(chain.new_block(&miner(), timestamp).unwrap());
        assert_eq!(
            chain.push_block(early).unwrap_err().validation(),
            Some(&ValidationError::InvalidTimestamp)
        );
    }
    let equal_to_tip = mine(chain.new_block(&miner(), tip.timestamp).unwrap());
    chain.push_block(equal_to_tip).unwrap();
    assert_eq!(chain.height().unwrap(), 11);
}

#[test]
fn test_balances_follow_push_and_pop() {
    let mut chain = open(MemoryStore::new(), ChainParams::devnet());
    let alice = account(0xa1);
    let carol = account(0xca);

    chain.add_transaction(spend(1, RawAddress::SUPPLY, Address::Raw(alice), 1000, 0)).unwrap();
    next(&mut chain);
    assert_eq!(chain.get_balance(&alice).unwrap(), 1000);

    let overspend = spend(2, alice, Address::Raw(carol), 1500, 0);
    assert_eq!(
        chain.add_transaction(overspend).unwrap_err().validation(),
        Some(&ValidationError::BalanceNotEnough)
    );

    chain.add_transaction(spend(2, alice, Address::Raw(carol), 600, 10)).unwrap();
    let block = next(&mut chain);
    assert_eq!(chain.get_balance(&alice).unwrap(), 390);
    assert_eq!(chain.get_balance(&carol).unwrap(), 600);
    assert_conserved(&chain);

    let payment = &block.transactions[0];
    let proof = chain.confirm(2, &payment.hash()).unwrap();
    let root = block.header.merkle_root.unwrap();
    assert!(verify_merkle_path(&payment.hash(), &proof, &root));
    assert_eq!(chain.latest(&Address::Raw(carol)).unwrap(), vec![payment.clone()]);

    let popped = chain.pop_block().unwrap();
    assert_eq!(popped, block);
    assert_eq!(chain.get_balance(&alice).unwrap(), 1000);
    assert_eq!(chain.get_balance(&carol).unwrap(), 0);
    assert_conserved(&chain);
}

#[test]
fn test_supply_is_conserved_across_many_blocks() {
    let mut chain = open(MemoryStore::new(), ChainParams::devnet());
    for i in 1..=12u8 {
        let height = chain.height().unwrap();
        let to = Address::Raw(account(i));
        chain.add_transaction(spend(height, RawAddress::SUPPLY, to, u64::from(i) * 10, u64::from(i))).unwrap();
        next(&mut chain);
        assert_conserved(&chain);
    }
    while chain.height().unwrap() > 1 {
        chain.pop_block().unwrap();
        assert_conserved(&chain);
    }
}

#[test]
fn test_oversized_candidate_drops_cheapest_transactions() {
    let pool = |chain: &mut Blockchain<MemoryStore>| {
        for (i, fee) in [(1u8, 30u64), (2, 10), (3, 20)] {
            chain.add_transaction(spend(1, RawAddress::SUPPLY, Address::Raw(account(i)), 5, fee)).unwrap();
        }
    };

    let mut roomy = open(MemoryStore::new(), ChainParams::devnet());
    pool(&mut roomy);
    let full = roomy.new_block(&miner(), GENESIS_TIMESTAMP + 1).unwrap();
    assert_eq!(full.transactions.len(), 5);
    // Ascending byte-price
    let fees: Vec<u64> = full.transactions[..3].iter().map(|tx| tx.fee).collect();
    assert_eq!(fees, vec![10, 20, 30]);
    assert_eq!(full.transactions[3].amount, 60);

    let params = ChainParams {
        max_block_size: full.serialized_size() - 1,
        ..ChainParams::devnet()
    };
    let mut tight = open(MemoryStore::new(), params);
    pool(&mut tight);
    let block = tight.new_block(&miner(), GENESIS_TIMESTAMP + 1).unwrap();
    assert_eq!(block.transactions.len(), 4);
    assert_eq!(block.transactions[0].fee, 20);
    assert_eq!(block.transactions[2].amount, 50);
    assert!(block.serialized_size() <= tight.params().max_block_size);
    assert!(block.has_valid_merkle_root());
    tight.push_block(mine(block)).unwrap();
}

#[test]
fn test_special_transactions_may_claim_names() {
    let mut chain = open(MemoryStore::new(), ChainParams::devnet());
    let mut block = chain.new_block(&miner(), GENESIS_TIMESTAMP + 1).unwrap();
    let reward = block.transactions.len() - 1;
    block.transactions[reward].name = "pool".into();
    block.update_merkle_root();
    chain.push_block(mine(block)).unwrap();
    assert_eq!(chain.resolve(&name("pool")).unwrap(), Some(RawAddress::SUPPLY));

    let mut block = chain.new_block(&miner(), GENESIS_TIMESTAMP + 2).unwrap();
    let (fee, reward) = (block.transactions.len() - 2, block.transactions.len() - 1);
    block.transactions[fee].name = "twice".into();
    block.transactions[reward].name = "twice".into();
    block.update_merkle_root();
    assert_eq!(
        chain.push_block(mine(block)).unwrap_err().validation(),
        Some(&ValidationError::NameTaken)
    );

    let mut block = chain.new_block(&miner(), GENESIS_TIMESTAMP + 2).unwrap();
    let fee = block.transactions.len() - 2;
    block.transactions[fee].fee = 1;
    block.update_merkle_root();
    assert_eq!(
        chain.push_block(mine(block)).unwrap_err().validation(),
        Some(&ValidationError::InvalidFeeTransaction)
    );
}

#[test]
fn test_sled_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let alice = account(0xa1);

    let tip = {
        let mut chain = open(SledStore::open(dir.path()).unwrap(), ChainParams::devnet());
        chain.add_transaction(spend(1, RawAddress::SUPPLY, Address::Raw(alice), 42, 0)).unwrap();
        next(&mut chain);
        claim_block(&mut chain, "alice");
        chain.tip_hash().unwrap()
    };

    let chain = open(SledStore::open(dir.path()).unwrap(), ChainParams::devnet());
    assert_eq!(chain.height().unwrap(), 3);
    assert_eq!(chain.tip_hash().unwrap(), tip);
    assert_eq!(chain.get_balance(&alice).unwrap(), 42);
    assert_eq!(chain.resolve(&name("alice")).unwrap(), Some(RawAddress::SUPPLY));
    assert_conserved(&chain);
    drop(chain);

    // A different network floor means a different genesis
    let mismatch = Blockchain::new(
        SledStore::open(dir.path()).unwrap(),
        ChainParams::default(),
        Arc::new(AcceptAll),
    );
    assert!(matches!(
        mismatch,
        Err(ChainError::Storage(StorageError::GenesisMismatch))
    ));
}
