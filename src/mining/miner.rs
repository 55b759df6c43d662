//! Block miner implementation
//!
//! Performs the nonce search on a candidate block. Candidates are
//! disposable: stopping the miner never touches the chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consensus::{decompress, less_or_equal, Block};

/// Mining result
#[derive(Debug)]
pub enum MiningResult {
    /// Successfully mined a block
    Success(Block),
    /// Mining was interrupted
    Interrupted,
    /// The candidate claims a target that cannot be decoded
    InvalidTarget,
}

/// Current Unix time in seconds, saturating into the header's `u32`
pub fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Block miner
#[derive(Debug, Clone, Default)]
pub struct Miner {
    /// Stop signal
    stop_signal: Arc<AtomicBool>,
}

impl Miner {
    /// Create a new miner
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stop signal handle
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Stop mining
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Reset stop signal
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Mine a block (find valid nonce)
    ///
    /// Increments the nonce from its current value until the header hash
    /// meets the claimed target or the stop signal is raised. When the nonce
    /// wraps the timestamp is refreshed so the search space changes.
    pub fn mine_block(&self, block: Block) -> MiningResult {
        self.mine_with_clock(block, unix_timestamp)
    }

    fn mine_with_clock<F>(&self, mut block: Block, mut clock: F) -> MiningResult
    where
        F: FnMut() -> u32,
    {
        let Some(target) = decompress(block.header.difficulty) else {
            return MiningResult::InvalidTarget;
        };
        let start_nonce = block.header.nonce;

        loop {
            // Check stop signal
            if self.is_stopped() {
                return MiningResult::Interrupted;
            }

            if less_or_equal(&block.hash().0, &target) {
                return MiningResult::Success(block);
            }

            block.header.nonce = block.header.nonce.wrapping_add(1);

            // Full nonce space exhausted
            if block.header.nonce == start_nonce {
                block.header.timestamp = clock().max(block.header.timestamp.saturating_add(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    fn candidate(difficulty: u32) -> Block {
        Block::new(1, 1_600_000_000, Hash::zero(), difficulty, vec![], 0)
    }

    #[test]
    fn test_mines_easy_target() {
        let miner = Miner::new();
        match miner.mine_block(candidate(0x20ffffff)) {
            MiningResult::Success(block) => {
                let target = decompress(block.header.difficulty).unwrap();
                assert!(less_or_equal(&block.hash().0, &target));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_stopped_miner_gives_up() {
        let miner = Miner::new();
        miner.stop();
        // An unreachable target would loop forever without the stop signal
        assert!(matches!(miner.mine_block(candidate(0x03000000)), MiningResult::Interrupted));
    }

    #[test]
    fn test_undecodable_target() {
        let miner = Miner::new();
        assert!(matches!(miner.mine_block(candidate(0x2100ffff)), MiningResult::InvalidTarget));
    }

    #[test]
    fn test_miner_stop_signal() {
        let miner = Miner::new();
        let signal = miner.stop_signal();

        assert!(!signal.load(Ordering::SeqCst));

        miner.stop();
        assert!(signal.load(Ordering::SeqCst));

        miner.reset();
        assert!(!signal.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_from_another_thread() {
        let miner = Miner::new();
        let worker = miner.clone();
        let handle = std::thread::spawn(move || worker.mine_block(candidate(0x03000000)));
        std::thread::sleep(std::time::Duration::from_millis(20));
        miner.stop();
        assert!(matches!(handle.join().unwrap(), MiningResult::Interrupted));
    }
}
