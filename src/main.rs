//! Daten node
//!
//! Opens the on-disk ledger and, when a miner address is configured, mines
//! on top of it until interrupted.
//!
//! Usage: `daten-node [config.toml]`. The path may also come from
//! `DATEN_CONFIG`; a missing file means default settings.

use daten_core::config::NodeConfig;
use daten_core::constants::CHAIN_NAME;
use daten_core::consensus::Block;
use daten_core::crypto::Hash;
use daten_core::mining::{unix_timestamp, Miner, MiningResult};
use daten_core::node::{GenesisInfo, Node};
use daten_core::storage::SledStore;
use daten_core::validation::Address;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Poll interval for a new tip
const TIP_POLL: Duration = Duration::from_millis(500);

/// Rebuild the candidate at least this often to pick up new transactions
const CANDIDATE_LIFETIME: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DATEN_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("daten.toml"));
    let config = NodeConfig::load(&config_path)?;
    info!(config = %config_path.display(), chain = CHAIN_NAME, "Starting node");

    let genesis = GenesisInfo::new(&config.chain);
    info!(
        hash = %genesis.hash,
        timestamp = genesis.timestamp,
        difficulty = format_args!("0x{:08x}", genesis.difficulty),
        total_supply = genesis.total_supply,
        "Genesis"
    );

    let node = Node::open(&config)?;
    let status = node.status()?;
    info!(height = status.height, tip = %status.tip_hash, "Chain ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    let miner = Miner::new();

    let mining = match &config.miner_address {
        Some(text) => {
            let address = Address::from_string(text)?;
            let threads = match config.mining_threads {
                0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
                n => n,
            };
            info!(miner = %address, threads, "Mining enabled");
            Some(tokio::spawn(mine(node.clone(), address, threads, miner.clone(), Arc::clone(&shutdown))))
        }
        None => {
            info!("No miner address configured, mining disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping node...");
    shutdown.store(true, Ordering::SeqCst);
    miner.stop();
    if let Some(handle) = mining {
        if let Err(e) = handle.await {
            error!(error = %e, "Mining task failed");
        }
    }

    node.with_chain(|chain| chain.ledger().store().flush())?;
    info!("Node stopped");
    Ok(())
}

/// Mining loop: one candidate per round, split across `threads` workers by
/// start nonce. A round ends on a solution, a new tip, candidate expiry or
/// shutdown; every worker has returned before the next round starts.
async fn mine(node: Node<SledStore>, address: Address, threads: usize, miner: Miner, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        let candidate = match node.new_candidate(&address, unix_timestamp()) {
            Ok(block) => block,
            Err(e) => {
                error!(error = %e, "Failed to build candidate");
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let parent = candidate.header.previous_hash;
        debug!(index = candidate.index(), txs = candidate.transactions.len(), "Mining candidate");

        let (tx, mut rx) = mpsc::channel(threads);
        miner.reset();

        for i in 0..threads {
            let worker = miner.clone();
            let tx_worker = tx.clone();
            let mut block = candidate.clone();

            // Offset start nonces to avoid duplicate work
            block.header.nonce = ((u64::from(u32::MAX) + 1) * i as u64 / threads as u64) as u32;

            tokio::task::spawn_blocking(move || {
                let result = worker.mine_block(block);
                let _ = tx_worker.blocking_send(result);
            });
        }
        drop(tx);

        let mut found = None;
        tokio::select! {
            result = first_solution(&mut rx) => found = result,
            _ = stale(&node, parent, &shutdown) => {}
        }
        miner.stop();
        while rx.recv().await.is_some() {}

        if let Some(block) = found {
            let index = block.index();
            match node.submit_block(block) {
                Ok(()) => info!(index, "Mined block"),
                Err(e) => warn!(index, error = %e, "Mined block rejected"),
            }
        }
    }
}

async fn first_solution(rx: &mut mpsc::Receiver<MiningResult>) -> Option<Block> {
    while let Some(result) = rx.recv().await {
        match result {
            MiningResult::Success(block) => return Some(block),
            MiningResult::InvalidTarget => {
                error!("Candidate carries an undecodable target");
                return None;
            }
            MiningResult::Interrupted => {}
        }
    }
    None
}

/// Resolves once the candidate built on `parent` should be abandoned
async fn stale(node: &Node<SledStore>, parent: Hash, shutdown: &AtomicBool) {
    let started = Instant::now();
    loop {
        sleep(TIP_POLL).await;
        if shutdown.load(Ordering::SeqCst) || started.elapsed() >= CANDIDATE_LIFETIME {
            return;
        }
        match node.status() {
            Ok(status) if status.tip_hash != parent => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read chain status");
                return;
            }
        }
    }
}
