//! Block miner.
//!
//! Builds a candidate extending the current head, precomputes the state
//! commitment from the candidate's own effects, then searches nonce space
//! on a blocking task. The search rewrites only the 8-byte nonce window of
//! the canonical encoding ([`Block::NONCE_OFFSET`]) instead of re-encoding
//! the block per attempt, and checks the stop flag on every nonce.
//! [`Miner::stop`] returns only after the in-flight search has observed the
//! flag and wound down.
//!
//! Mined blocks go through the ordinary ingestion queue like any block
//! received from a peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use lode_chain::{Chain, ChainStore};
use lode_core::error::ChainError;
use lode_core::pow;
use lode_core::types::{Block, Hash256, PubKey, hash_pow_bytes};

use crate::sync::unix_now;

pub struct Miner<S: ChainStore> {
    chain: Arc<Mutex<Chain<S>>>,
    ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
    coinbase: PubKey,
    work_target: u64,
    stop: Arc<AtomicBool>,
    /// Held by the blocking nonce search for its whole run; [`stop`](Self::stop)
    /// acquires it to wait the search out.
    search_gate: Arc<Mutex<()>>,
}

impl<S: ChainStore> Miner<S> {
    pub fn new(
        chain: Arc<Mutex<Chain<S>>>,
        ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
        coinbase: PubKey,
        work_target: u64,
    ) -> Self {
        Self {
            chain,
            ingest_tx,
            coinbase,
            work_target,
            stop: Arc::new(AtomicBool::new(false)),
            search_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Stop the miner. Idempotent; blocks until the in-flight nonce search
    /// has observed the flag and released its slot, so no search is still
    /// hashing when this returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.search_gate.lock());
    }

    /// True while a nonce search is running on the blocking pool.
    pub fn is_mining(&self) -> bool {
        self.search_gate.is_locked()
    }

    /// Mine blocks until stopped. Each round rebuilds the candidate from
    /// the current head, so the miner follows reorganizations between
    /// rounds.
    pub async fn run(&self) {
        info!(coinbase = %self.coinbase, work_target = self.work_target, "miner started");
        while !self.stop.load(Ordering::SeqCst) {
            match self.mine_one().await {
                Ok(Some(block)) => {
                    info!(hash = %block.hash(), total_work = block.total_work, "mined block");
                    if self.ingest_tx.send(vec![block]).is_err() {
                        warn!("ingestion queue closed; stopping miner");
                        break;
                    }
                }
                // Stopped mid-search.
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to build mining candidate: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("miner stopped");
    }

    /// A fresh candidate on top of the current head, commitment filled in.
    pub fn build_candidate(&self) -> Result<Block, ChainError> {
        let mut chain = self.chain.lock();
        let head = chain.head();
        let mut candidate = Block {
            links: vec![head.hash()],
            work_target: self.work_target,
            total_work: head.total_work + self.work_target as u128,
            timestamp: unix_now(),
            nonce: 0,
            coinbase: self.coinbase,
            tx: None,
            // Placeholder; the encoding length (and so the issuance) does
            // not depend on the commitment's value.
            state_hash: Hash256::ZERO,
        };
        candidate.state_hash = chain.state_hash_after(&candidate)?;
        Ok(candidate)
    }

    async fn mine_one(&self) -> Result<Option<Block>, ChainError> {
        let candidate = self.build_candidate()?;
        let stop = Arc::clone(&self.stop);
        let gate = Arc::clone(&self.search_gate);
        let handle = tokio::task::spawn_blocking(move || {
            let _running = gate.lock();
            search_nonce(&candidate, &stop)
        });
        match handle.await {
            Ok(mined) => Ok(mined),
            Err(e) => {
                warn!("nonce search task failed: {e}");
                Ok(None)
            }
        }
    }
}

/// Search nonce space for a hash satisfying the block's work target.
///
/// Returns `None` if the stop flag is raised before a solution is found.
pub fn search_nonce(block: &Block, stop: &AtomicBool) -> Option<Block> {
    let mut bytes = block.pow_bytes();
    for nonce in 0u64..=u64::MAX {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        bytes[Block::NONCE_OFFSET..Block::NONCE_OFFSET + 8].copy_from_slice(&nonce.to_le_bytes());
        if pow::hash_meets_target(&hash_pow_bytes(&bytes), block.work_target) {
            return Some(block.with_nonce(nonce));
        }
    }
    None
}
