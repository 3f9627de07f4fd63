//! Full node composition.
//!
//! [`Node`] wires RocksDB storage, the chain, the seeker, the miner, and
//! the connected peers together, and runs the control loops from
//! [`crate::sync`]. Peers are injected as [`PeerRpc`] implementations; the
//! transport behind them is out of scope.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use lode_chain::Chain;
use lode_core::error::ChainError;
use lode_core::types::{Block, Hash256, PubKey};
use lode_network::{Message, PeerRpc, Seeker};

use crate::config::NodeConfig;
use crate::miner::Miner;
use crate::storage::RocksStore;
use crate::sync::{self, Peers};

/// The full node.
pub struct Node {
    config: NodeConfig,
    chain: Arc<Mutex<Chain<RocksStore>>>,
    seeker: Arc<Mutex<Seeker>>,
    peers: Peers,
    ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
    /// Taken once by [`run`](Self::run).
    ingest_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<Block>>>>,
    miner: Option<Miner<RocksStore>>,
}

impl Node {
    /// Open (or create) the chain database and assemble the node.
    ///
    /// An unreadable database is fatal here; bad peer input never is.
    pub fn new(config: NodeConfig, peers: Vec<Arc<dyn PeerRpc>>) -> Result<Arc<Self>, ChainError> {
        let store = RocksStore::open(config.db_path())?;
        let chain = Arc::new(Mutex::new(Chain::new(store)?));
        let seeker = Arc::new(Mutex::new(Seeker::new()));
        let peers: Peers = Arc::new(peers);
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();

        let miner = config.mine.then(|| {
            Miner::new(
                Arc::clone(&chain),
                ingest_tx.clone(),
                config.coinbase,
                config.mine_work_target,
            )
        });

        Ok(Arc::new(Self {
            config,
            chain,
            seeker,
            peers,
            ingest_tx,
            ingest_rx: tokio::sync::Mutex::new(Some(ingest_rx)),
            miner,
        }))
    }

    /// Queue blocks for ingestion; the transport and the miner both enter
    /// through here.
    pub fn submit_blocks(&self, blocks: Vec<Block>) {
        if self.ingest_tx.send(blocks).is_err() {
            warn!("ingestion queue closed; dropping submitted blocks");
        }
    }

    /// Route one inbound peer message, returning the reply if the message
    /// was a request.
    pub fn handle_message(&self, message: Message) -> Option<Message> {
        sync::handle_message(&self.chain, &self.ingest_tx, message)
    }

    /// Run the control loops (and the miner, when configured) until the
    /// node is torn down. Calling twice is a no-op.
    pub async fn run(&self) {
        let Some(batches) = self.ingest_rx.lock().await.take() else {
            warn!("node control loops already running");
            return;
        };

        let ingestion = sync::ingestion_worker(
            Arc::clone(&self.chain),
            Arc::clone(&self.seeker),
            Arc::clone(&self.peers),
            batches,
            self.ingest_tx.clone(),
        );
        let seeking = sync::seek_loop(
            Arc::clone(&self.chain),
            Arc::clone(&self.seeker),
            Arc::clone(&self.peers),
            self.ingest_tx.clone(),
        );
        let polling = sync::poll_loop(
            Arc::clone(&self.chain),
            Arc::clone(&self.seeker),
            Arc::clone(&self.peers),
            self.ingest_tx.clone(),
        );

        match &self.miner {
            Some(miner) => {
                let _ = tokio::join!(ingestion, seeking, polling, miner.run());
            }
            None => {
                let _ = tokio::join!(ingestion, seeking, polling);
            }
        }
    }

    /// Stop the miner, if one is running, waiting for its nonce search to
    /// wind down. The control loops end when the process does.
    pub fn stop(&self) {
        if let Some(miner) = &self.miner {
            miner.stop();
        }
    }

    // --- queries ---

    pub fn head_hash(&self) -> Hash256 {
        self.chain.lock().head().hash()
    }

    pub fn head_height(&self) -> u64 {
        self.chain.lock().head_height()
    }

    pub fn balance(&self, key: &PubKey) -> u64 {
        self.chain.lock().balance(key)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
