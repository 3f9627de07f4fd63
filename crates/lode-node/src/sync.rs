//! Node control loops.
//!
//! Three cooperating tasks keep the chain current:
//!
//! - the ingestion worker drains the block queue and is the only caller of
//!   [`Chain::add_blocks`], serializing all chain mutation;
//! - the seek loop sweeps the [`Seeker`] for overdue fetches;
//! - the poll loop asks peers for their head summary and walks their
//!   primary chain when they are ahead.
//!
//! Blocks obtained anywhere (peers, miner, announcements) funnel back into
//! the same ingestion queue.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lode_chain::{Chain, ChainStore};
use lode_core::constants::{CHAIN_PRIMARY_CHUNK, SEEK_FOLLOW_UP_SECS, SYNC_POLL_SECS};
use lode_core::error::NetworkError;
use lode_core::types::{Block, Hash256};
use lode_network::{Message, PeerRpc, SeekAction, Seeker};

/// Connected peers, fixed at node construction. The transport behind each
/// [`PeerRpc`] is out of scope here.
pub type Peers = Arc<Vec<Arc<dyn PeerRpc>>>;

/// Wall-clock seconds since the Unix epoch, the seeker's clock.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Drain the block queue, one batch per [`Chain::add_blocks`] call.
///
/// Missing parents reported by the chain go to the seeker; a moved head is
/// announced to all peers. Runs until every queue sender is dropped.
pub async fn ingestion_worker<S: ChainStore>(
    chain: Arc<Mutex<Chain<S>>>,
    seeker: Arc<Mutex<Seeker>>,
    peers: Peers,
    mut batches: mpsc::UnboundedReceiver<Vec<Block>>,
    ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
) {
    while let Some(batch) = batches.recv().await {
        let size = batch.len();
        let outcome = chain.lock().add_blocks(batch);
        match outcome {
            Ok(outcome) => {
                if let Some(head) = outcome.new_head {
                    info!(%head, linked = outcome.linked.len(), "head advanced");
                    announce_head(&chain, &peers, &head).await;
                }
                if !outcome.missing.is_empty() {
                    debug!(missing = outcome.missing.len(), "seeking missing parents");
                    let actions = seeker.lock().put(outcome.missing, unix_now());
                    dispatch(&peers, actions, &ingest_tx).await;
                }
            }
            Err(e) => warn!(blocks = size, "rejected batch: {e}"),
        }
    }
    debug!("ingestion queue closed");
}

/// Sweep the seeker for overdue fetches every follow-up interval.
pub async fn seek_loop<S: ChainStore>(
    chain: Arc<Mutex<Chain<S>>>,
    seeker: Arc<Mutex<Seeker>>,
    peers: Peers,
    ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(SEEK_FOLLOW_UP_SECS));
    loop {
        ticker.tick().await;
        let actions = {
            let chain = chain.lock();
            seeker.lock().follow_up(unix_now(), |hash| chain.has_block(hash))
        };
        dispatch(&peers, actions, &ingest_tx).await;
    }
}

/// Ask every peer for its head summary each poll interval and chase any
/// peer holding more cumulative work than we do.
pub async fn poll_loop<S: ChainStore>(
    chain: Arc<Mutex<Chain<S>>>,
    seeker: Arc<Mutex<Seeker>>,
    peers: Peers,
    ingest_tx: mpsc::UnboundedSender<Vec<Block>>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(SYNC_POLL_SECS));
    loop {
        ticker.tick().await;
        for peer in peers.iter() {
            if let Err(e) = poll_peer(&chain, &seeker, peer.as_ref(), &peers, &ingest_tx).await {
                debug!("chain info poll failed: {e}");
            }
        }
    }
}

async fn poll_peer<S: ChainStore>(
    chain: &Arc<Mutex<Chain<S>>>,
    seeker: &Arc<Mutex<Seeker>>,
    peer: &dyn PeerRpc,
    peers: &Peers,
    ingest_tx: &mpsc::UnboundedSender<Vec<Block>>,
) -> Result<(), NetworkError> {
    let tip = peer.chain_info().await?;
    let (behind, locator) = {
        let chain = chain.lock();
        let behind =
            tip.total_work > chain.head().total_work && !chain.has_block(&tip.top_block);
        (behind, chain.make_block_locator())
    };
    if !behind {
        return Ok(());
    }
    info!(top = %tip.top_block, total_work = tip.total_work, "peer is ahead, walking its primary chain");

    let mut chunk_n = 0;
    loop {
        let (hashes, total_works) = peer
            .chain_primary(locator.clone(), CHAIN_PRIMARY_CHUNK, chunk_n)
            .await?;
        let last_chunk = (hashes.len() as u64) < CHAIN_PRIMARY_CHUNK;

        let pairs: Vec<(u128, Hash256)> = {
            let chain = chain.lock();
            hashes
                .iter()
                .zip(&total_works)
                .filter(|(hash, _)| !chain.has_block(hash))
                .map(|(hash, work)| (*work, *hash))
                .collect()
        };
        if !pairs.is_empty() {
            let actions = seeker.lock().put_with_work(pairs, unix_now());
            dispatch(peers, actions, ingest_tx).await;
        }
        if last_chunk {
            return Ok(());
        }
        chunk_n += 1;
    }
}

/// Push a block to every peer, best-effort.
async fn announce_head<S: ChainStore>(
    chain: &Arc<Mutex<Chain<S>>>,
    peers: &Peers,
    head: &Hash256,
) {
    let block = match chain.lock().get_block(head) {
        Ok(block) => block,
        Err(e) => {
            warn!(%head, "cannot announce head: {e}");
            return;
        }
    };
    for peer in peers.iter() {
        if let Err(e) = peer.announce_block(block.clone()).await {
            debug!("failed to announce block to peer: {e}");
        }
    }
}

/// Execute seek actions: try peers in order until one provides blocks,
/// then queue what was provided for ingestion.
async fn dispatch(
    peers: &Peers,
    actions: Vec<SeekAction>,
    ingest_tx: &mpsc::UnboundedSender<Vec<Block>>,
) {
    for action in actions {
        let SeekAction::RequestBlocks(hashes) = action;
        let mut provided = Vec::new();
        for peer in peers.iter() {
            match peer.request_blocks(hashes.clone()).await {
                Ok(blocks) if !blocks.is_empty() => {
                    provided = blocks;
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!("peer failed block request: {e}"),
            }
        }
        if !provided.is_empty() && ingest_tx.send(provided).is_err() {
            debug!("ingestion queue closed; dropping fetched blocks");
        }
    }
}

/// Route one inbound message: requests are answered from the chain, block
/// announcements we have not seen are queued for ingestion.
pub fn handle_message<S: ChainStore>(
    chain: &Arc<Mutex<Chain<S>>>,
    ingest_tx: &mpsc::UnboundedSender<Vec<Block>>,
    message: Message,
) -> Option<Message> {
    if let Message::BlockAnnounce { block } = message {
        let known = chain.lock().has_block(&block.hash());
        if !known && ingest_tx.send(vec![block]).is_err() {
            debug!("ingestion queue closed; dropping announced block");
        }
        return None;
    }
    match crate::handlers::respond(&chain.lock(), &message) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("failed to answer peer request: {e}");
            None
        }
    }
}
