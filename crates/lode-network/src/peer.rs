//! Peer RPC boundary.
//!
//! The chain core never talks to sockets; the node's sync loops drive this
//! trait instead, and the transport supplies an implementation. Tests plug
//! in scripted fakes.

use async_trait::async_trait;

use lode_core::error::NetworkError;
use lode_core::types::{Block, Hash256};

/// A peer's head summary, as answered to `chain_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerTip {
    pub top_block: Hash256,
    pub total_work: u128,
}

/// Request/response RPC surface a connected peer exposes.
///
/// Every call carries the transport's own timeout; a timed-out or failed
/// call is a local matter for the calling loop and must never propagate
/// into the chain core.
#[async_trait]
pub trait PeerRpc: Send + Sync {
    /// The peer's current head summary.
    async fn chain_info(&self) -> Result<PeerTip, NetworkError>;

    /// One chunk of the peer's primary chain past our locator: hashes
    /// paired with cumulative work, ascending.
    async fn chain_primary(
        &self,
        block_locator: Vec<Hash256>,
        chunk_size: u64,
        chunk_n: u64,
    ) -> Result<(Vec<Hash256>, Vec<u128>), NetworkError>;

    /// Fetch blocks by hash; the peer may omit hashes it does not know.
    async fn request_blocks(&self, hashes: Vec<Hash256>) -> Result<Vec<Block>, NetworkError>;

    /// Push a block to the peer.
    async fn announce_block(&self, block: Block) -> Result<(), NetworkError>;
}
