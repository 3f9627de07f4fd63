//! # lode-network
//! The network-facing side of a Lode node: wire message types and framing,
//! the block seeker that repairs gaps in the block graph, and the peer RPC
//! boundary the node drives during sync.

pub mod peer;
pub mod protocol;
pub mod seeker;

pub use peer::{PeerRpc, PeerTip};
pub use protocol::Message;
pub use seeker::{SeekAction, Seeker};
