//! # lode-node — Full node: RocksDB, miner, orchestration.
//!
//! Composes the Lode subsystems into a running full node:
//! - [`storage::RocksStore`] — persistent chain storage backed by RocksDB
//! - [`node::Node`] — wires storage, chain, seeker, miner, and peers
//! - [`miner::Miner`] — candidate construction and nonce search
//! - [`handlers`] — answers peer protocol requests from the chain
//! - [`sync`] — ingestion worker, seek loop, chain-info poll loop
//! - [`config::NodeConfig`] — node configuration

pub mod config;
pub mod handlers;
pub mod miner;
pub mod node;
pub mod storage;
pub mod sync;

pub use config::NodeConfig;
pub use miner::Miner;
pub use node::Node;
pub use storage::RocksStore;
