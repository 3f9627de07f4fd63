//! # lode-chain
//! The chain state machine: block ingestion, fork choice by cumulative
//! work, transactional reorganization, and orphan bookkeeping.
//!
//! [`Chain`] is a synchronous, single-writer structure. Callers that need
//! shared access wrap it in a lock; all ingestion for a node funnels
//! through one call site so batches serialize naturally.

pub mod chain;
pub mod orphanage;
pub mod store;

pub use chain::{AddOutcome, Chain, Ingest};
pub use orphanage::Orphanage;
pub use store::{ChainStore, MemoryStore};
