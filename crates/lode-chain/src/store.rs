//! Persistence boundary for the chain.
//!
//! [`ChainStore`] abstracts the durable side of the chain: blocks by hash,
//! the two height indexes, the account table, and the head pointer. The
//! chain journals every store mutation inside a batch so a failed batch can
//! be undone; implementations therefore expose point deletes alongside
//! writes, not just appends.
//!
//! [`MemoryStore`] backs tests and ephemeral nodes. The RocksDB
//! implementation lives in `lode-node`.

use std::collections::HashMap;

use lode_core::error::ChainError;
use lode_core::types::{Block, Hash256, PubKey};

pub trait ChainStore: Send {
    /// Persist a block under its hash. Blocks are immutable, so
    /// overwriting an existing entry is a no-op in effect.
    fn put_block(&mut self, block: &Block) -> Result<(), ChainError>;

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError>;

    /// Remove a block written earlier in a failed batch.
    fn delete_block(&mut self, hash: &Hash256) -> Result<(), ChainError>;

    /// Hashes of every stored block, in no particular order.
    fn block_hashes(&self) -> Result<Vec<Hash256>, ChainError>;

    /// Height of a block, recorded for every linked block regardless of
    /// which branch it sits on.
    fn set_block_height(&mut self, hash: &Hash256, height: u64) -> Result<(), ChainError>;

    fn block_height(&self, hash: &Hash256) -> Result<Option<u64>, ChainError>;

    fn delete_block_height(&mut self, hash: &Hash256) -> Result<(), ChainError>;

    /// Primary-chain index: height to hash, valid only along the current
    /// primary chain and rewritten on reorganization.
    fn set_hash_at_height(&mut self, height: u64, hash: &Hash256) -> Result<(), ChainError>;

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash256>, ChainError>;

    fn delete_hash_at_height(&mut self, height: u64) -> Result<(), ChainError>;

    /// Persist an account balance. A balance of zero deletes the row.
    fn set_balance(&mut self, key: &PubKey, balance: u64) -> Result<(), ChainError>;

    fn balances(&self) -> Result<Vec<(PubKey, u64)>, ChainError>;

    fn set_head(&mut self, hash: &Hash256) -> Result<(), ChainError>;

    fn head(&self) -> Result<Option<Hash256>, ChainError>;

    /// One-shot flag set after the root block is installed.
    fn set_initialized(&mut self) -> Result<(), ChainError>;

    fn initialized(&self) -> Result<bool, ChainError>;
}

/// In-memory [`ChainStore`].
#[derive(Default)]
pub struct MemoryStore {
    blocks: HashMap<Hash256, Block>,
    block_heights: HashMap<Hash256, u64>,
    hashes_by_height: HashMap<u64, Hash256>,
    balances: HashMap<PubKey, u64>,
    head: Option<Hash256>,
    initialized: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryStore {
    fn put_block(&mut self, block: &Block) -> Result<(), ChainError> {
        self.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn delete_block(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.blocks.remove(hash);
        Ok(())
    }

    fn block_hashes(&self) -> Result<Vec<Hash256>, ChainError> {
        Ok(self.blocks.keys().copied().collect())
    }

    fn set_block_height(&mut self, hash: &Hash256, height: u64) -> Result<(), ChainError> {
        self.block_heights.insert(*hash, height);
        Ok(())
    }

    fn block_height(&self, hash: &Hash256) -> Result<Option<u64>, ChainError> {
        Ok(self.block_heights.get(hash).copied())
    }

    fn delete_block_height(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.block_heights.remove(hash);
        Ok(())
    }

    fn set_hash_at_height(&mut self, height: u64, hash: &Hash256) -> Result<(), ChainError> {
        self.hashes_by_height.insert(height, *hash);
        Ok(())
    }

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash256>, ChainError> {
        Ok(self.hashes_by_height.get(&height).copied())
    }

    fn delete_hash_at_height(&mut self, height: u64) -> Result<(), ChainError> {
        self.hashes_by_height.remove(&height);
        Ok(())
    }

    fn set_balance(&mut self, key: &PubKey, balance: u64) -> Result<(), ChainError> {
        if balance == 0 && *key != PubKey::ZERO {
            self.balances.remove(key);
        } else {
            self.balances.insert(*key, balance);
        }
        Ok(())
    }

    fn balances(&self) -> Result<Vec<(PubKey, u64)>, ChainError> {
        Ok(self.balances.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn set_head(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.head = Some(*hash);
        Ok(())
    }

    fn head(&self) -> Result<Option<Hash256>, ChainError> {
        Ok(self.head)
    }

    fn set_initialized(&mut self) -> Result<(), ChainError> {
        self.initialized = true;
        Ok(())
    }

    fn initialized(&self) -> Result<bool, ChainError> {
        Ok(self.initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::genesis;

    #[test]
    fn block_round_trip() {
        let mut store = MemoryStore::new();
        let root = genesis::root_block().clone();
        let hash = root.hash();
        store.put_block(&root).unwrap();
        assert_eq!(store.get_block(&hash).unwrap(), Some(root));
        store.delete_block(&hash).unwrap();
        assert_eq!(store.get_block(&hash).unwrap(), None);
    }

    #[test]
    fn zero_balance_deletes_row() {
        let mut store = MemoryStore::new();
        let key = PubKey([7; 32]);
        store.set_balance(&key, 50).unwrap();
        assert_eq!(store.balances().unwrap(), vec![(key, 50)]);
        store.set_balance(&key, 0).unwrap();
        assert!(store.balances().unwrap().is_empty());
    }

    #[test]
    fn zero_key_row_survives_zero_balance() {
        let mut store = MemoryStore::new();
        store.set_balance(&PubKey::ZERO, 0).unwrap();
        assert_eq!(store.balances().unwrap(), vec![(PubKey::ZERO, 0)]);
    }

    #[test]
    fn height_indexes_are_independent() {
        let mut store = MemoryStore::new();
        let hash = genesis::root_hash();
        store.set_block_height(&hash, 3).unwrap();
        assert_eq!(store.block_height(&hash).unwrap(), Some(3));
        assert_eq!(store.hash_at_height(3).unwrap(), None);
        store.set_hash_at_height(3, &hash).unwrap();
        assert_eq!(store.hash_at_height(3).unwrap(), Some(hash));
        store.delete_hash_at_height(3).unwrap();
        assert_eq!(store.hash_at_height(3).unwrap(), None);
        assert_eq!(store.block_height(&hash).unwrap(), Some(3));
    }

    #[test]
    fn initialized_flag_latches() {
        let mut store = MemoryStore::new();
        assert!(!store.initialized().unwrap());
        store.set_initialized().unwrap();
        assert!(store.initialized().unwrap());
    }
}
