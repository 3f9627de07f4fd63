//! Holding pen for blocks whose parent is not yet linked.
//!
//! Keyed by block hash with a reverse index by parent hash, so that when a
//! parent finally links, its waiting children come out in one lookup.

use std::collections::HashMap;

use lode_core::types::{Block, Hash256};

#[derive(Default)]
pub struct Orphanage {
    blocks: HashMap<Hash256, Block>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
}

impl Orphanage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a block until its parent links. Re-inserting a known orphan is
    /// a no-op; parentless blocks are never orphans and are ignored.
    pub fn insert(&mut self, block: Block) {
        let Some(parent) = block.parent() else {
            return;
        };
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return;
        }
        self.by_parent.entry(parent).or_default().push(hash);
        self.blocks.insert(hash, block);
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// Remove and return every orphan waiting on `parent`.
    pub fn take_children(&mut self, parent: &Hash256) -> Vec<Block> {
        let Some(hashes) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        hashes
            .into_iter()
            .filter_map(|h| self.blocks.remove(&h))
            .collect()
    }

    /// Drop a single orphan, unhooking it from the parent index.
    pub fn remove(&mut self, hash: &Hash256) -> Option<Block> {
        let block = self.blocks.remove(hash)?;
        if let Some(parent) = block.parent() {
            if let Some(siblings) = self.by_parent.get_mut(&parent) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.by_parent.remove(&parent);
                }
            }
        }
        Some(block)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::constants::MIN_WORK_TARGET;
    use lode_core::types::PubKey;

    fn child_of(parent: Hash256, nonce: u64) -> Block {
        Block {
            links: vec![parent],
            work_target: MIN_WORK_TARGET * 2,
            total_work: 0,
            timestamp: 0,
            nonce,
            coinbase: PubKey([1; 32]),
            tx: None,
            state_hash: Hash256::ZERO,
        }
    }

    #[test]
    fn take_children_drains_siblings() {
        let parent = Hash256([9; 32]);
        let mut orphans = Orphanage::new();
        orphans.insert(child_of(parent, 1));
        orphans.insert(child_of(parent, 2));
        orphans.insert(child_of(Hash256([8; 32]), 3));
        assert_eq!(orphans.len(), 3);

        let children = orphans.take_children(&parent);
        assert_eq!(children.len(), 2);
        assert_eq!(orphans.len(), 1);
        assert!(orphans.take_children(&parent).is_empty());
    }

    #[test]
    fn insert_is_idempotent() {
        let parent = Hash256([9; 32]);
        let block = child_of(parent, 1);
        let mut orphans = Orphanage::new();
        orphans.insert(block.clone());
        orphans.insert(block.clone());
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans.take_children(&parent).len(), 1);
    }

    #[test]
    fn parentless_blocks_are_ignored() {
        let mut orphans = Orphanage::new();
        let mut block = child_of(Hash256::ZERO, 1);
        block.links.clear();
        orphans.insert(block);
        assert!(orphans.is_empty());
    }

    #[test]
    fn remove_unhooks_parent_index() {
        let parent = Hash256([9; 32]);
        let block = child_of(parent, 1);
        let hash = block.hash();
        let mut orphans = Orphanage::new();
        orphans.insert(block);
        assert!(orphans.contains(&hash));
        assert!(orphans.remove(&hash).is_some());
        assert!(orphans.remove(&hash).is_none());
        assert!(orphans.take_children(&parent).is_empty());
    }
}
