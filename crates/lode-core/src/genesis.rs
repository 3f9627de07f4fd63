//! Root block definition.
//!
//! The root is the seeded origin of the chain: its `total_work` is set
//! explicitly rather than derived from a parent, and its proof-of-work is
//! never checked. Every node computes the identical root block.

use std::sync::LazyLock;

use crate::state::State;
use crate::types::{Block, Hash256, PubKey};

/// Work target of the root block.
pub const ROOT_WORK_TARGET: u64 = 16_777_216; // 256^3

/// Seeded cumulative work of the root block.
pub const ROOT_TOTAL_WORK: u128 = 65_536; // 256^2

struct RootData {
    block: Block,
    hash: Hash256,
}

static ROOT: LazyLock<RootData> = LazyLock::new(build_root);

fn build_root() -> RootData {
    let mut block = Block {
        links: Vec::new(),
        work_target: ROOT_WORK_TARGET,
        total_work: ROOT_TOTAL_WORK,
        timestamp: 0,
        nonce: 0,
        coinbase: root_coinbase(),
        tx: None,
        state_hash: Hash256::ZERO,
    };

    // The canonical encoding has fixed length for a tx-less block, so the
    // issuance is independent of the state hash we are about to fill in.
    let issued = block
        .coins_generated()
        .expect("root work target covers the storage fee");
    let mut state = State::new();
    state
        .credit(block.coinbase, issued)
        .expect("fresh state cannot overflow");
    block.state_hash = state.state_hash();

    let hash = block.hash();
    RootData { block, hash }
}

/// The coinbase key of the root block, derived deterministically so every
/// node agrees without shipping key material.
pub fn root_coinbase() -> PubKey {
    PubKey(blake3::hash(b"lode root coinbase").into())
}

/// The root block (height 0).
pub fn root_block() -> &'static Block {
    &ROOT.block
}

/// Hash of the root block.
pub fn root_hash() -> Hash256 {
    ROOT.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_root() {
        assert!(root_block().is_root());
        assert_eq!(root_block().parent(), None);
    }

    #[test]
    fn root_deterministic() {
        assert_eq!(root_hash(), root_block().hash());
        assert_eq!(root_hash(), root_hash());
    }

    #[test]
    fn root_total_work_is_seeded() {
        assert_eq!(root_block().total_work, ROOT_TOTAL_WORK);
        assert_eq!(root_block().work_target, ROOT_WORK_TARGET);
    }

    #[test]
    fn root_state_hash_commits_to_issuance() {
        let issued = root_block().coins_generated().unwrap();
        let mut state = State::new();
        state.credit(root_coinbase(), issued).unwrap();
        assert_eq!(root_block().state_hash, state.state_hash());
    }

    #[test]
    fn root_passes_structural_check() {
        assert!(root_block().check().is_ok());
    }
}
