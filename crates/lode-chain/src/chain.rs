//! The chain state machine.
//!
//! [`Chain`] owns the head, the account state, the orphanage, and the
//! persistent indices. All ingestion goes through [`Chain::add_blocks`],
//! which is transactional: if any block in a batch is invalid, every
//! mutation the batch made so far — account state, block index, height
//! indexes, primary chain, head — is rolled back via an operation journal,
//! and the error is returned. A batch either lands whole or not at all.
//!
//! Fork choice is strictly-greater cumulative work; ties keep the
//! incumbent head, which every node must reproduce to stay in consensus.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, error, info, warn};

use lode_core::error::{BlockError, ChainError, StateError};
use lode_core::genesis;
use lode_core::state::{State, StateCheckpoint};
use lode_core::types::{Block, Hash256, PubKey};

use crate::orphanage::Orphanage;
use crate::store::ChainStore;

/// Per-block ingestion result. Hard failures (bad proof-of-work, bad state
/// transition) are errors, not variants: they abort the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// The block is now part of the linked graph.
    Linked(Hash256),
    /// Idempotent re-submission of a linked block.
    AlreadyKnown,
    /// Parent unknown; the block should be parked in the orphanage.
    Orphaned(Block),
}

/// What a successful [`Chain::add_blocks`] call accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Hashes that became linked in this batch, in linking order.
    pub linked: Vec<Hash256>,
    /// Parent hashes that must be fetched before parked orphans can link.
    pub missing: Vec<Hash256>,
    /// New head hash, if the batch moved the head.
    pub new_head: Option<Hash256>,
}

/// Journal of reversible mutations made by one `add_blocks` batch.
///
/// Ops are undone in reverse order on batch failure; each undo restores
/// exactly the situation immediately before its op ran.
#[derive(Default)]
struct Journal {
    ops: Vec<JournalOp>,
    /// Accounts whose balance changed; persisted on commit.
    touched: HashSet<PubKey>,
}

enum JournalOp {
    /// Block entered the index, the height index, and the linked set.
    BlockLinked(Hash256),
    /// Primary chain grew by one; `prev_at_height` is whatever hash the
    /// height-to-hash index held for that slot before.
    PrimaryPushed { prev_at_height: Option<Hash256> },
    /// Primary chain shrank by one; the popped hash.
    PrimaryPopped(Hash256),
    /// Head moved; the previous head block.
    HeadChanged(Block),
    /// An orphan was pulled out for reattachment.
    OrphanTaken(Block),
}

pub struct Chain<S: ChainStore> {
    store: S,
    head: Block,
    state: State,
    orphans: Orphanage,
    /// Hashes of blocks fully linked into the graph (orphans excluded).
    current_node_hashes: HashSet<Hash256>,
    /// Root-to-head hashes, index = height. Mirrors the store's
    /// height-to-hash index.
    primary_chain: Vec<Hash256>,
}

impl<S: ChainStore> Chain<S> {
    /// Open a chain over the given store, installing the root block on
    /// first use and reloading indices otherwise.
    pub fn new(store: S) -> Result<Self, ChainError> {
        let mut chain = Self {
            store,
            head: genesis::root_block().clone(),
            state: State::new(),
            orphans: Orphanage::new(),
            current_node_hashes: HashSet::new(),
            primary_chain: Vec::new(),
        };
        if chain.store.initialized()? {
            chain.load()?;
        } else {
            chain.bootstrap()?;
        }
        Ok(chain)
    }

    /// One-time installation of the root block.
    fn bootstrap(&mut self) -> Result<(), ChainError> {
        let root = genesis::root_block().clone();
        let hash = root.hash();
        self.state.credit(root.coinbase, root.coins_generated()?)?;
        self.store.put_block(&root)?;
        self.store.set_block_height(&hash, 0)?;
        self.store.set_hash_at_height(0, &hash)?;
        self.store.set_balance(&PubKey::ZERO, 0)?;
        self.store
            .set_balance(&root.coinbase, self.state.get(&root.coinbase))?;
        self.store.set_head(&hash)?;
        self.store.set_initialized()?;
        self.current_node_hashes.insert(hash);
        self.primary_chain.push(hash);
        self.head = root;
        info!(root = %hash, "installed root block");
        Ok(())
    }

    /// Rebuild in-memory indices from an initialized store.
    fn load(&mut self) -> Result<(), ChainError> {
        let head_hash = self
            .store
            .head()?
            .ok_or_else(|| ChainError::Store("initialized store has no head pointer".into()))?;
        self.head = self.require_block(&head_hash)?;
        self.state = State::from_entries(self.store.balances()?);
        self.current_node_hashes = self.store.block_hashes()?.into_iter().collect();

        let head_height = self.require_height(&head_hash)?;
        let mut primary = Vec::with_capacity(head_height as usize + 1);
        for height in 0..=head_height {
            let hash = self.store.hash_at_height(height)?.ok_or_else(|| {
                ChainError::Store(format!("primary chain gap at height {height}"))
            })?;
            primary.push(hash);
        }
        self.primary_chain = primary;
        info!(head = %head_hash, height = head_height, "loaded chain");
        Ok(())
    }

    /// Dismantle the chain, handing back the store. Used to reopen a
    /// chain over the same storage.
    pub fn into_store(self) -> S {
        self.store
    }

    // --- queries ---

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn head_height(&self) -> u64 {
        (self.primary_chain.len() - 1) as u64
    }

    pub fn state_hash(&self) -> Hash256 {
        self.state.state_hash()
    }

    pub fn balance(&self, key: &PubKey) -> u64 {
        self.state.get(key)
    }

    /// True if the hash is linked or parked as an orphan.
    pub fn has_block(&self, hash: &Hash256) -> bool {
        self.current_node_hashes.contains(hash) || self.orphans.contains(hash)
    }

    /// True only for fully linked blocks.
    pub fn is_linked(&self, hash: &Hash256) -> bool {
        self.current_node_hashes.contains(hash)
    }

    /// Fetch a linked block; `NotFound` if absent from the index.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block, ChainError> {
        self.store
            .get_block(hash)?
            .ok_or_else(|| ChainError::NotFound(hash.to_string()))
    }

    /// Hashes of every linked block, for inventory exchange.
    pub fn linked_hashes(&self) -> Vec<Hash256> {
        self.current_node_hashes.iter().copied().collect()
    }

    pub fn hash_at_height(&self, height: u64) -> Option<Hash256> {
        self.primary_chain.get(height as usize).copied()
    }

    fn require_block(&self, hash: &Hash256) -> Result<Block, ChainError> {
        self.store
            .get_block(hash)?
            .ok_or_else(|| ChainError::NotFound(hash.to_string()))
    }

    fn require_height(&self, hash: &Hash256) -> Result<u64, ChainError> {
        self.store
            .block_height(hash)?
            .ok_or_else(|| ChainError::NotFound(hash.to_string()))
    }

    // --- ingestion ---

    /// Ingest a batch of blocks, in any order.
    ///
    /// Blocks whose parent is unknown are parked in the orphanage and their
    /// missing parents reported in the outcome for the seeker. A hard
    /// failure anywhere in the batch rolls back every mutation the batch
    /// made and returns the error.
    pub fn add_blocks(&mut self, mut blocks: Vec<Block>) -> Result<AddOutcome, ChainError> {
        // Ancestors tend to carry less work than descendants, so this
        // ordering resolves most intra-batch parent links without a trip
        // through the orphanage.
        blocks.sort_by_key(|b| b.total_work);

        let checkpoint = self.state.checkpoint();
        let head_before = self.head.hash();
        let mut journal = Journal::default();

        match self.ingest_batch(blocks, &mut journal) {
            Ok(mut outcome) => {
                for key in &journal.touched {
                    self.store.set_balance(key, self.state.get(key))?;
                }
                let head_now = self.head.hash();
                if head_now != head_before {
                    self.store.set_head(&head_now)?;
                    outcome.new_head = Some(head_now);
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(%err, "batch rejected, rolling back");
                if let Err(undo_err) = self.rollback(journal, checkpoint) {
                    error!(%undo_err, "rollback failed, store may be inconsistent");
                }
                Err(err)
            }
        }
    }

    fn ingest_batch(
        &mut self,
        blocks: Vec<Block>,
        journal: &mut Journal,
    ) -> Result<AddOutcome, ChainError> {
        let mut outcome = AddOutcome::default();
        let mut queue: VecDeque<Block> = blocks.into();
        let mut wanted: Vec<Hash256> = Vec::new();

        while let Some(block) = queue.pop_front() {
            match self.add_one(block, journal)? {
                Ingest::Linked(hash) => {
                    outcome.linked.push(hash);
                    // Reattach anything that was waiting on this block.
                    // An orphan parked earlier in this very batch comes
                    // back through here once its parent links.
                    for child in self.orphans.take_children(&hash) {
                        journal.ops.push(JournalOp::OrphanTaken(child.clone()));
                        queue.push_back(child);
                    }
                }
                Ingest::AlreadyKnown => {}
                Ingest::Orphaned(block) => {
                    // Orphaned is only produced for blocks with a parent.
                    let parent = block.parent().unwrap_or(Hash256::ZERO);
                    debug!(block = %block.hash(), %parent, "parking orphan");
                    if !wanted.contains(&parent) {
                        wanted.push(parent);
                    }
                    self.orphans.insert(block);
                }
            }
        }

        // Report only parents still unknown after the whole batch settled;
        // a parent that is itself parked is already being sought.
        outcome.missing = wanted
            .into_iter()
            .filter(|parent| !self.has_block(parent))
            .collect();
        Ok(outcome)
    }

    fn add_one(&mut self, block: Block, journal: &mut Journal) -> Result<Ingest, ChainError> {
        let hash = block.hash();
        if self.current_node_hashes.contains(&hash) {
            return Ok(Ingest::AlreadyKnown);
        }
        // The canonical root is always linked, so any parentless block
        // reaching this point is an impostor.
        let Some(parent_hash) = block.parent() else {
            return Err(BlockError::UnexpectedRoot.into());
        };
        block.check()?;
        if !block.acceptable_work() {
            return Err(BlockError::InvalidPoW.into());
        }
        if !self.current_node_hashes.contains(&parent_hash) {
            return Ok(Ingest::Orphaned(block));
        }

        let parent = self.require_block(&parent_hash)?;
        let expected = parent.total_work + u128::from(block.work_target);
        if block.total_work != expected {
            return Err(BlockError::WrongTotalWork {
                got: block.total_work,
                expected,
            }
            .into());
        }

        let height = self.require_height(&parent_hash)? + 1;
        self.store.put_block(&block)?;
        self.store.set_block_height(&hash, height)?;
        self.current_node_hashes.insert(hash);
        journal.ops.push(JournalOp::BlockLinked(hash));
        debug!(block = %hash, height, total_work = block.total_work, "linked block");

        if self.better_than_head(&block) {
            self.reorganize_to(&block, journal)?;
        }
        Ok(Ingest::Linked(hash))
    }

    /// Strictly greater cumulative work wins; ties keep the incumbent.
    pub fn better_than_head(&self, block: &Block) -> bool {
        block.total_work > self.head.total_work
    }

    // --- reorganization ---

    fn reorganize_to(&mut self, new_head: &Block, journal: &mut Journal) -> Result<(), ChainError> {
        let old_head = self.head.clone();
        let pivot = self.find_pivot(&old_head, new_head)?;
        let unapply_path = self.order_from(&pivot, &old_head)?;
        let apply_path = self.order_from(&pivot, new_head)?;
        info!(
            old_head = %old_head.hash(),
            new_head = %new_head.hash(),
            pivot = %pivot.hash(),
            unapplied = unapply_path.len(),
            applied = apply_path.len(),
            "reorganizing",
        );

        for block in unapply_path.iter().rev() {
            self.unapply_to_state(block, journal)?;
            self.primary_pop(journal)?;
        }
        for block in &apply_path {
            self.apply_to_state(block, journal)?;
            self.primary_push(block.hash(), journal)?;
        }

        let prev = std::mem::replace(&mut self.head, new_head.clone());
        journal.ops.push(JournalOp::HeadChanged(prev));
        Ok(())
    }

    /// Lowest common ancestor of two tips.
    ///
    /// Walks both backward one step at a time, always stepping the side
    /// with greater-or-equal total work (ties step the first argument).
    /// Relies on total work strictly increasing along parent-child edges.
    pub fn find_pivot(&self, a: &Block, b: &Block) -> Result<Block, ChainError> {
        let mut a = a.clone();
        let mut b = b.clone();
        while a.hash() != b.hash() {
            if a.total_work >= b.total_work {
                a = self.step_to_parent(a)?;
            } else {
                b = self.step_to_parent(b)?;
            }
        }
        Ok(a)
    }

    fn step_to_parent(&self, block: Block) -> Result<Block, ChainError> {
        let parent = block.parent().ok_or_else(|| ChainError::InconsistentGraph {
            early: block.hash().to_string(),
        })?;
        self.require_block(&parent)
    }

    /// Blocks from `early` (exclusive) to `late` (inclusive), in
    /// root-to-tip order. `InconsistentGraph` if a rootward walk from
    /// `late` never meets `early`.
    pub fn order_from(&self, early: &Block, late: &Block) -> Result<Vec<Block>, ChainError> {
        let early_hash = early.hash();
        let mut path = Vec::new();
        let mut cursor = late.clone();
        while cursor.hash() != early_hash {
            let parent_hash = cursor.parent().ok_or_else(|| ChainError::InconsistentGraph {
                early: early_hash.to_string(),
            })?;
            let parent = self.require_block(&parent_hash)?;
            path.push(cursor);
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    // --- state transitions ---

    /// The three balance moves one block makes: tx recipient credited, tx
    /// sender debited, coinbase credited with the issuance.
    fn mutate_for(&mut self, block: &Block) -> Result<(), ChainError> {
        if let Some(tx) = &block.tx {
            self.state.credit(tx.recipient, tx.value)?;
            self.state.debit(tx.sender(), tx.value)?;
        }
        self.state.credit(block.coinbase, block.coins_generated()?)?;
        Ok(())
    }

    /// State hash the account state would commit to after this block's
    /// balance moves, computed speculatively and restored before
    /// returning. The miner uses this to fill a candidate's commitment
    /// before searching nonces.
    pub fn state_hash_after(&mut self, block: &Block) -> Result<Hash256, ChainError> {
        let checkpoint = self.state.checkpoint();
        let result = self.mutate_for(block).map(|()| self.state.state_hash());
        self.state.restore(checkpoint);
        result
    }

    /// Check a block's state transition against the current state:
    /// sender must cover the transfer, and the state hash after the
    /// block's balance moves must equal the block's claimed commitment.
    fn valid_for_state(&mut self, block: &Block) -> Result<(), ChainError> {
        if let Some(tx) = &block.tx {
            let have = self.state.get(&tx.sender());
            if have < tx.value {
                return Err(StateError::InsufficientBalance {
                    have,
                    need: tx.value,
                }
                .into());
            }
        }
        let computed = self.state_hash_after(block)?;
        if computed != block.state_hash {
            return Err(StateError::StateHashMismatch {
                claimed: block.state_hash.to_string(),
                computed: computed.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn apply_to_state(&mut self, block: &Block, journal: &mut Journal) -> Result<(), ChainError> {
        self.valid_for_state(block)?;
        self.mutate_for(block)?;
        self.record_touched(block, journal);
        Ok(())
    }

    /// Exact inverse of [`apply_to_state`](Self::apply_to_state), in
    /// reverse move order. Trusts that the block was validly applied, so
    /// no re-validation.
    fn unapply_to_state(&mut self, block: &Block, journal: &mut Journal) -> Result<(), ChainError> {
        self.state.debit(block.coinbase, block.coins_generated()?)?;
        if let Some(tx) = &block.tx {
            self.state.credit(tx.sender(), tx.value)?;
            self.state.debit(tx.recipient, tx.value)?;
        }
        self.record_touched(block, journal);
        Ok(())
    }

    fn record_touched(&self, block: &Block, journal: &mut Journal) {
        journal.touched.insert(block.coinbase);
        if let Some(tx) = &block.tx {
            journal.touched.insert(tx.recipient);
            journal.touched.insert(tx.sender());
        }
    }

    // --- primary chain maintenance ---

    fn primary_push(&mut self, hash: Hash256, journal: &mut Journal) -> Result<(), ChainError> {
        let height = self.primary_chain.len() as u64;
        let prev_at_height = self.store.hash_at_height(height)?;
        self.store.set_hash_at_height(height, &hash)?;
        self.primary_chain.push(hash);
        journal.ops.push(JournalOp::PrimaryPushed { prev_at_height });
        Ok(())
    }

    fn primary_pop(&mut self, journal: &mut Journal) -> Result<(), ChainError> {
        let hash = self
            .primary_chain
            .pop()
            .ok_or_else(|| ChainError::Store("primary chain underflow".into()))?;
        let height = self.primary_chain.len() as u64;
        self.store.delete_hash_at_height(height)?;
        journal.ops.push(JournalOp::PrimaryPopped(hash));
        Ok(())
    }

    // --- rollback ---

    fn rollback(
        &mut self,
        journal: Journal,
        checkpoint: StateCheckpoint,
    ) -> Result<(), ChainError> {
        for op in journal.ops.into_iter().rev() {
            match op {
                JournalOp::BlockLinked(hash) => {
                    self.current_node_hashes.remove(&hash);
                    self.store.delete_block_height(&hash)?;
                    self.store.delete_block(&hash)?;
                }
                JournalOp::PrimaryPushed { prev_at_height } => {
                    self.primary_chain
                        .pop()
                        .ok_or_else(|| ChainError::Store("journal desync".into()))?;
                    let height = self.primary_chain.len() as u64;
                    match prev_at_height {
                        Some(prev) => self.store.set_hash_at_height(height, &prev)?,
                        None => self.store.delete_hash_at_height(height)?,
                    }
                }
                JournalOp::PrimaryPopped(hash) => {
                    let height = self.primary_chain.len() as u64;
                    self.store.set_hash_at_height(height, &hash)?;
                    self.primary_chain.push(hash);
                }
                JournalOp::HeadChanged(prev) => {
                    self.head = prev;
                }
                JournalOp::OrphanTaken(block) => {
                    self.orphans.insert(block);
                }
            }
        }
        self.state.restore(checkpoint);
        Ok(())
    }

    // --- sync support ---

    /// Exponentially sparse hashes along the primary chain, newest first:
    /// offsets 0, 1, 2, 4, 8, ... back from the head, always ending at
    /// the root.
    pub fn make_block_locator(&self) -> Vec<Hash256> {
        let head_height = self.head_height();
        let mut locator = Vec::new();
        for offset in locator_offsets(head_height) {
            locator.push(self.primary_chain[(head_height - offset) as usize]);
        }
        locator
    }

    /// Serve one chunk of the primary chain past the most recent locator
    /// hash we share with the peer. Returns hashes with their cumulative
    /// work so the peer can seek them ancestors-first.
    pub fn primary_segment(
        &self,
        locator: &[Hash256],
        chunk_size: u64,
        chunk_n: u64,
    ) -> Result<(Vec<Hash256>, Vec<u128>), ChainError> {
        // Locator is newest-first; the first hash sitting on our primary
        // chain is the most recent common point. Root is always shared.
        let mut shared_height = 0u64;
        for hash in locator {
            if let Some(height) = self.store.block_height(hash)? {
                if self.primary_chain.get(height as usize) == Some(hash) {
                    shared_height = height;
                    break;
                }
            }
        }

        let from = shared_height
            .saturating_add(1)
            .saturating_add(chunk_n.saturating_mul(chunk_size));
        let to = from
            .saturating_add(chunk_size)
            .min(self.primary_chain.len() as u64);

        let mut hashes = Vec::new();
        let mut total_works = Vec::new();
        for height in from..to {
            let hash = self.primary_chain[height as usize];
            let block = self.require_block(&hash)?;
            hashes.push(hash);
            total_works.push(block.total_work);
        }
        Ok((hashes, total_works))
    }
}

/// Height offsets sampled by the block locator: 0, 1, 2, 4, 8, ...
/// capped at `head_height`, with the root's offset always last.
fn locator_offsets(head_height: u64) -> Vec<u64> {
    let mut offsets = vec![0];
    let mut offset = 1u64;
    while offset <= head_height {
        offsets.push(offset);
        offset = offset.saturating_mul(2);
    }
    if *offsets.last().unwrap_or(&0) != head_height {
        offsets.push(head_height);
    }
    offsets
}
