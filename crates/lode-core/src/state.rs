//! Account-balance state with atomic backup/restore.
//!
//! The state maps public keys to non-negative balances. Zero balances are
//! removed from the map so the content hash never depends on stale
//! entries; a single bookkeeping entry under the zero key stays put so an
//! otherwise-empty state still hashes to something well defined.
//!
//! The state is mutated only through block application driven by the
//! chain; validation uses [`checkpoint`](State::checkpoint) /
//! [`restore`](State::restore) to apply speculatively.

use std::collections::BTreeMap;

use crate::error::StateError;
use crate::types::{Hash256, PubKey};

/// Opaque snapshot of a [`State`], restorable in O(1) swap.
#[derive(Clone, Debug)]
pub struct StateCheckpoint {
    balances: BTreeMap<PubKey, u64>,
}

/// Mapping from public key to balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    balances: BTreeMap<PubKey, u64>,
}

impl State {
    /// Empty state holding only the bookkeeping entry.
    pub fn new() -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(PubKey::ZERO, 0);
        Self { balances }
    }

    /// Balance of an account; absent accounts hold zero.
    pub fn get(&self, key: &PubKey) -> u64 {
        self.balances.get(key).copied().unwrap_or(0)
    }

    /// Number of stored entries, bookkeeping entry included.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.len() <= 1
    }

    /// Add to an account's balance.
    pub fn credit(&mut self, key: PubKey, amount: u64) -> Result<(), StateError> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balances.entry(key).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow { amount })?;
        Ok(())
    }

    /// Remove from an account's balance. Never goes negative.
    pub fn debit(&mut self, key: PubKey, amount: u64) -> Result<(), StateError> {
        if amount == 0 {
            return Ok(());
        }
        let have = self.get(&key);
        if have < amount {
            return Err(StateError::InsufficientBalance { have, need: amount });
        }
        let remaining = have - amount;
        if remaining == 0 && key != PubKey::ZERO {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, remaining);
        }
        Ok(())
    }

    /// Content hash: BLAKE3 over the sorted `(key, balance)` pairs.
    ///
    /// The map is ordered by key, which makes the hash independent of
    /// mutation order.
    pub fn state_hash(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        for (key, balance) in &self.balances {
            hasher.update(key.as_bytes());
            hasher.update(&balance.to_le_bytes());
        }
        Hash256(hasher.finalize().into())
    }

    /// Snapshot the full state for later [`restore`](Self::restore).
    pub fn checkpoint(&self) -> StateCheckpoint {
        StateCheckpoint {
            balances: self.balances.clone(),
        }
    }

    /// Replace the state with a previously taken snapshot.
    pub fn restore(&mut self, checkpoint: StateCheckpoint) {
        self.balances = checkpoint.balances;
    }

    /// All stored entries, for persistence.
    pub fn iter(&self) -> impl Iterator<Item = (&PubKey, &u64)> {
        self.balances.iter()
    }

    /// Rebuild from persisted entries. The bookkeeping entry is re-added
    /// if the rows lack it.
    pub fn from_entries(entries: impl IntoIterator<Item = (PubKey, u64)>) -> Self {
        let mut state = Self::new();
        for (key, balance) in entries {
            if balance > 0 || key == PubKey::ZERO {
                state.balances.insert(key, balance);
            }
        }
        state
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(seed: u8) -> PubKey {
        PubKey([seed; 32])
    }

    #[test]
    fn new_state_has_bookkeeping_entry() {
        let state = State::new();
        assert_eq!(state.len(), 1);
        assert!(state.is_empty());
        assert_eq!(state.get(&PubKey::ZERO), 0);
    }

    #[test]
    fn empty_state_hash_is_stable() {
        assert_eq!(State::new().state_hash(), State::new().state_hash());
        assert!(!State::new().state_hash().is_zero());
    }

    #[test]
    fn credit_then_get() {
        let mut state = State::new();
        state.credit(key(1), 100).unwrap();
        assert_eq!(state.get(&key(1)), 100);
        assert_eq!(state.get(&key(2)), 0);
    }

    #[test]
    fn debit_below_zero_rejected() {
        let mut state = State::new();
        state.credit(key(1), 5).unwrap();
        let err = state.debit(key(1), 10).unwrap_err();
        assert_eq!(err, StateError::InsufficientBalance { have: 5, need: 10 });
        // balance untouched after the failed debit
        assert_eq!(state.get(&key(1)), 5);
    }

    #[test]
    fn debit_to_zero_removes_entry() {
        let mut state = State::new();
        state.credit(key(1), 7).unwrap();
        state.debit(key(1), 7).unwrap();
        assert_eq!(state.len(), 1); // only bookkeeping remains
        assert_eq!(state.get(&key(1)), 0);
    }

    #[test]
    fn zero_balance_absence_keeps_hash_canonical() {
        let mut a = State::new();
        a.credit(key(1), 7).unwrap();
        a.debit(key(1), 7).unwrap();
        let b = State::new();
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn credit_overflow_rejected() {
        let mut state = State::new();
        state.credit(key(1), u64::MAX).unwrap();
        assert!(matches!(
            state.credit(key(1), 1).unwrap_err(),
            StateError::BalanceOverflow { .. }
        ));
    }

    #[test]
    fn hash_order_independent() {
        let mut a = State::new();
        a.credit(key(1), 10).unwrap();
        a.credit(key(2), 20).unwrap();
        let mut b = State::new();
        b.credit(key(2), 20).unwrap();
        b.credit(key(1), 10).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn different_balances_different_hash() {
        let mut a = State::new();
        a.credit(key(1), 10).unwrap();
        let mut b = State::new();
        b.credit(key(1), 11).unwrap();
        assert_ne!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn checkpoint_restore_roundtrip() {
        let mut state = State::new();
        state.credit(key(1), 100).unwrap();
        let cp = state.checkpoint();
        let hash_before = state.state_hash();

        state.credit(key(2), 50).unwrap();
        state.debit(key(1), 30).unwrap();
        assert_ne!(state.state_hash(), hash_before);

        state.restore(cp);
        assert_eq!(state.state_hash(), hash_before);
        assert_eq!(state.get(&key(1)), 100);
        assert_eq!(state.get(&key(2)), 0);
    }

    #[test]
    fn from_entries_roundtrip() {
        let mut state = State::new();
        state.credit(key(1), 10).unwrap();
        state.credit(key(2), 20).unwrap();
        let rebuilt =
            State::from_entries(state.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>());
        assert_eq!(rebuilt.state_hash(), state.state_hash());
    }

    proptest! {
        #[test]
        fn checkpoint_always_cancels_mutations(
            credits in proptest::collection::vec((0u8..8, 1u64..1_000_000), 0..32),
        ) {
            let mut state = State::new();
            state.credit(key(0xAA), 500).unwrap();
            let cp = state.checkpoint();
            let before = state.state_hash();

            for (seed, amount) in credits {
                state.credit(key(seed), amount).unwrap();
            }

            state.restore(cp);
            prop_assert_eq!(state.state_hash(), before);
        }
    }
}
