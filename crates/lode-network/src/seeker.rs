//! Block seeker: tracks hashes we want but do not have.
//!
//! A pure state machine in the same mold as the chain: callers feed it
//! events (hashes to seek, periodic follow-up ticks) and it emits
//! [`SeekAction`]s for the driving loop to execute. Time is passed in as
//! plain seconds so the machine stays deterministic under test.
//!
//! Each tracked hash carries a priority key — the remote chain's cumulative
//! work when known — so re-requests go out ancestors-first and downloaded
//! branches link instead of piling up in the orphanage.

use std::collections::HashMap;

use tracing::{debug, warn};

use lode_core::constants::{MAX_BLOCK_REQUEST, MAX_REREQUESTS_PER_CYCLE, MAX_SEEK_RETRIES, SEEK_FOLLOW_UP_SECS};
use lode_core::types::Hash256;

/// What the driving loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekAction {
    /// Fetch these blocks from a peer; never longer than the protocol's
    /// block-request cap.
    RequestBlocks(Vec<Hash256>),
}

#[derive(Debug, Clone)]
struct Tracked {
    /// Earliest time (seconds) a follow-up may re-request this hash.
    deadline: u64,
    retries: u32,
    /// Remote cumulative work when known, zero otherwise. Lower keys are
    /// re-requested first.
    priority: u128,
}

/// Outstanding block-hash requests, deduplicated and retried on a timer.
#[derive(Default)]
pub struct Seeker {
    in_flight: HashMap<Hash256, Tracked>,
}

impl Seeker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_tracking(&self, hash: &Hash256) -> bool {
        self.in_flight.contains_key(hash)
    }

    /// Start seeking hashes with no priority information (e.g. missing
    /// parents reported by the chain). Hashes already in flight are
    /// skipped. Returns the fetches to dispatch now.
    pub fn put(&mut self, hashes: Vec<Hash256>, now: u64) -> Vec<SeekAction> {
        self.track(hashes.into_iter().map(|h| (0, h)), now)
    }

    /// Start seeking hashes along a peer's primary chain, prioritized by
    /// the peer-reported cumulative work so ancestors resolve first.
    pub fn put_with_work(
        &mut self,
        pairs: Vec<(u128, Hash256)>,
        now: u64,
    ) -> Vec<SeekAction> {
        self.track(pairs.into_iter(), now)
    }

    fn track(
        &mut self,
        pairs: impl Iterator<Item = (u128, Hash256)>,
        now: u64,
    ) -> Vec<SeekAction> {
        let mut fresh: Vec<(u128, Hash256)> = pairs
            .filter(|(_, hash)| !self.in_flight.contains_key(hash))
            .collect();
        if fresh.is_empty() {
            return Vec::new();
        }
        fresh.sort_by_key(|(priority, _)| *priority);

        for (priority, hash) in &fresh {
            self.in_flight.insert(
                *hash,
                Tracked {
                    deadline: now + SEEK_FOLLOW_UP_SECS,
                    retries: 0,
                    priority: *priority,
                },
            );
        }
        debug!(count = fresh.len(), tracking = self.in_flight.len(), "seeking blocks");
        chunk_requests(fresh.into_iter().map(|(_, h)| h).collect())
    }

    /// Periodic retry sweep.
    ///
    /// Hashes the chain has meanwhile learned are dropped. Hashes past
    /// their deadline are re-requested, lowest priority key first, at most
    /// [`MAX_REREQUESTS_PER_CYCLE`] per sweep; anything retried past
    /// [`MAX_SEEK_RETRIES`] is abandoned.
    pub fn follow_up<F>(&mut self, now: u64, chain_has: F) -> Vec<SeekAction>
    where
        F: Fn(&Hash256) -> bool,
    {
        self.in_flight.retain(|hash, _| !chain_has(hash));

        let mut due: Vec<(u128, Hash256)> = self
            .in_flight
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(hash, t)| (t.priority, *hash))
            .collect();
        due.sort_by_key(|(priority, _)| *priority);
        due.truncate(MAX_REREQUESTS_PER_CYCLE);

        let mut retry = Vec::new();
        for (_, hash) in due {
            let Some(tracked) = self.in_flight.get_mut(&hash) else {
                continue;
            };
            tracked.retries += 1;
            if tracked.retries > MAX_SEEK_RETRIES {
                warn!(%hash, retries = tracked.retries, "abandoning unreachable block");
                self.in_flight.remove(&hash);
                continue;
            }
            tracked.deadline = now + SEEK_FOLLOW_UP_SECS;
            retry.push(hash);
        }
        chunk_requests(retry)
    }
}

/// Split hashes into request batches no larger than the wire cap.
fn chunk_requests(hashes: Vec<Hash256>) -> Vec<SeekAction> {
    hashes
        .chunks(MAX_BLOCK_REQUEST)
        .map(|chunk| SeekAction::RequestBlocks(chunk.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> Hash256 {
        Hash256([n; 32])
    }

    fn requested(actions: &[SeekAction]) -> Vec<Hash256> {
        actions
            .iter()
            .flat_map(|SeekAction::RequestBlocks(h)| h.clone())
            .collect()
    }

    #[test]
    fn put_dispatches_and_tracks() {
        let mut seeker = Seeker::new();
        let actions = seeker.put(vec![hash(1), hash(2)], 100);
        assert_eq!(requested(&actions), vec![hash(1), hash(2)]);
        assert!(seeker.is_tracking(&hash(1)));
        assert_eq!(seeker.len(), 2);
    }

    #[test]
    fn duplicate_put_is_silent() {
        let mut seeker = Seeker::new();
        seeker.put(vec![hash(1)], 100);
        let actions = seeker.put(vec![hash(1)], 101);
        assert!(actions.is_empty());
        assert_eq!(seeker.len(), 1);
    }

    #[test]
    fn put_with_work_requests_ancestors_first() {
        let mut seeker = Seeker::new();
        let actions = seeker.put_with_work(
            vec![(300, hash(3)), (100, hash(1)), (200, hash(2))],
            0,
        );
        assert_eq!(requested(&actions), vec![hash(1), hash(2), hash(3)]);
    }

    #[test]
    fn large_put_is_chunked_to_wire_cap() {
        let mut seeker = Seeker::new();
        let hashes: Vec<Hash256> = (0..130u8).map(hash).collect();
        let actions = seeker.put(hashes, 0);
        assert_eq!(actions.len(), 3);
        let SeekAction::RequestBlocks(first) = &actions[0];
        assert_eq!(first.len(), MAX_BLOCK_REQUEST);
        let SeekAction::RequestBlocks(last) = &actions[2];
        assert_eq!(last.len(), 130 - 2 * MAX_BLOCK_REQUEST);
    }

    #[test]
    fn follow_up_drops_resolved_hashes() {
        let mut seeker = Seeker::new();
        seeker.put(vec![hash(1), hash(2)], 0);
        let actions = seeker.follow_up(100, |h| *h == hash(1));
        assert!(!seeker.is_tracking(&hash(1)));
        assert_eq!(requested(&actions), vec![hash(2)]);
    }

    #[test]
    fn follow_up_waits_out_the_delay() {
        let mut seeker = Seeker::new();
        seeker.put(vec![hash(1)], 100);
        // Not yet due.
        assert!(seeker.follow_up(101, |_| false).is_empty());
        // Due at put-time + delay.
        let actions = seeker.follow_up(100 + SEEK_FOLLOW_UP_SECS, |_| false);
        assert_eq!(requested(&actions), vec![hash(1)]);
        // Deadline pushed out again.
        assert!(seeker.follow_up(100 + SEEK_FOLLOW_UP_SECS + 1, |_| false).is_empty());
    }

    #[test]
    fn follow_up_caps_rerequests_per_cycle() {
        let mut seeker = Seeker::new();
        let hashes: Vec<Hash256> = (0..80u8).map(hash).collect();
        seeker.put(hashes, 0);
        let actions = seeker.follow_up(1_000, |_| false);
        assert_eq!(requested(&actions).len(), MAX_REREQUESTS_PER_CYCLE);
    }

    #[test]
    fn rerequests_follow_priority_order() {
        let mut seeker = Seeker::new();
        seeker.put_with_work(vec![(900, hash(9)), (100, hash(1))], 0);
        let actions = seeker.follow_up(1_000, |_| false);
        assert_eq!(requested(&actions), vec![hash(1), hash(9)]);
    }

    #[test]
    fn unreachable_hash_is_abandoned() {
        let mut seeker = Seeker::new();
        seeker.put(vec![hash(1)], 0);
        let mut now = 0;
        for _ in 0..MAX_SEEK_RETRIES {
            now += SEEK_FOLLOW_UP_SECS;
            let actions = seeker.follow_up(now, |_| false);
            assert_eq!(requested(&actions), vec![hash(1)]);
        }
        // One past the limit: dropped, nothing dispatched.
        now += SEEK_FOLLOW_UP_SECS;
        assert!(seeker.follow_up(now, |_| false).is_empty());
        assert!(!seeker.is_tracking(&hash(1)));
    }
}
