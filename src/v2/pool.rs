//! Threshold message pools for votes and timeouts.
//!
//! Each pool groups signed messages by pool key, deduplicates by recovered
//! signer, and reports the threshold crossing exactly once per key. Stale
//! keys are pruned by round-based hygiene.

use super::Round;
use alloy_primitives::Address;
use std::collections::{BTreeMap, HashMap};

/// Rounds a pool key survives behind the current round before hygiene prunes it
pub const POOL_HYGIENE_ROUNDS: u64 = 10;

/// A message that can live in a threshold pool
pub trait PoolMessage: Clone {
    /// Grouping key; messages with equal keys count toward the same threshold
    fn key(&self) -> String;
    /// Recovered signer used for deduplication
    fn signed_by(&self) -> Option<Address>;
    /// Round the message belongs to, for hygiene
    fn message_round(&self) -> Round;
}

impl PoolMessage for super::Vote {
    fn key(&self) -> String {
        self.pool_key()
    }
    fn signed_by(&self) -> Option<Address> {
        self.signer()
    }
    fn message_round(&self) -> Round {
        self.proposed_block_info.round
    }
}

impl PoolMessage for super::Timeout {
    fn key(&self) -> String {
        self.pool_key()
    }
    fn signed_by(&self) -> Option<Address> {
        self.signer()
    }
    fn message_round(&self) -> Round {
        self.round
    }
}

#[derive(Debug, Clone)]
struct PoolSlot<T> {
    round: Round,
    messages: HashMap<Address, T>,
    /// Set when the threshold notification for this key has been returned
    notified: bool,
}

impl<T> PoolSlot<T> {
    fn new(round: Round) -> Self {
        Self { round, messages: HashMap::new(), notified: false }
    }
}

/// Keyed threshold pool
#[derive(Debug)]
pub struct MessagePool<T: PoolMessage> {
    slots: BTreeMap<String, PoolSlot<T>>,
    threshold: usize,
}

impl<T: PoolMessage> MessagePool<T> {
    /// Create a pool with an initial threshold
    pub fn new(threshold: usize) -> Self {
        Self { slots: BTreeMap::new(), threshold }
    }

    /// Replace the threshold (epoch changes resize the masternode set)
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Current threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Insert a message. Returns the key's message count and, exactly once
    /// per key, the snapshot of pooled messages at the crossing point.
    ///
    /// Messages without a recovered signer, or from a signer already counted
    /// under the key, are ignored.
    pub fn add(&mut self, message: T) -> (usize, Option<Vec<T>>) {
        let Some(signer) = message.signed_by() else {
            return (0, None);
        };
        let key = message.key();
        let slot = self
            .slots
            .entry(key)
            .or_insert_with(|| PoolSlot::new(message.message_round()));

        slot.messages.entry(signer).or_insert(message);
        let count = slot.messages.len();

        if count >= self.threshold && !slot.notified {
            slot.notified = true;
            let snapshot = slot.messages.values().cloned().collect();
            return (count, Some(snapshot));
        }
        (count, None)
    }

    /// Current count of pooled messages sharing `message`'s key
    pub fn size(&self, message: &T) -> usize {
        self.slots.get(&message.key()).map_or(0, |slot| slot.messages.len())
    }

    /// Drop every key older than `current_round` minus the hygiene window.
    ///
    /// Keys at or ahead of the current round are never pruned.
    pub fn hygiene(&mut self, current_round: Round) {
        let cutoff = current_round.saturating_sub(POOL_HYGIENE_ROUNDS);
        self.slots.retain(|_, slot| slot.round >= cutoff);
    }

    /// Remove every message for `key`, regardless of age
    pub fn clear_key(&mut self, key: &str) {
        self.slots.remove(key);
    }

    /// All live pool keys, for diagnostics
    pub fn keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Messages currently pooled under `key`
    pub fn messages_for_key(&self, key: &str) -> Vec<T> {
        self.slots.get(key).map_or_else(Vec::new, |slot| slot.messages.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v2::{BlockInfo, Timeout, Vote};
    use alloy_primitives::B256;

    fn vote(round: Round, hash_byte: u8, signer_byte: u8) -> Vote {
        let mut v = Vote::new(
            BlockInfo::new(B256::with_last_byte(hash_byte), round, round),
            vec![signer_byte; 65],
            450,
        );
        v.set_signer(Address::with_last_byte(signer_byte));
        v
    }

    fn timeout(round: Round, signer_byte: u8) -> Timeout {
        let mut t = Timeout::new(round, vec![signer_byte; 65], 450);
        t.set_signer(Address::with_last_byte(signer_byte));
        t
    }

    #[test]
    fn test_threshold_crossing_exact_once() {
        let mut pool = MessagePool::new(3);

        assert_eq!(pool.add(vote(5, 1, 1)).1, None);
        assert_eq!(pool.add(vote(5, 1, 2)).1, None);

        let (count, snapshot) = pool.add(vote(5, 1, 3));
        assert_eq!(count, 3);
        let snapshot = snapshot.expect("threshold crossing returns the snapshot");
        assert_eq!(snapshot.len(), 3);

        // Further additions never re-notify for the same key
        let (count, snapshot) = pool.add(vote(5, 1, 4));
        assert_eq!(count, 4);
        assert!(snapshot.is_none());
    }

    #[test]
    fn test_duplicate_signer_not_counted() {
        let mut pool = MessagePool::new(3);

        pool.add(vote(5, 1, 1));
        let (count, snapshot) = pool.add(vote(5, 1, 1));
        assert_eq!(count, 1);
        assert!(snapshot.is_none());
    }

    #[test]
    fn test_unrecovered_signer_ignored() {
        let mut pool = MessagePool::new(1);
        let v = Vote::new(BlockInfo::new(B256::ZERO, 1, 1), vec![0; 65], 450);
        assert_eq!(pool.add(v), (0, None));
    }

    #[test]
    fn test_distinct_keys_tracked_separately() {
        let mut pool = MessagePool::new(2);

        pool.add(vote(5, 1, 1));
        pool.add(vote(5, 2, 1));
        assert_eq!(pool.keys().len(), 2);

        assert!(pool.add(vote(5, 1, 2)).1.is_some());
        assert!(pool.add(vote(5, 2, 2)).1.is_some());
    }

    #[test]
    fn test_size() {
        let mut pool = MessagePool::new(10);
        let probe = vote(7, 3, 1);
        assert_eq!(pool.size(&probe), 0);
        pool.add(vote(7, 3, 1));
        pool.add(vote(7, 3, 2));
        assert_eq!(pool.size(&probe), 2);
    }

    #[test]
    fn test_hygiene_prunes_stale_rounds() {
        let mut pool = MessagePool::new(10);
        pool.add(timeout(1, 1));
        pool.add(timeout(22, 1));
        pool.add(timeout(30, 1));

        // Window of POOL_HYGIENE_ROUNDS behind round 30: cutoff at 20
        pool.hygiene(30);
        let keys = pool.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().any(|k| k.starts_with("22:")));
        assert!(keys.iter().any(|k| k.starts_with("30:")));
    }

    #[test]
    fn test_hygiene_keeps_current_and_future_rounds() {
        let mut pool = MessagePool::new(10);
        pool.add(timeout(50, 1));
        pool.add(timeout(51, 1));

        pool.hygiene(50);
        assert_eq!(pool.keys().len(), 2);
    }

    #[test]
    fn test_threshold_resize() {
        let mut pool = MessagePool::new(5);
        pool.add(vote(5, 1, 1));
        pool.add(vote(5, 1, 2));
        pool.set_threshold(3);
        let (_, snapshot) = pool.add(vote(5, 1, 3));
        assert!(snapshot.is_some());
    }
}
