//! Fork choice: QC-anchored tip selection.
//!
//! The preferred tip is the candidate descending from the highest committed
//! block whose best known certificate has the maximum round. Before any
//! certificate exists the longest-difficulty branch wins, which is also the
//! v1 rule.

use crate::{primitives::Header, traits::ChainReader, v2::Round};
use alloy_primitives::{B256, U256};
use std::collections::HashMap;

/// How many ancestors to walk when scoring or checking descent
const MAX_WALK: u64 = 2048;

/// Tracks the best certificate round seen per block hash
#[derive(Debug, Default)]
pub struct ForkChoice {
    qc_rounds: HashMap<B256, Round>,
}

impl ForkChoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `hash` is certified at `round`
    pub fn record_qc(&mut self, hash: B256, round: Round) {
        let entry = self.qc_rounds.entry(hash).or_insert(round);
        if round > *entry {
            *entry = round;
        }
    }

    /// Best certificate round known for `hash`
    pub fn qc_round(&self, hash: &B256) -> Option<Round> {
        self.qc_rounds.get(hash).copied()
    }

    /// Highest certificate round on the ancestry of `tip`, walking the header
    /// chain down to (and excluding) `floor`.
    fn branch_score(&self, chain: &dyn ChainReader, tip: &Header, floor: Option<u64>) -> Option<Round> {
        let floor = floor.unwrap_or(0);
        let mut cursor = tip.clone();
        for _ in 0..MAX_WALK {
            let hash = cursor.hash_slow();
            if let Some(round) = self.qc_round(&hash) {
                return Some(round);
            }
            if cursor.number <= floor {
                return None;
            }
            cursor = chain.get_header_by_hash(cursor.parent_hash)?;
        }
        None
    }

    /// Whether `tip` descends from the block `ancestor_hash` at `ancestor_number`
    fn descends_from(
        chain: &dyn ChainReader,
        tip: &Header,
        ancestor_hash: &B256,
        ancestor_number: u64,
    ) -> bool {
        if tip.number < ancestor_number {
            return false;
        }
        let mut cursor = tip.clone();
        for _ in 0..MAX_WALK {
            if cursor.number == ancestor_number {
                return cursor.hash_slow() == *ancestor_hash;
            }
            if cursor.number < ancestor_number {
                return false;
            }
            match chain.get_header_by_hash(cursor.parent_hash) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
        false
    }

    /// Accumulated difficulty of the branch ending in `tip`, bounded by the walk cap
    fn branch_difficulty(chain: &dyn ChainReader, tip: &Header) -> U256 {
        let mut total = tip.difficulty;
        let mut cursor = tip.clone();
        for _ in 0..MAX_WALK {
            if cursor.number == 0 {
                break;
            }
            match chain.get_header_by_hash(cursor.parent_hash) {
                Some(parent) => {
                    total += parent.difficulty;
                    cursor = parent;
                }
                None => break,
            }
        }
        total
    }

    /// Pick the preferred tip among `candidates`.
    ///
    /// Candidates not descending from `(commit_hash, commit_number)` are
    /// discarded. Among the rest the highest ancestral QC round wins; with no
    /// QC knowledge at all, total difficulty decides.
    pub fn select_tip(
        &self,
        chain: &dyn ChainReader,
        commit: Option<(B256, u64)>,
        candidates: &[Header],
    ) -> Option<Header> {
        let eligible: Vec<&Header> = candidates
            .iter()
            .filter(|tip| match commit {
                Some((hash, number)) => Self::descends_from(chain, tip, &hash, number),
                None => true,
            })
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let commit_number = commit.map(|(_, n)| n);
        let best_by_qc = eligible
            .iter()
            .filter_map(|tip| {
                self.branch_score(chain, tip, commit_number).map(|round| (round, *tip))
            })
            .max_by_key(|(round, tip)| (*round, tip.number));
        if let Some((_, tip)) = best_by_qc {
            return Some(tip.clone());
        }

        eligible
            .into_iter()
            .max_by_key(|tip| (Self::branch_difficulty(chain, tip), tip.number))
            .cloned()
    }
}
