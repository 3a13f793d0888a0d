//! XDPoS v1 voting snapshot.
//!
//! Snapshots track the authorized signer set and in-flight authorization
//! votes at a block height. They are rebuilt by replaying headers on top of
//! the nearest known ancestor snapshot and persisted at checkpoint offsets.

use crate::{
    cache::Cache,
    config::XDPoSConfig,
    errors::{XDPoSError, XDPoSResult},
    extra_data::{recover_header_signer, V1ExtraData},
    primitives::{Header, NONCE_AUTH_VOTE, NONCE_DROP_VOTE},
    traits::Database,
};
use alloy_primitives::{hex, Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Database key prefix for persisted snapshots
const SNAPSHOT_KEY_PREFIX: &str = "snapshot/";

/// A vote for adding or removing a signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Signer who cast the vote
    pub signer: Address,
    /// Block number when the vote was cast
    pub block: u64,
    /// Address being voted on
    pub address: Address,
    /// True to authorize, false to deauthorize
    pub authorize: bool,
}

/// Vote tally for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Whether this is an authorization vote
    pub authorize: bool,
    /// Number of votes received
    pub votes: usize,
}

/// Snapshot is the state of authorization voting at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Block number of the snapshot
    pub number: u64,
    /// Block hash of the snapshot
    pub hash: B256,
    /// Set of authorized signers
    pub signers: BTreeSet<Address>,
    /// Recent signers for spam protection (block number => signer)
    pub recents: BTreeMap<u64, Address>,
    /// List of votes cast in chronological order
    pub votes: Vec<Vote>,
    /// Vote tally per candidate
    pub tally: BTreeMap<Address, Tally>,
}

impl Snapshot {
    /// Create a new snapshot with the given signers
    pub fn new(number: u64, hash: B256, signers: Vec<Address>) -> Self {
        Self {
            number,
            hash,
            signers: signers.into_iter().collect(),
            recents: BTreeMap::new(),
            votes: Vec::new(),
            tally: BTreeMap::new(),
        }
    }

    /// Materialize the genesis snapshot from the genesis header's extra data
    pub fn from_genesis(genesis: &Header) -> XDPoSResult<Self> {
        let extra = V1ExtraData::parse(&genesis.extra_data, true)?;
        if extra.signers.is_empty() {
            return Err(XDPoSError::InvalidCheckpointSigners);
        }
        Ok(Self::new(0, genesis.hash_slow(), extra.signers))
    }

    /// Check if a signer is authorized
    pub fn is_signer(&self, signer: &Address) -> bool {
        self.signers.contains(signer)
    }

    /// Signers sorted by address
    pub fn get_signers(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// Number of authorized signers
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// Whether a vote about `address` makes sense against the current set
    pub fn valid_vote(&self, address: &Address, authorize: bool) -> bool {
        let is_signer = self.signers.contains(address);
        (is_signer && !authorize) || (!is_signer && authorize)
    }

    /// Tally a vote; returns false if the vote is redundant
    fn cast(&mut self, address: Address, authorize: bool) -> bool {
        if !self.valid_vote(&address, authorize) {
            return false;
        }
        self.tally
            .entry(address)
            .and_modify(|t| t.votes += 1)
            .or_insert(Tally { authorize, votes: 1 });
        true
    }

    /// Remove a previously cast vote from the tally
    fn uncast(&mut self, address: &Address, authorize: bool) -> bool {
        match self.tally.get_mut(address) {
            Some(tally) if tally.authorize == authorize => {
                if tally.votes > 1 {
                    tally.votes -= 1;
                } else {
                    self.tally.remove(address);
                }
                true
            }
            _ => false,
        }
    }

    /// Replay `headers` (ascending, contiguous) on top of this snapshot.
    ///
    /// Consumes self and returns the resulting snapshot. The signer set stays
    /// non-empty and `recents` stays bounded by half the signer count.
    pub fn apply(
        mut self,
        headers: &[Header],
        config: &XDPoSConfig,
        sig_cache: &Cache<B256, Address>,
    ) -> XDPoSResult<Snapshot> {
        if headers.is_empty() {
            return Ok(self);
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(XDPoSError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(XDPoSError::InvalidVotingChain);
        }

        for header in headers {
            let number = header.number;

            // Epoch checkpoints reset all in-flight votes
            if number % config.epoch == 0 {
                self.votes.clear();
                self.tally.clear();
            }
            // Slide the recents window so a signer frees up again
            if let Some(limit) = (self.signers.len() as u64 / 2).checked_add(1) {
                if number >= limit {
                    self.recents.remove(&(number - limit));
                }
            }

            let signer = recover_header_signer(header, sig_cache)?;
            if !self.signers.contains(&signer) {
                return Err(XDPoSError::Unauthorized);
            }
            if self.recents.values().any(|recent| *recent == signer) {
                return Err(XDPoSError::Unauthorized);
            }
            self.recents.insert(number, signer);

            // Header authorized: discard the signer's stale vote, then tally
            // the new one
            let candidate = header.beneficiary;
            if let Some(pos) = self
                .votes
                .iter()
                .position(|v| v.signer == signer && v.address == candidate)
            {
                let old = self.votes.remove(pos);
                self.uncast(&old.address, old.authorize);
            }
            let authorize = if header.nonce == NONCE_AUTH_VOTE {
                true
            } else if header.nonce == NONCE_DROP_VOTE {
                false
            } else {
                return Err(XDPoSError::InvalidVote);
            };
            if self.cast(candidate, authorize) {
                self.votes.push(Vote { signer, block: number, address: candidate, authorize });
            }

            // Flip membership once the tally passes a majority
            if let Some(tally) = self.tally.get(&candidate).copied() {
                if tally.votes > self.signers.len() / 2 {
                    if tally.authorize {
                        self.signers.insert(candidate);
                    } else {
                        self.signers.remove(&candidate);

                        // Shrink the recents window to the reduced set
                        if let Some(limit) = (self.signers.len() as u64 / 2).checked_add(1) {
                            if number >= limit {
                                self.recents.remove(&(number - limit));
                            }
                        }
                        // Discard votes the dropped signer cast
                        let mut i = 0;
                        while i < self.votes.len() {
                            if self.votes[i].signer == candidate {
                                let old = self.votes.remove(i);
                                self.uncast(&old.address, old.authorize);
                            } else {
                                i += 1;
                            }
                        }
                    }
                    // Either way the decision is final
                    self.votes.retain(|v| v.address != candidate);
                    self.tally.remove(&candidate);
                }
            }
        }

        let last = headers.last().expect("headers checked non-empty");
        self.number = last.number;
        self.hash = last.hash_slow();
        Ok(self)
    }

    /// Persist the snapshot into the key-value store
    pub fn store(&self, db: &dyn Database) -> XDPoSResult<()> {
        let payload =
            serde_json::to_vec(self).map_err(|e| XDPoSError::Database(e.to_string()))?;
        db.put(Self::db_key(&self.hash).as_bytes(), &payload)
    }

    /// Load a persisted snapshot by block hash
    pub fn load(db: &dyn Database, hash: &B256) -> XDPoSResult<Option<Snapshot>> {
        let Some(payload) = db.get(Self::db_key(hash).as_bytes())? else {
            return Ok(None);
        };
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| XDPoSError::Database(e.to_string()))
    }

    fn db_key(hash: &B256) -> String {
        format!("{SNAPSHOT_KEY_PREFIX}{}", hex::encode(hash))
    }
}
