//! Equivocation forensics.
//!
//! Watches certificates as the engine processes them. Two QCs for the same
//! round over different blocks prove every signer in their intersection
//! signed two conflicting blocks; a pooled vote for a block other than the
//! one a finalized QC certifies proves the same for that voter. Evidence is
//! persisted and surfaced, never acted on locally.

use super::{verification::qc_signers, QuorumCert, Round, Vote};
use crate::traits::Database;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rounds of QC history kept for cross-checking
const QC_HISTORY_ROUNDS: u64 = 900;

/// Proof that a signer set certified two conflicting blocks at one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivocationEvidence {
    /// Round both certificates refer to
    pub round: Round,
    /// First observed certificate
    pub qc1: QuorumCert,
    /// Conflicting certificate
    pub qc2: QuorumCert,
    /// Signers present in both certificates
    pub common_signers: Vec<Address>,
}

/// Proof that a pooled vote contradicts a finalized certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEquivocationEvidence {
    /// Round of the conflict
    pub round: Round,
    /// The equivocating voter
    pub signer: Address,
    /// Block hash the stray vote endorses
    pub voted_hash: B256,
    /// Block hash the finalized certificate endorses
    pub finalized_hash: B256,
}

/// Equivocation detector over observed certificates and pooled votes
#[derive(Debug, Default)]
pub struct Forensics {
    qcs_by_round: BTreeMap<Round, QuorumCert>,
    evidence: Vec<EquivocationEvidence>,
    vote_evidence: Vec<VoteEquivocationEvidence>,
}

impl Forensics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a processed QC through the detector.
    ///
    /// Returns evidence when `qc` conflicts with a previously observed QC at
    /// the same round. Persistence failures are logged, not raised; evidence
    /// must never stall the engine.
    pub fn observe_qc(
        &mut self,
        qc: &QuorumCert,
        db: &dyn Database,
    ) -> Option<EquivocationEvidence> {
        let round = qc.proposed_block_info.round;
        self.prune(round);

        let Some(known) = self.qcs_by_round.get(&round) else {
            self.qcs_by_round.insert(round, qc.clone());
            return None;
        };
        if known.proposed_block_info.hash == qc.proposed_block_info.hash {
            return None;
        }

        let known_signers = qc_signers(known).unwrap_or_default();
        let new_signers = qc_signers(qc).unwrap_or_default();
        let common_signers: Vec<Address> =
            known_signers.iter().copied().filter(|s| new_signers.contains(s)).collect();

        let evidence = EquivocationEvidence {
            round,
            qc1: known.clone(),
            qc2: qc.clone(),
            common_signers,
        };
        tracing::warn!(
            round,
            signers = ?evidence.common_signers,
            "equivocation detected: two QCs certify different blocks"
        );
        self.persist(db, &format!("forensics/qc/{round}"), &evidence);
        self.evidence.push(evidence.clone());
        Some(evidence)
    }

    /// Compare pooled votes at the finalized QC's round against the block it
    /// certifies. Every vote for a different block by one of the QC's signers
    /// is an equivocation.
    pub fn observe_finalized_votes(
        &mut self,
        finalized: &QuorumCert,
        pooled_votes: &[Vote],
        db: &dyn Database,
    ) -> Vec<VoteEquivocationEvidence> {
        let round = finalized.proposed_block_info.round;
        let finalized_hash = finalized.proposed_block_info.hash;
        let certified_signers = qc_signers(finalized).unwrap_or_default();

        let mut found = Vec::new();
        for vote in pooled_votes {
            if vote.proposed_block_info.round != round
                || vote.proposed_block_info.hash == finalized_hash
            {
                continue;
            }
            let Some(signer) = vote.signer() else { continue };
            if !certified_signers.contains(&signer) {
                continue;
            }
            let evidence = VoteEquivocationEvidence {
                round,
                signer,
                voted_hash: vote.proposed_block_info.hash,
                finalized_hash,
            };
            tracing::warn!(round, ?signer, "vote equivocation against finalized QC");
            self.persist(db, &format!("forensics/vote/{round}/{signer}"), &evidence);
            found.push(evidence);
        }
        self.vote_evidence.extend(found.clone());
        found
    }

    /// Accumulated QC/QC evidence
    pub fn evidence(&self) -> &[EquivocationEvidence] {
        &self.evidence
    }

    /// Accumulated vote/QC evidence
    pub fn vote_evidence(&self) -> &[VoteEquivocationEvidence] {
        &self.vote_evidence
    }

    fn persist<T: Serialize>(&self, db: &dyn Database, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(payload) => {
                if let Err(err) = db.put(key.as_bytes(), &payload) {
                    tracing::warn!(%err, key, "failed to persist forensics evidence");
                }
            }
            Err(err) => tracing::warn!(%err, key, "failed to encode forensics evidence"),
        }
    }

    fn prune(&mut self, current_round: Round) {
        let cutoff = current_round.saturating_sub(QC_HISTORY_ROUNDS);
        self.qcs_by_round.retain(|round, _| *round >= cutoff);
    }
}
