//! Signature verification for V2 certificates and messages.
//!
//! A certificate is valid when, after deduplication, at least the epoch's
//! threshold of signatures recover to distinct members of the masternode set.
//! Recovery over a batch runs in parallel.

use super::{
    types::{timeout_sig_hash, vote_sig_hash},
    QuorumCert, Timeout, TimeoutCert, TimeoutForSign, Vote, VoteForSign,
};
use crate::{
    errors::{XDPoSError, XDPoSResult},
    extra_data::ecrecover,
};
use alloy_primitives::{keccak256, Address, B256};
use rayon::prelude::*;
use std::collections::HashSet;

/// Drop byte-identical signatures, returning (unique, duplicates)
pub fn unique_signatures(signatures: &[Vec<u8>]) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();

    for sig in signatures {
        if seen.insert(keccak256(sig)) {
            unique.push(sig.clone());
        } else {
            duplicates.push(sig.clone());
        }
    }

    (unique, duplicates)
}

/// Recover the distinct signers behind `signatures` over `hash`, in parallel.
///
/// A signature that fails to recover fails the whole batch. Signatures that
/// recover to an already-seen address are dropped.
pub fn recover_unique_signers(
    hash: &B256,
    signatures: &[Vec<u8>],
) -> XDPoSResult<Vec<Address>> {
    let recovered: Vec<XDPoSResult<Address>> =
        signatures.par_iter().map(|sig| ecrecover(hash, sig)).collect();

    let mut seen = HashSet::new();
    let mut signers = Vec::new();
    for result in recovered {
        let address = result?;
        if seen.insert(address) {
            signers.push(address);
        }
    }
    Ok(signers)
}

/// Signers of a QC's votes (deduplicated), used by forensics
pub fn qc_signers(qc: &QuorumCert) -> XDPoSResult<Vec<Address>> {
    let payload = VoteForSign {
        proposed_block_info: qc.proposed_block_info.clone(),
        gap_number: qc.gap_number,
    };
    let (unique, _) = unique_signatures(&qc.signatures);
    recover_unique_signers(&vote_sig_hash(&payload), &unique)
}

/// Verify a Quorum Certificate against the epoch's masternode set.
///
/// A round-0 certificate (the v2 switch anchor) carries no signatures and is
/// accepted as-is.
pub fn verify_qc(
    qc: &QuorumCert,
    masternodes: &[Address],
    threshold: usize,
) -> XDPoSResult<()> {
    if masternodes.is_empty() {
        return Err(XDPoSError::MasternodesNotFound);
    }
    if qc.proposed_block_info.round == 0 {
        return Ok(());
    }

    let (unique_sigs, duplicates) = unique_signatures(&qc.signatures);
    if !duplicates.is_empty() {
        tracing::warn!(
            duplicates = duplicates.len(),
            block = qc.proposed_block_info.number,
            "duplicate signatures in QC"
        );
    }
    if unique_sigs.len() < threshold {
        return Err(XDPoSError::InsufficientSignatures {
            have: unique_sigs.len(),
            need: threshold,
        });
    }

    let payload = VoteForSign {
        proposed_block_info: qc.proposed_block_info.clone(),
        gap_number: qc.gap_number,
    };
    let signers = recover_unique_signers(&vote_sig_hash(&payload), &unique_sigs)?;

    for signer in &signers {
        if !masternodes.contains(signer) {
            tracing::warn!(?signer, "QC signature from non-masternode");
            return Err(XDPoSError::InvalidQCSignatures(format!(
                "signer {signer} not in masternode list"
            )));
        }
    }
    if signers.len() < threshold {
        return Err(XDPoSError::InsufficientSignatures { have: signers.len(), need: threshold });
    }

    Ok(())
}

/// Verify a Timeout Certificate against the epoch's masternode set
pub fn verify_tc(
    tc: &TimeoutCert,
    masternodes: &[Address],
    threshold: usize,
) -> XDPoSResult<()> {
    if masternodes.is_empty() {
        return Err(XDPoSError::MasternodesNotFound);
    }

    let (unique_sigs, duplicates) = unique_signatures(&tc.signatures);
    if !duplicates.is_empty() {
        tracing::warn!(duplicates = duplicates.len(), round = tc.round, "duplicate signatures in TC");
    }
    if unique_sigs.len() < threshold {
        return Err(XDPoSError::InsufficientSignatures {
            have: unique_sigs.len(),
            need: threshold,
        });
    }

    let payload = TimeoutForSign { round: tc.round, gap_number: tc.gap_number };
    let signers = recover_unique_signers(&timeout_sig_hash(&payload), &unique_sigs)?;

    for signer in &signers {
        if !masternodes.contains(signer) {
            tracing::warn!(?signer, "TC signature from non-masternode");
            return Err(XDPoSError::InvalidTCSignatures);
        }
    }
    if signers.len() < threshold {
        return Err(XDPoSError::InsufficientSignatures { have: signers.len(), need: threshold });
    }

    Ok(())
}

/// Verify a single vote message: recover the signer and check membership.
/// The recovered signer is written back into the vote.
pub fn verify_vote(vote: &mut Vote, masternodes: &[Address]) -> XDPoSResult<Address> {
    let payload = VoteForSign {
        proposed_block_info: vote.proposed_block_info.clone(),
        gap_number: vote.gap_number,
    };
    let signer = ecrecover(&vote_sig_hash(&payload), &vote.signature)?;
    if !masternodes.contains(&signer) {
        return Err(XDPoSError::SignerNotMasternode(signer));
    }
    vote.set_signer(signer);
    Ok(signer)
}

/// Verify a single timeout message: recover the signer and check membership.
/// The recovered signer is written back into the timeout.
pub fn verify_timeout(timeout: &mut Timeout, masternodes: &[Address]) -> XDPoSResult<Address> {
    let payload = TimeoutForSign { round: timeout.round, gap_number: timeout.gap_number };
    let signer = ecrecover(&timeout_sig_hash(&payload), &timeout.signature)?;
    if !masternodes.contains(&signer) {
        return Err(XDPoSError::SignerNotMasternode(signer));
    }
    timeout.set_signer(signer);
    Ok(signer)
}
