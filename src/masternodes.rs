//! Epoch masternode selection.
//!
//! The authoritative signer list for an epoch lives in the extra data of the
//! epoch's checkpoint header. The active set is that list minus the penalties
//! recorded at the boundary and at the previous [`LIMIT_PENALTY_EPOCH`]
//! boundaries. Checkpoint headers also carry the validator assignment bytes
//! from which the m1 -> m2 double-validation pairing is derived.

use crate::{
    constants::{EXTRA_SEAL, EXTRA_VANITY, LIMIT_PENALTY_EPOCH, M2_BYTE_LENGTH},
    errors::{XDPoSError, XDPoSResult},
    extra_data::parse_packed_addresses,
    primitives::Header,
    traits::ChainReader,
};
use alloy_primitives::Address;
use std::collections::BTreeMap;

/// Extract the raw signer list from a checkpoint header's extra data.
///
/// Returns an empty list when the extra data is shorter than vanity + seal,
/// matching the tolerant read the chain does on foreign checkpoints.
pub fn masternodes_from_checkpoint_header(checkpoint: &Header) -> Vec<Address> {
    let extra = &checkpoint.extra_data;
    if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Vec::new();
    }
    parse_packed_addresses(&extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL]).unwrap_or_default()
}

/// Checkpoint block number governing the epoch that contains `number`
pub fn checkpoint_number(number: u64, epoch: u64) -> u64 {
    number - (number % epoch)
}

/// Masternode list in effect for `header`, before penalty filtering.
///
/// For a checkpoint header the list comes from the header itself; otherwise
/// from the governing checkpoint on the canonical chain.
pub fn get_masternodes(chain: &dyn ChainReader, header: &Header, epoch: u64) -> Vec<Address> {
    if header.number % epoch == 0 {
        return masternodes_from_checkpoint_header(header);
    }
    match chain.get_header_by_number(checkpoint_number(header.number, epoch)) {
        Some(checkpoint) => masternodes_from_checkpoint_header(&checkpoint),
        None => Vec::new(),
    }
}

/// Remove `penalized` entries from `masternodes`, preserving order
pub fn remove_penalized(masternodes: Vec<Address>, penalized: &[Address]) -> Vec<Address> {
    masternodes.into_iter().filter(|m| !penalized.contains(m)).collect()
}

/// Drop the masternodes penalized at the checkpoint block `epoch_number`
pub fn remove_penalties_from_block(
    chain: &dyn ChainReader,
    masternodes: Vec<Address>,
    epoch_block: u64,
) -> Vec<Address> {
    if epoch_block == 0 {
        return masternodes;
    }
    let Some(header) = chain.get_header_by_number(epoch_block) else {
        return masternodes;
    };
    match parse_packed_addresses(&header.penalties) {
        Some(penalized) if !penalized.is_empty() => remove_penalized(masternodes, &penalized),
        _ => masternodes,
    }
}

/// Apply the multi-epoch penalty filter: the boundary's own penalties plus
/// the penalties recorded at the previous `LIMIT_PENALTY_EPOCH` checkpoints.
pub fn filter_penalized_masternodes(
    chain: &dyn ChainReader,
    mut masternodes: Vec<Address>,
    number: u64,
    epoch: u64,
    boundary_penalties: &[Address],
) -> Vec<Address> {
    masternodes = remove_penalized(masternodes, boundary_penalties);
    for i in 1..=LIMIT_PENALTY_EPOCH {
        if number > i * epoch {
            masternodes = remove_penalties_from_block(chain, masternodes, number - i * epoch);
        }
    }
    masternodes
}

/// Decode validator assignment bytes: packed 4-byte fields, each holding the
/// ASCII decimal of a masternode index.
pub fn extract_validator_indices(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks(M2_BYTE_LENGTH)
        .filter(|chunk| chunk.len() == M2_BYTE_LENGTH)
        .filter_map(|chunk| {
            let trimmed: Vec<u8> =
                chunk.iter().copied().filter(|b| *b != 0).collect();
            std::str::from_utf8(&trimmed).ok()?.parse::<u64>().ok()
        })
        .collect()
}

/// Encode masternode indices into validator assignment bytes
pub fn encode_validator_indices(indices: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * M2_BYTE_LENGTH);
    for index in indices {
        let ascii = index.to_string().into_bytes();
        debug_assert!(ascii.len() <= M2_BYTE_LENGTH);
        out.extend_from_slice(&ascii);
        out.resize(out.len() + (M2_BYTE_LENGTH - ascii.len()), 0);
    }
    out
}

/// Derive the m1 -> m2 pairing for the epoch of `current`.
///
/// The assignment rotates by epoch position so a fixed checkpoint does not
/// pin each masternode to one validator for the whole epoch.
pub fn get_m1m2(
    checkpoint: &Header,
    current: &Header,
    epoch: u64,
) -> XDPoSResult<BTreeMap<Address, Address>> {
    if checkpoint.number % epoch != 0 {
        return Err(XDPoSError::Custom("not a checkpoint block".into()));
    }

    let masternodes = masternodes_from_checkpoint_header(checkpoint);
    if masternodes.is_empty() {
        return Err(XDPoSError::MasternodesNotFound);
    }
    let indices = extract_validator_indices(&checkpoint.validators);

    let max_mns = masternodes.len() as u64;
    let rotation = ((current.number % epoch) / max_mns) % max_mns;

    let mut m1m2 = BTreeMap::new();
    for (i, m1) in masternodes.iter().enumerate() {
        let assigned = indices.get(i).copied().unwrap_or(i as u64);
        let m2_index = ((assigned % max_mns) + rotation) % max_mns;
        m1m2.insert(*m1, masternodes[m2_index as usize]);
    }
    Ok(m1m2)
}
