//! V2 block proposer selection.
//!
//! One leader per round, chosen round-robin: `masternodes[round % n]`.

use super::Round;
use crate::errors::{XDPoSError, XDPoSResult};
use alloy_primitives::Address;

/// Select the block proposer for a given round
pub fn select_proposer(round: Round, masternodes: &[Address]) -> XDPoSResult<Address> {
    if masternodes.is_empty() {
        return Err(XDPoSError::MasternodesNotFound);
    }
    let index = (round % masternodes.len() as u64) as usize;
    Ok(masternodes[index])
}

/// Whether `address` leads `round`
pub fn is_leader(round: Round, masternodes: &[Address], address: &Address) -> bool {
    select_proposer(round, masternodes).is_ok_and(|leader| leader == *address)
}

/// Index of a masternode in the set, if present
pub fn masternode_index(address: &Address, masternodes: &[Address]) -> Option<usize> {
    masternodes.iter().position(|m| m == address)
}

/// Next round at or after `current_round` in which `address` leads
pub fn next_leading_round(
    address: &Address,
    current_round: Round,
    masternodes: &[Address],
) -> XDPoSResult<Round> {
    let index = masternode_index(address, masternodes)
        .ok_or(XDPoSError::SignerNotMasternode(*address))? as u64;
    let n = masternodes.len() as u64;
    let current_index = current_round % n;
    Ok(current_round + (index + n - current_index) % n)
}
