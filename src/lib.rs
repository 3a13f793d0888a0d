//! XDPoS delegated-proof-of-stake consensus core.
//!
//! Two protocol revisions coexist:
//!
//! - **V1**: round-robin sealing over epoch checkpoints with double
//!   validation (a creator seal plus an assigned co-validator seal).
//! - **V2**: a HotStuff-style BFT protocol with rounds, Quorum Certificates,
//!   Timeout Certificates and a three-chain commit rule.
//!
//! The crate owns header verification, checkpoint snapshots, leader rotation,
//! the v2 round state machine with its vote/timeout pools, and equivocation
//! forensics. Block storage, execution, networking and reward math stay on
//! the node side behind the [`traits`] interfaces.
//!
//! ## Architecture
//!
//! - [`XDPoS`] - the engine facade dispatching between revisions
//! - [`XDPoSConfig`] - chain parameters (epoch, gap, period, v2 switch)
//! - [`Snapshot`] - v1 voting snapshot
//! - [`EngineV2`] - the BFT round state machine

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod cache;
mod config;
mod countdown;
mod errors;
mod extra_data;
mod forkchoice;
mod masternodes;
mod primitives;
mod snapshot;
mod traits;
mod v1;
pub mod v2;
mod xdpos;

#[cfg(test)]
mod tests;

pub use cache::Cache;
pub use config::{xdc_apothem_config, xdc_mainnet_config, V2Config, XDPoSConfig};
pub use countdown::{CountdownTimer, OnTimeoutFn};
pub use errors::{ErrorKind, XDPoSError, XDPoSResult};
pub use extra_data::{
    ecrecover, extract_seal, pack_addresses, parse_packed_addresses, recover_header_signer,
    recover_header_validator, sig_hash, sign_hash, V1ExtraData,
};
pub use forkchoice::ForkChoice;
pub use masternodes::{
    checkpoint_number, encode_validator_indices, extract_validator_indices, get_m1m2,
    get_masternodes, masternodes_from_checkpoint_header,
};
pub use primitives::{Header, EMPTY_UNCLE_HASH, NONCE_AUTH_VOTE, NONCE_DROP_VOTE};
pub use snapshot::{Snapshot, Tally, Vote};
pub use traits::{ChainPolicy, ChainReader, Database, DefaultPolicy, MemoryDb, SignerFn};
pub use v1::{EngineV1, TurnInfo};
pub use v2::{
    engine::OutboundMessage, BlockInfo, EngineV2, EquivocationEvidence, QuorumCert, Round,
    SyncInfo, TimeoutCert,
};
pub use xdpos::XDPoS;

/// Extra field constants for XDPoS
pub mod constants {
    /// Fixed number of extra-data prefix bytes reserved for signer vanity
    pub const EXTRA_VANITY: usize = 32;

    /// Fixed number of extra-data suffix bytes reserved for signer seal
    pub const EXTRA_SEAL: usize = 65;

    /// Default epoch length (900 blocks)
    pub const DEFAULT_EPOCH: u64 = 900;

    /// Default block period in seconds (2 seconds)
    pub const DEFAULT_PERIOD: u64 = 2;

    /// Default gap before epoch switch (450 blocks)
    pub const DEFAULT_GAP: u64 = 450;

    /// Difficulty every v2 block carries
    pub const V2_DIFFICULTY: u64 = 1;

    /// Number of recent vote snapshots to keep in memory
    pub const INMEMORY_SNAPSHOTS: usize = 128;

    /// Number of recent block signatures to keep in memory
    pub const INMEMORY_SIGNATURES: usize = 4096;

    /// Cache limit for verified headers
    pub const BLOCK_SIGNERS_CACHE_LIMIT: usize = 100_000;

    /// How many past epoch boundaries contribute penalties to the active set
    pub const LIMIT_PENALTY_EPOCH: u64 = 4;

    /// Width of one entry in the checkpoint validator assignment bytes
    pub const M2_BYTE_LENGTH: usize = 4;

    /// A signer may not seal again within this many blocks
    pub const RECENT_SIGNER_LIMIT: u64 = 2;
}

/// Whether `block_number` sits on an epoch boundary
pub fn is_epoch_switch(block_number: u64, epoch: u64) -> bool {
    block_number % epoch == 0
}

/// Epoch index of a block
pub fn epoch_number(block_number: u64, epoch: u64) -> u64 {
    block_number / epoch
}

/// First block of an epoch
pub fn epoch_start_block(epoch: u64, epoch_length: u64) -> u64 {
    epoch * epoch_length
}

/// Gap number for a v2 certificate: the snapshot anchor `gap` blocks before
/// the epoch switch
pub fn calculate_gap_number(epoch_switch_number: u64, gap: u64) -> u64 {
    epoch_switch_number.saturating_sub(gap)
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
