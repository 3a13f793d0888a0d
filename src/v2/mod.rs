//! XDPoS V2 BFT consensus.
//!
//! Round-based consensus with Quorum Certificates, Timeout Certificates, a
//! three-chain commit rule and equivocation forensics. The
//! [`engine::EngineV2`] state machine consumes proposals, votes and timeouts
//! and emits outbound messages for the node to broadcast.

pub mod engine;
pub mod forensics;
pub mod pool;
pub mod proposer;
pub mod types;
pub mod verification;

pub use engine::EngineV2;
pub use forensics::{EquivocationEvidence, Forensics};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Round number type for V2 consensus
pub type Round = u64;

/// Signature type for BFT messages (65 bytes)
pub type Signature = Vec<u8>;

/// BlockInfo contains metadata about a block for BFT messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct BlockInfo {
    /// Block hash
    pub hash: B256,
    /// Consensus round
    pub round: Round,
    /// Block number
    pub number: u64,
}

impl BlockInfo {
    /// Create a new BlockInfo
    pub fn new(hash: B256, round: Round, number: u64) -> Self {
        Self { hash, round, number }
    }
}

/// Quorum Certificate: threshold agreement on a proposed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCert {
    /// Information about the proposed block
    pub proposed_block_info: BlockInfo,
    /// Signatures from masternodes
    pub signatures: Vec<Signature>,
    /// Gap number anchoring the epoch the certificate belongs to
    pub gap_number: u64,
}

impl QuorumCert {
    /// Create a new QuorumCert
    pub fn new(proposed_block_info: BlockInfo, gap_number: u64) -> Self {
        Self { proposed_block_info, signatures: Vec::new(), gap_number }
    }

    /// Add a signature
    pub fn add_signature(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }

    /// Number of carried signatures
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Round of the certified block
    pub fn round(&self) -> Round {
        self.proposed_block_info.round
    }
}

/// Timeout Certificate: threshold agreement that a round timed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCert {
    /// Round that timed out
    pub round: Round,
    /// Signatures from masternodes that timed out
    pub signatures: Vec<Signature>,
    /// Gap number anchoring the epoch the certificate belongs to
    pub gap_number: u64,
}

impl TimeoutCert {
    /// Create a new TimeoutCert
    pub fn new(round: Round, gap_number: u64) -> Self {
        Self { round, signatures: Vec::new(), gap_number }
    }

    /// Add a signature
    pub fn add_signature(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }
}

/// SyncInfo carries the sender's highest certificates for catch-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Highest known quorum certificate
    pub highest_quorum_cert: QuorumCert,
    /// Highest known timeout certificate (if any)
    pub highest_timeout_cert: Option<TimeoutCert>,
}

/// Parsed V2 extra data from block headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFieldsV2 {
    /// Consensus round of the block
    pub round: Round,
    /// Certificate justifying the parent (None only on the switch block)
    pub quorum_cert: Option<QuorumCert>,
}

impl ExtraFieldsV2 {
    /// Create new extra fields
    pub fn new(round: Round, quorum_cert: Option<QuorumCert>) -> Self {
        Self { round, quorum_cert }
    }
}

/// Vote message for a proposed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Proposed block information
    pub proposed_block_info: BlockInfo,
    /// Signature over the vote sig-hash
    pub signature: Signature,
    /// Gap number
    pub gap_number: u64,
    /// Signer address, populated after recovery
    #[serde(skip)]
    signer: Option<Address>,
}

impl Vote {
    /// Create a new vote
    pub fn new(proposed_block_info: BlockInfo, signature: Signature, gap_number: u64) -> Self {
        Self { proposed_block_info, signature, gap_number, signer: None }
    }

    /// Record the recovered signer
    pub fn set_signer(&mut self, signer: Address) {
        self.signer = Some(signer);
    }

    /// Recovered signer, if any
    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    /// Round the vote refers to
    pub fn round(&self) -> Round {
        self.proposed_block_info.round
    }

    /// Pool key grouping votes for the same block at the same round
    pub fn pool_key(&self) -> String {
        format!(
            "{}:{}:{}:{:?}",
            self.proposed_block_info.round,
            self.gap_number,
            self.proposed_block_info.number,
            self.proposed_block_info.hash
        )
    }
}

/// Timeout message for a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    /// Round that timed out
    pub round: Round,
    /// Signature over the timeout sig-hash
    pub signature: Signature,
    /// Gap number
    pub gap_number: u64,
    /// Signer address, populated after recovery
    #[serde(skip)]
    signer: Option<Address>,
}

impl Timeout {
    /// Create a new timeout
    pub fn new(round: Round, signature: Signature, gap_number: u64) -> Self {
        Self { round, signature, gap_number, signer: None }
    }

    /// Record the recovered signer
    pub fn set_signer(&mut self, signer: Address) {
        self.signer = Some(signer);
    }

    /// Recovered signer, if any
    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    /// Pool key grouping timeouts for the same round
    pub fn pool_key(&self) -> String {
        format!("{}:{}", self.round, self.gap_number)
    }
}

/// Signing payload of a vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteForSign {
    /// Proposed block information
    pub proposed_block_info: BlockInfo,
    /// Gap number
    pub gap_number: u64,
}

/// Signing payload of a timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutForSign {
    /// Round
    pub round: Round,
    /// Gap number
    pub gap_number: u64,
}

/// Epoch boundary information for a v2 block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSwitchInfo {
    /// Masternode list for the epoch
    pub masternodes: Vec<Address>,
    /// Block info of the epoch switch block
    pub epoch_switch_block_info: BlockInfo,
    /// Penalties recorded at the boundary
    pub penalties: Vec<Address>,
}
