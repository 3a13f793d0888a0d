//! XDPoS Consensus Errors

use alloy_primitives::Address;

/// XDPoS-specific error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XDPoSError {
    /// Unknown block
    #[error("unknown block")]
    UnknownBlock,

    /// Unauthorized signer
    #[error("unauthorized signer")]
    Unauthorized,

    /// Invalid checkpoint beneficiary
    #[error("beneficiary in checkpoint block must be zero")]
    InvalidCheckpointBeneficiary,

    /// Invalid vote nonce
    #[error("vote nonce not 0x00..0 or 0xff..f")]
    InvalidVote,

    /// Invalid checkpoint vote
    #[error("vote nonce in checkpoint block must be zero")]
    InvalidCheckpointVote,

    /// Missing vanity in extra data
    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    /// Missing signature in extra data
    #[error("extra-data 65 byte suffix signature missing")]
    MissingSignature,

    /// Extra data carries a signer list outside a checkpoint
    #[error("non-checkpoint block contains extra signer list")]
    ExtraSigners,

    /// Invalid checkpoint signers
    #[error("invalid signer list on checkpoint block")]
    InvalidCheckpointSigners,

    /// Checkpoint penalties do not match the derived penalty set
    #[error("invalid penalty list on checkpoint block")]
    InvalidCheckpointPenalties,

    /// Non-zero mix digest
    #[error("non-zero mix digest")]
    InvalidMixDigest,

    /// Non-empty uncle hash
    #[error("non empty uncle hash")]
    InvalidUncleHash,

    /// Invalid difficulty
    #[error("invalid difficulty")]
    InvalidDifficulty,

    /// Out-of-order headers handed to a snapshot replay
    #[error("invalid voting chain")]
    InvalidVotingChain,

    /// Block in the future
    #[error("block in the future")]
    FutureBlock,

    /// Invalid timestamp
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// Unknown ancestor
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// Creator/validator pair does not match the epoch assignment
    #[error("wrong pair of creator-validator in double validation")]
    FailedDoubleValidation,

    /// Validator signature missing or unrecoverable
    #[error("missing or malformed validator signature")]
    FailValidatorSignature,

    /// Masternode list empty where one is required
    #[error("masternodes not found")]
    MasternodesNotFound,

    /// V2 consensus errors
    #[error("missing quorum certificate")]
    MissingQC,

    #[error("invalid quorum certificate")]
    InvalidQC,

    #[error("invalid QC signatures: {0}")]
    InvalidQCSignatures(String),

    #[error("invalid timeout certificate")]
    InvalidTC,

    #[error("invalid TC signatures")]
    InvalidTCSignatures,

    #[error("extra data too short")]
    ExtraDataTooShort,

    #[error("invalid extra data format")]
    InvalidExtraData,

    #[error("gap number mismatch: message {message}, local {local}")]
    GapNumberMismatch { message: u64, local: u64 },

    #[error("vote or timeout signer {0} not in masternode list")]
    SignerNotMasternode(Address),

    #[error("round mismatch: expected {expected}, got {got}")]
    RoundMismatch { expected: u64, got: u64 },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    /// Local signer is not configured
    #[error("signer not authorized")]
    SignerNotAuthorized,

    /// Database failure during snapshot or evidence persistence
    #[error("database error: {0}")]
    Database(String),

    /// Policy hook failure, surfaced verbatim
    #[error("policy hook error: {0}")]
    Hook(String),

    /// Custom error message
    #[error("{0}")]
    Custom(String),
}

/// Coarse classification used by the chain importer to decide between
/// dropping a block and deferring it for a retry after sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structurally invalid input; never retried
    Malformed,
    /// Authorization or double-validation failure; never retried
    Unauthorized,
    /// Missing ancestry or future timestamp; may be retried after sync
    AncestryGap,
    /// Failure raised by an injected policy hook
    Hook,
    /// Everything else (internal, database, configuration)
    Other,
}

impl XDPoSError {
    /// Classify this error per the propagation policy
    pub fn kind(&self) -> ErrorKind {
        use XDPoSError::*;
        match self {
            UnknownBlock | MissingVanity | MissingSignature | ExtraSigners
            | InvalidCheckpointSigners | InvalidMixDigest | InvalidUncleHash | InvalidVote
            | InvalidCheckpointVote | InvalidCheckpointBeneficiary | InvalidTimestamp
            | InvalidDifficulty | MissingQC | InvalidQC | InvalidQCSignatures(_) | InvalidTC
            | InvalidTCSignatures | ExtraDataTooShort | InvalidExtraData
            | GapNumberMismatch { .. } | RoundMismatch { .. } | InvalidSignatureFormat
            | InsufficientSignatures { .. } | InvalidVotingChain => ErrorKind::Malformed,

            Unauthorized | FailedDoubleValidation | FailValidatorSignature
            | SignerNotMasternode(_) | SignatureVerificationFailed | SignerNotAuthorized => {
                ErrorKind::Unauthorized
            }

            UnknownAncestor | FutureBlock => ErrorKind::AncestryGap,

            InvalidCheckpointPenalties | Hook(_) => ErrorKind::Hook,

            MasternodesNotFound | Database(_) | Custom(_) => ErrorKind::Other,
        }
    }

    /// Whether the chain importer may retry this block after syncing ancestors
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::AncestryGap
    }
}

/// Result type for XDPoS operations
pub type XDPoSResult<T> = Result<T, XDPoSError>;
