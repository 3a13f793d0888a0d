//! XDPoS block header primitive.
//!
//! Extends the standard Ethereum header with the three XDPoS consensus
//! fields: `validators` (checkpoint validator assignment bytes), `validator`
//! (the 65-byte second seal of double validation) and `penalties` (packed
//! addresses of penalized masternodes).
//!
//! RLP encoding order (18 fields):
//! 1-15: standard Ethereum header fields
//! 16-18: XDPoS validator fields

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};

/// Nonce value for an authorize vote (v1 governance)
pub const NONCE_AUTH_VOTE: B64 = B64::new([0xff; 8]);

/// Nonce value for a drop vote (v1 governance), also the checkpoint nonce
pub const NONCE_DROP_VOTE: B64 = B64::new([0x00; 8]);

/// Keccak256 of the RLP of an empty uncle list
pub const EMPTY_UNCLE_HASH: B256 = B256::new([
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4,
    0x1a, 0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4,
    0x93, 0x47,
]);

/// XDPoS block header
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Header {
    /// Hash of the parent block's header
    pub parent_hash: B256,
    /// Hash of the ommers list (always the empty-list hash in XDPoS)
    pub ommers_hash: B256,
    /// Fee recipient; doubles as the vote subject in v1 governance
    pub beneficiary: Address,
    /// State trie root
    pub state_root: B256,
    /// Transactions trie root
    pub transactions_root: B256,
    /// Receipts trie root
    pub receipts_root: B256,
    /// Log bloom filter
    pub logs_bloom: Bloom,
    /// Leader-turn score (v1); 1 or larger in v2
    pub difficulty: U256,
    /// Block number
    pub number: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas used
    pub gas_used: u64,
    /// Unix timestamp
    pub timestamp: u64,
    /// `vanity(32) ‖ signer_list? ‖ seal(65)` in v1, versioned RLP in v2
    pub extra_data: Bytes,
    /// Reserved, must be zero
    pub mix_hash: B256,
    /// `0xff..f` authorize vote or `0x00..0` drop vote (v1); zero in v2
    pub nonce: B64,
    /// Validator assignment bytes; empty outside checkpoint blocks
    pub validators: Bytes,
    /// The 65-byte second seal of double validation; unused in v2
    pub validator: Bytes,
    /// Packed addresses of penalized masternodes at epoch boundaries
    pub penalties: Bytes,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_UNCLE_HASH,
            beneficiary: Address::ZERO,
            state_root: B256::ZERO,
            transactions_root: B256::ZERO,
            receipts_root: B256::ZERO,
            logs_bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            mix_hash: B256::ZERO,
            nonce: B64::ZERO,
            validators: Bytes::new(),
            validator: Bytes::new(),
            penalties: Bytes::new(),
        }
    }
}

impl Header {
    /// Heavy function that computes the hash of the header via keccak256.
    pub fn hash_slow(&self) -> B256 {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        keccak256(&buf)
    }

    /// Whether this header sits on an epoch boundary for the given epoch length
    pub fn is_epoch_switch(&self, epoch: u64) -> bool {
        self.number % epoch == 0
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn alloy_primitives::bytes::BufMut) {
        let mut list_header = RlpHeader { list: true, payload_length: 0 };

        list_header.payload_length += self.parent_hash.length();
        list_header.payload_length += self.ommers_hash.length();
        list_header.payload_length += self.beneficiary.length();
        list_header.payload_length += self.state_root.length();
        list_header.payload_length += self.transactions_root.length();
        list_header.payload_length += self.receipts_root.length();
        list_header.payload_length += self.logs_bloom.length();
        list_header.payload_length += self.difficulty.length();
        list_header.payload_length += self.number.length();
        list_header.payload_length += self.gas_limit.length();
        list_header.payload_length += self.gas_used.length();
        list_header.payload_length += self.timestamp.length();
        list_header.payload_length += self.extra_data.length();
        list_header.payload_length += self.mix_hash.length();
        list_header.payload_length += self.nonce.length();
        list_header.payload_length += self.validators.length();
        list_header.payload_length += self.validator.length();
        list_header.payload_length += self.penalties.length();

        list_header.encode(out);

        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.beneficiary.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        self.validators.encode(out);
        self.validator.encode(out);
        self.penalties.encode(out);
    }

    fn length(&self) -> usize {
        let mut length = 0;
        length += self.parent_hash.length();
        length += self.ommers_hash.length();
        length += self.beneficiary.length();
        length += self.state_root.length();
        length += self.transactions_root.length();
        length += self.receipts_root.length();
        length += self.logs_bloom.length();
        length += self.difficulty.length();
        length += self.number.length();
        length += self.gas_limit.length();
        length += self.gas_used.length();
        length += self.timestamp.length();
        length += self.extra_data.length();
        length += self.mix_hash.length();
        length += self.nonce.length();
        length += self.validators.length();
        length += self.validator.length();
        length += self.penalties.length();

        length + alloy_rlp::length_of_length(length)
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }

        let started_len = buf.len();

        let this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            validators: Decodable::decode(buf)?,
            validator: Decodable::decode(buf)?,
            penalties: Decodable::decode(buf)?,
        };

        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }

        Ok(this)
    }
}
