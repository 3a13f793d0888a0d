//! RLP envelopes and signing hashes for V2 BFT messages.
//!
//! Votes and timeouts are signed over the keccak256 of the RLP of their
//! `*ForSign` payloads. Block headers carry `ExtraFieldsV2` in `extra_data`,
//! prefixed with a single version byte (2).

use super::{BlockInfo, ExtraFieldsV2, QuorumCert, Round, TimeoutCert, TimeoutForSign, VoteForSign};
use crate::errors::{XDPoSError, XDPoSResult};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};

/// Version byte carried by v2 extra data
pub const EXTRA_FIELDS_V2_VERSION: u8 = 2;

/// RLP-encodable/decodable BlockInfo
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockInfoRlp {
    pub hash: B256,
    pub round: u64,
    pub number: u64,
}

impl From<&BlockInfo> for BlockInfoRlp {
    fn from(info: &BlockInfo) -> Self {
        Self { hash: info.hash, round: info.round, number: info.number }
    }
}

impl From<BlockInfoRlp> for BlockInfo {
    fn from(rlp: BlockInfoRlp) -> Self {
        Self { hash: rlp.hash, round: rlp.round, number: rlp.number }
    }
}

/// RLP-encodable/decodable QuorumCert
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct QuorumCertRlp {
    pub proposed_block_info: BlockInfoRlp,
    pub signatures: Vec<Vec<u8>>,
    pub gap_number: u64,
}

impl From<&QuorumCert> for QuorumCertRlp {
    fn from(qc: &QuorumCert) -> Self {
        Self {
            proposed_block_info: (&qc.proposed_block_info).into(),
            signatures: qc.signatures.clone(),
            gap_number: qc.gap_number,
        }
    }
}

impl From<QuorumCertRlp> for QuorumCert {
    fn from(rlp: QuorumCertRlp) -> Self {
        QuorumCert {
            proposed_block_info: rlp.proposed_block_info.into(),
            signatures: rlp.signatures,
            gap_number: rlp.gap_number,
        }
    }
}

/// RLP-encodable/decodable TimeoutCert
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TimeoutCertRlp {
    pub round: u64,
    pub signatures: Vec<Vec<u8>>,
    pub gap_number: u64,
}

impl From<&TimeoutCert> for TimeoutCertRlp {
    fn from(tc: &TimeoutCert) -> Self {
        Self { round: tc.round, signatures: tc.signatures.clone(), gap_number: tc.gap_number }
    }
}

impl From<TimeoutCertRlp> for TimeoutCert {
    fn from(rlp: TimeoutCertRlp) -> Self {
        TimeoutCert { round: rlp.round, signatures: rlp.signatures, gap_number: rlp.gap_number }
    }
}

/// RLP payload of a vote signature
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct VoteForSignRlp {
    pub proposed_block_info: BlockInfoRlp,
    pub gap_number: u64,
}

impl From<&VoteForSign> for VoteForSignRlp {
    fn from(v: &VoteForSign) -> Self {
        Self { proposed_block_info: (&v.proposed_block_info).into(), gap_number: v.gap_number }
    }
}

/// RLP payload of a timeout signature
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TimeoutForSignRlp {
    pub round: u64,
    pub gap_number: u64,
}

impl From<&TimeoutForSign> for TimeoutForSignRlp {
    fn from(t: &TimeoutForSign) -> Self {
        Self { round: t.round, gap_number: t.gap_number }
    }
}

/// Compute the signature hash for a vote
pub fn vote_sig_hash(vote: &VoteForSign) -> B256 {
    let rlp_vote: VoteForSignRlp = vote.into();
    keccak256(alloy_rlp::encode(&rlp_vote))
}

/// Compute the signature hash for a timeout
pub fn timeout_sig_hash(timeout: &TimeoutForSign) -> B256 {
    let rlp_timeout: TimeoutForSignRlp = timeout.into();
    keccak256(alloy_rlp::encode(&rlp_timeout))
}

/// ExtraFields_v2 RLP structure for block headers
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[rlp(trailing)]
pub struct ExtraFieldsV2Rlp {
    pub round: u64,
    pub quorum_cert: Option<QuorumCertRlp>,
}

/// Encode ExtraFields_v2 to bytes with the version prefix
pub fn encode_extra_fields_v2(round: Round, quorum_cert: Option<&QuorumCert>) -> Vec<u8> {
    let fields = ExtraFieldsV2Rlp { round, quorum_cert: quorum_cert.map(Into::into) };

    let encoded = alloy_rlp::encode(&fields);
    let mut result = Vec::with_capacity(1 + encoded.len());
    result.push(EXTRA_FIELDS_V2_VERSION);
    result.extend_from_slice(&encoded);
    result
}

/// Decode ExtraFields_v2 from bytes (with version prefix)
pub fn decode_extra_fields_v2(bytes: &[u8]) -> XDPoSResult<ExtraFieldsV2> {
    if bytes.is_empty() {
        return Err(XDPoSError::ExtraDataTooShort);
    }

    let version = bytes[0];
    if version < EXTRA_FIELDS_V2_VERSION {
        return Err(XDPoSError::InvalidExtraData);
    }

    let fields = ExtraFieldsV2Rlp::decode(&mut &bytes[1..])
        .map_err(|_| XDPoSError::InvalidExtraData)?;

    Ok(ExtraFieldsV2::new(fields.round, fields.quorum_cert.map(Into::into)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_info_rlp_roundtrip() {
        let info = BlockInfo::new(B256::with_last_byte(1), 100, 1000);
        let rlp: BlockInfoRlp = (&info).into();
        let encoded = alloy_rlp::encode(&rlp);
        let decoded = BlockInfoRlp::decode(&mut &encoded[..]).unwrap();
        assert_eq!(rlp, decoded);
    }

    #[test]
    fn test_quorum_cert_rlp_roundtrip() {
        let block_info = BlockInfo::new(B256::with_last_byte(1), 100, 1000);
        let mut qc = QuorumCert::new(block_info, 500);
        qc.add_signature(vec![1, 2, 3, 4, 5]);

        let rlp: QuorumCertRlp = (&qc).into();
        let encoded = alloy_rlp::encode(&rlp);
        let decoded = QuorumCertRlp::decode(&mut &encoded[..]).unwrap();
        assert_eq!(rlp, decoded);
    }

    #[test]
    fn test_timeout_cert_rlp_roundtrip() {
        let mut tc = TimeoutCert::new(200, 500);
        tc.add_signature(vec![1, 2, 3]);

        let rlp: TimeoutCertRlp = (&tc).into();
        let encoded = alloy_rlp::encode(&rlp);
        let decoded = TimeoutCertRlp::decode(&mut &encoded[..]).unwrap();
        assert_eq!(rlp, decoded);
    }

    #[test]
    fn test_vote_sig_hash_deterministic() {
        let block_info = BlockInfo::new(B256::with_last_byte(42), 100, 1000);
        let vote_for_sign = VoteForSign { proposed_block_info: block_info, gap_number: 500 };

        let hash1 = vote_sig_hash(&vote_for_sign);
        let hash2 = vote_sig_hash(&vote_for_sign);
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, B256::ZERO);
    }

    #[test]
    fn test_timeout_sig_hash_binds_round_and_gap() {
        let a = timeout_sig_hash(&TimeoutForSign { round: 200, gap_number: 500 });
        let b = timeout_sig_hash(&TimeoutForSign { round: 201, gap_number: 500 });
        let c = timeout_sig_hash(&TimeoutForSign { round: 200, gap_number: 501 });
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_extra_fields_v2_encode_decode() {
        let block_info = BlockInfo::new(B256::with_last_byte(1), 99, 1000);
        let qc = QuorumCert::new(block_info, 500);

        let encoded = encode_extra_fields_v2(100, Some(&qc));
        assert_eq!(encoded[0], EXTRA_FIELDS_V2_VERSION);

        let decoded = decode_extra_fields_v2(&encoded).unwrap();
        assert_eq!(decoded.round, 100);
        assert_eq!(decoded.quorum_cert, Some(qc));

        // Switch block carries no QC
        let encoded_no_qc = encode_extra_fields_v2(0, None);
        let decoded = decode_extra_fields_v2(&encoded_no_qc).unwrap();
        assert_eq!(decoded.round, 0);
        assert!(decoded.quorum_cert.is_none());
    }

    #[test]
    fn test_decode_invalid_version() {
        assert!(matches!(
            decode_extra_fields_v2(&[1, 0, 0, 0]),
            Err(XDPoSError::InvalidExtraData)
        ));
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode_extra_fields_v2(&[]), Err(XDPoSError::ExtraDataTooShort)));
    }
}
