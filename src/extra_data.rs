//! Header signing hash and extra-data handling.
//!
//! The seal hash covers every header field except the 65-byte signature at
//! the end of `extra_data`; the `validators`, `validator` and `penalties`
//! fields never enter the preimage. Checkpoint headers additionally carry the
//! epoch signer list between vanity and seal.

use crate::{
    cache::Cache,
    constants::{EXTRA_SEAL, EXTRA_VANITY},
    errors::{XDPoSError, XDPoSResult},
    primitives::Header,
};
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::RlpEncodable;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, Secp256k1, SecretKey,
};

/// RLP preimage of the seal hash: the signed header fields with the seal
/// stripped from `extra_data`.
#[derive(RlpEncodable)]
struct SealHashContent {
    parent_hash: B256,
    ommers_hash: B256,
    beneficiary: Address,
    state_root: B256,
    transactions_root: B256,
    receipts_root: B256,
    logs_bloom: Bloom,
    difficulty: U256,
    number: u64,
    gas_limit: u64,
    gas_used: u64,
    timestamp: u64,
    extra_data: Bytes,
    mix_hash: B256,
    nonce: B64,
}

/// Compute the hash used as the signing input for a header.
///
/// The last [`EXTRA_SEAL`] bytes of `extra_data` are omitted, so a sealed and
/// an unsealed rendition of the same header hash identically.
pub fn sig_hash(header: &Header) -> B256 {
    let extra = &header.extra_data;
    let unsealed_len = extra.len().saturating_sub(EXTRA_SEAL);

    let content = SealHashContent {
        parent_hash: header.parent_hash,
        ommers_hash: header.ommers_hash,
        beneficiary: header.beneficiary,
        state_root: header.state_root,
        transactions_root: header.transactions_root,
        receipts_root: header.receipts_root,
        logs_bloom: header.logs_bloom,
        difficulty: header.difficulty,
        number: header.number,
        gas_limit: header.gas_limit,
        gas_used: header.gas_used,
        timestamp: header.timestamp,
        extra_data: Bytes::copy_from_slice(&extra[..unsealed_len]),
        mix_hash: header.mix_hash,
        nonce: header.nonce,
    };

    keccak256(alloy_rlp::encode(&content))
}

/// Extract the seal signature from header extra data
pub fn extract_seal(header: &Header) -> XDPoSResult<[u8; 65]> {
    let extra = &header.extra_data;
    if extra.len() < EXTRA_SEAL {
        return Err(XDPoSError::MissingSignature);
    }

    let mut seal = [0u8; 65];
    seal.copy_from_slice(&extra[extra.len() - EXTRA_SEAL..]);
    Ok(seal)
}

/// Recover an address from a 65-byte compact signature over `hash`.
///
/// Accepts legacy (27/28) and EIP-155 style v values.
pub fn ecrecover(hash: &B256, signature: &[u8]) -> XDPoSResult<Address> {
    if signature.len() != 65 {
        return Err(XDPoSError::InvalidSignatureFormat);
    }

    let r_s = &signature[0..64];
    let v = signature[64];

    let recovery_id = if v >= 35 {
        (v - 35) % 2
    } else if v >= 27 {
        v - 27
    } else {
        v
    };
    if recovery_id > 3 {
        return Err(XDPoSError::InvalidSignatureFormat);
    }

    let sig = RecoverableSignature::from_compact(
        r_s,
        RecoveryId::from_i32(recovery_id as i32).map_err(|_| XDPoSError::InvalidSignatureFormat)?,
    )
    .map_err(|_| XDPoSError::InvalidSignatureFormat)?;

    let message = Message::from_digest_slice(hash.as_slice())
        .map_err(|_| XDPoSError::InvalidSignatureFormat)?;

    let secp = Secp256k1::new();
    let public_key = secp
        .recover_ecdsa(&message, &sig)
        .map_err(|_| XDPoSError::SignatureVerificationFailed)?;

    Ok(public_key_to_address(&public_key))
}

/// Last 20 bytes of keccak256 of the uncompressed public key
pub fn public_key_to_address(public_key: &secp256k1::PublicKey) -> Address {
    let pubkey_bytes = public_key.serialize_uncompressed();
    let pubkey_hash = keccak256(&pubkey_bytes[1..]);
    Address::from_slice(&pubkey_hash[12..])
}

/// Sign `hash` with `secret`, producing a 65-byte compact signature with a
/// legacy-style v value.
pub fn sign_hash(secret: &SecretKey, hash: &B256) -> XDPoSResult<[u8; 65]> {
    let message = Message::from_digest_slice(hash.as_slice())
        .map_err(|_| XDPoSError::InvalidSignatureFormat)?;

    let secp = Secp256k1::new();
    let sig = secp.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, sig_bytes) = sig.serialize_compact();

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig_bytes);
    out[64] = recovery_id.to_i32() as u8 + 27;
    Ok(out)
}

/// Recover the creator address from a header's seal, memoizing by header hash.
pub fn recover_header_signer(
    header: &Header,
    cache: &Cache<B256, Address>,
) -> XDPoSResult<Address> {
    let hash = header.hash_slow();
    if let Some(signer) = cache.get(&hash) {
        return Ok(signer);
    }

    let seal = extract_seal(header)?;
    let signer = ecrecover(&sig_hash(header), &seal)?;

    cache.put(hash, signer);
    Ok(signer)
}

/// Recover the second-seal validator from `header.validator` (double
/// validation), memoizing by header hash.
pub fn recover_header_validator(
    header: &Header,
    cache: &Cache<B256, Address>,
) -> XDPoSResult<Address> {
    let hash = header.hash_slow();
    if let Some(validator) = cache.get(&hash) {
        return Ok(validator);
    }

    if header.validator.len() != EXTRA_SEAL {
        return Err(XDPoSError::FailValidatorSignature);
    }
    let validator = ecrecover(&sig_hash(header), &header.validator)?;

    cache.put(hash, validator);
    Ok(validator)
}

/// Parsed V1 extra data structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1ExtraData {
    /// 32 byte vanity prefix
    pub vanity: [u8; 32],
    /// Signer addresses (only present at checkpoint blocks)
    pub signers: Vec<Address>,
    /// 65 byte ECDSA seal signature (R, S, V)
    pub seal: [u8; 65],
}

impl V1ExtraData {
    /// Parse V1 extra data from bytes
    pub fn parse(data: &[u8], is_checkpoint: bool) -> XDPoSResult<Self> {
        if data.len() < EXTRA_VANITY {
            return Err(XDPoSError::MissingVanity);
        }
        if data.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(XDPoSError::MissingSignature);
        }

        let mut vanity = [0u8; 32];
        vanity.copy_from_slice(&data[0..EXTRA_VANITY]);

        let mut seal = [0u8; 65];
        seal.copy_from_slice(&data[data.len() - EXTRA_SEAL..]);

        let middle = &data[EXTRA_VANITY..data.len() - EXTRA_SEAL];
        let signers = if is_checkpoint {
            parse_packed_addresses(middle).ok_or(XDPoSError::InvalidCheckpointSigners)?
        } else {
            if !middle.is_empty() {
                return Err(XDPoSError::ExtraSigners);
            }
            Vec::new()
        };

        Ok(Self { vanity, signers, seal })
    }

    /// Encode extra data back to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(EXTRA_VANITY + self.signers.len() * 20 + EXTRA_SEAL);
        data.extend_from_slice(&self.vanity);
        for signer in &self.signers {
            data.extend_from_slice(signer.as_slice());
        }
        data.extend_from_slice(&self.seal);
        data
    }
}

/// Split a byte string into 20-byte addresses; `None` on a ragged length.
pub fn parse_packed_addresses(data: &[u8]) -> Option<Vec<Address>> {
    if data.len() % 20 != 0 {
        return None;
    }
    Some(data.chunks_exact(20).map(Address::from_slice).collect())
}

/// Concatenate addresses into a packed byte string.
pub fn pack_addresses(addresses: &[Address]) -> Vec<u8> {
    let mut out = Vec::with_capacity(addresses.len() * 20);
    for address in addresses {
        out.extend_from_slice(address.as_slice());
    }
    out
}
