//! Test fixtures: deterministic keys, mock chains and signed headers.

use crate::{
    config::XDPoSConfig,
    constants::{EXTRA_SEAL, EXTRA_VANITY},
    extra_data::{pack_addresses, public_key_to_address, sig_hash, sign_hash},
    masternodes::encode_validator_indices,
    primitives::{Header, NONCE_DROP_VOTE},
    traits::{ChainReader, SignerFn},
    v2::{
        types::{encode_extra_fields_v2, vote_sig_hash},
        BlockInfo, QuorumCert, Round, VoteForSign,
    },
};
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// A deterministic signing identity
#[derive(Debug, Clone)]
pub struct TestKey {
    pub secret: SecretKey,
    pub address: Address,
}

impl TestKey {
    pub fn from_byte(fill: u8) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[fill; 32]).expect("valid secret key");
        let address = public_key_to_address(&PublicKey::from_secret_key(&secp, &secret));
        Self { secret, address }
    }

    /// Signer closure backed by this key
    pub fn signer_fn(&self) -> SignerFn {
        let secret = self.secret;
        Arc::new(move |_, digest| sign_hash(&secret, &digest))
    }
}

/// `count` deterministic keys, sorted by address so the key order matches the
/// packed checkpoint signer list
pub fn test_keys(count: u8) -> Vec<TestKey> {
    let mut keys: Vec<TestKey> = (1..=count).map(TestKey::from_byte).collect();
    keys.sort_by_key(|k| k.address);
    keys
}

/// Addresses of `keys`, in order
pub fn addresses(keys: &[TestKey]) -> Vec<Address> {
    keys.iter().map(|k| k.address).collect()
}

/// In-memory header chain
pub struct MockChain {
    by_hash: RwLock<HashMap<B256, Header>>,
    canonical: RwLock<BTreeMap<u64, Header>>,
    config: XDPoSConfig,
}

impl MockChain {
    pub fn new(config: XDPoSConfig) -> Self {
        Self {
            by_hash: RwLock::new(HashMap::new()),
            canonical: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Insert a header on the canonical chain
    pub fn insert(&self, header: Header) {
        self.by_hash.write().insert(header.hash_slow(), header.clone());
        self.canonical.write().insert(header.number, header);
    }

    /// Insert a fork header reachable by hash only
    pub fn insert_fork(&self, header: Header) {
        self.by_hash.write().insert(header.hash_slow(), header);
    }

    pub fn len(&self) -> usize {
        self.by_hash.read().len()
    }
}

impl ChainReader for MockChain {
    fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
        self.by_hash.read().get(&hash).filter(|h| h.number == number).cloned()
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.canonical.read().get(&number).cloned()
    }

    fn get_header_by_hash(&self, hash: B256) -> Option<Header> {
        self.by_hash.read().get(&hash).cloned()
    }

    fn config(&self) -> &XDPoSConfig {
        &self.config
    }
}

/// Write `signature` into the final 65 bytes of the header's extra data
pub fn apply_seal(header: &mut Header, signature: &[u8; 65]) {
    let mut extra = header.extra_data.to_vec();
    assert!(extra.len() >= EXTRA_SEAL, "header must carry a seal slot");
    let len = extra.len();
    extra[len - EXTRA_SEAL..].copy_from_slice(signature);
    header.extra_data = extra.into();
}

/// Sign the header's seal hash with `key` and seal it
pub fn seal_header(header: &mut Header, key: &TestKey) {
    let signature = sign_hash(&key.secret, &sig_hash(header)).unwrap();
    apply_seal(header, &signature);
}

/// Genesis checkpoint carrying the full signer list
pub fn make_genesis(keys: &[TestKey]) -> Header {
    let mut extra = vec![0u8; EXTRA_VANITY];
    extra.extend_from_slice(&pack_addresses(&addresses(keys)));
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    Header {
        number: 0,
        timestamp: 1_000,
        gas_limit: 8_000_000,
        extra_data: extra.into(),
        nonce: NONCE_DROP_VOTE,
        ..Default::default()
    }
}

/// The backward-distance difficulty of the v1 schedule
fn v1_difficulty(len: usize, pre: Option<usize>, cur: usize) -> u64 {
    let expected = pre.map(|p| (p + 1) % len).unwrap_or(0);
    (len - (expected + len - cur) % len) as u64
}

/// Build a signed v1 chain of `length` blocks over `keys`, rotating creators
/// so every block is sealed on-turn. Checkpoints republish the signer list
/// with identity validator assignments; blocks past the first epoch carry the
/// assigned co-validator's second seal.
pub fn build_v1_chain(
    config: &XDPoSConfig,
    keys: &[TestKey],
    length: u64,
) -> (Vec<Header>, MockChain) {
    let chain = MockChain::new(config.clone());
    let len = keys.len();

    let genesis = make_genesis(keys);
    chain.insert(genesis.clone());
    let mut headers = vec![genesis];

    for number in 1..=length {
        let parent = &headers[(number - 1) as usize];
        let cur = ((number - 1) as usize) % len;
        let pre = if number == 1 { None } else { Some(((number - 2) as usize) % len) };

        let checkpoint = number % config.epoch == 0;
        let mut extra = vec![0u8; EXTRA_VANITY];
        if checkpoint {
            extra.extend_from_slice(&pack_addresses(&addresses(keys)));
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);

        let mut header = Header {
            parent_hash: parent.hash_slow(),
            number,
            timestamp: parent.timestamp + config.period,
            gas_limit: 8_000_000,
            difficulty: U256::from(v1_difficulty(len, pre, cur)),
            nonce: NONCE_DROP_VOTE,
            extra_data: extra.into(),
            ..Default::default()
        };
        if checkpoint {
            let indices: Vec<u64> = (0..len as u64).collect();
            header.validators = encode_validator_indices(&indices).into();
        }

        let creator = &keys[cur];
        seal_header(&mut header, creator);

        if number > config.epoch {
            // Identity assignment rotated by epoch position
            let rotation = ((number % config.epoch) / len as u64) % len as u64;
            let m2 = &keys[(cur + rotation as usize) % len];
            let second = sign_hash(&m2.secret, &sig_hash(&header)).unwrap();
            header.validator = second.to_vec().into();
        }

        chain.insert(header.clone());
        headers.push(header);
    }
    (headers, chain)
}

/// Assemble a QC over `block` signed by `signers`
pub fn make_qc(block: &Header, round: Round, gap_number: u64, signers: &[TestKey]) -> QuorumCert {
    let block_info = BlockInfo::new(block.hash_slow(), round, block.number);
    let digest = vote_sig_hash(&VoteForSign {
        proposed_block_info: block_info.clone(),
        gap_number,
    });
    let mut qc = QuorumCert::new(block_info, gap_number);
    for key in signers {
        qc.add_signature(sign_hash(&key.secret, &digest).unwrap().to_vec());
    }
    qc
}

/// Build a v2 block at `round` extending `parent`, justified by `qc` and
/// sealed by the round's leader
pub fn make_v2_block(
    config: &XDPoSConfig,
    parent: &Header,
    round: Round,
    qc: &QuorumCert,
    keys: &[TestKey],
) -> Header {
    let mine_period = config.v2.as_ref().map(|v2| v2.mine_period).unwrap_or(2);
    let mut extra = encode_extra_fields_v2(round, Some(qc));
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);

    let mut header = Header {
        parent_hash: parent.hash_slow(),
        number: parent.number + 1,
        timestamp: parent.timestamp + mine_period,
        gas_limit: parent.gas_limit,
        difficulty: U256::ONE,
        nonce: NONCE_DROP_VOTE,
        extra_data: extra.into(),
        ..Default::default()
    };

    let leader = &keys[(round % keys.len() as u64) as usize];
    seal_header(&mut header, leader);
    header
}

/// A v2 chain of `rounds` blocks on top of the genesis anchor: block `i`
/// carries round `i` and a QC over its parent signed by every key.
pub fn build_v2_chain(
    config: &XDPoSConfig,
    keys: &[TestKey],
    rounds: u64,
) -> (Vec<Header>, Vec<QuorumCert>, MockChain) {
    let chain = MockChain::new(config.clone());
    let genesis = make_genesis(keys);
    chain.insert(genesis.clone());

    let mut headers = vec![genesis];
    let mut qcs = Vec::new();
    for round in 1..=rounds {
        let parent = &headers[(round - 1) as usize];
        let qc = make_qc(parent, round - 1, 0, keys);
        let block = make_v2_block(config, parent, round, &qc, keys);
        chain.insert(block.clone());
        qcs.push(qc);
        headers.push(block);
    }
    (headers, qcs, chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra_data::recover_header_signer;
    use crate::Cache;

    #[test]
    fn test_keys_are_sorted_and_distinct() {
        let keys = test_keys(5);
        let addrs = addresses(&keys);
        let mut sorted = addrs.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(addrs, sorted);
        assert_eq!(addrs.len(), 5);
    }

    #[test]
    fn test_sealed_chain_recovers_creators() {
        let config = XDPoSConfig::default().with_epoch(10).with_gap(5);
        let keys = test_keys(3);
        let (headers, _) = build_v1_chain(&config, &keys, 6);

        let cache = Cache::new(16);
        for (i, header) in headers.iter().enumerate().skip(1) {
            let creator = recover_header_signer(header, &cache).unwrap();
            assert_eq!(creator, keys[(i - 1) % 3].address);
        }
    }

    #[test]
    fn test_mock_chain_lookup() {
        let config = XDPoSConfig::default();
        let keys = test_keys(3);
        let (headers, chain) = build_v1_chain(&config, &keys, 3);

        let head = &headers[3];
        assert_eq!(chain.get_header_by_number(3).unwrap(), *head);
        assert_eq!(chain.get_header_by_hash(head.hash_slow()).unwrap(), *head);
        assert_eq!(chain.get_header(head.hash_slow(), 3).unwrap(), *head);
        assert!(chain.get_header(head.hash_slow(), 4).is_none());
    }
}
