//! End-to-end engine tests: a v1 chain sealed and verified through the
//! facade, the v1 -> v2 handover, and a full v2 round loop from proposal to
//! commit.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use xdpos_consensus::v2::types::{encode_extra_fields_v2, vote_sig_hash};
use xdpos_consensus::{
    constants::{EXTRA_SEAL, EXTRA_VANITY},
    pack_addresses, sig_hash, sign_hash, BlockInfo, ChainPolicy, ChainReader, Database, Header,
    MemoryDb, OutboundMessage, QuorumCert, Snapshot, V2Config, XDPoS, XDPoSConfig, XDPoSResult,
};

use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;

#[derive(Clone)]
struct Key {
    secret: SecretKey,
    address: Address,
}

fn keys(count: u8) -> Vec<Key> {
    let secp = Secp256k1::new();
    let mut keys: Vec<Key> = (1..=count)
        .map(|i| {
            let secret = SecretKey::from_slice(&[i; 32]).unwrap();
            let pubkey = PublicKey::from_secret_key(&secp, &secret);
            let hash = alloy_primitives::keccak256(&pubkey.serialize_uncompressed()[1..]);
            Key { secret, address: Address::from_slice(&hash[12..]) }
        })
        .collect();
    keys.sort_by_key(|k| k.address);
    keys
}

fn signer_fn(key: &Key) -> xdpos_consensus::SignerFn {
    let secret = key.secret;
    Arc::new(move |_, digest| sign_hash(&secret, &digest))
}

struct Chain {
    headers: RwLock<HashMap<B256, Header>>,
    canonical: RwLock<HashMap<u64, Header>>,
    config: XDPoSConfig,
}

impl Chain {
    fn new(config: XDPoSConfig) -> Self {
        Self {
            headers: RwLock::new(HashMap::new()),
            canonical: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn insert(&self, header: Header) {
        self.headers.write().insert(header.hash_slow(), header.clone());
        self.canonical.write().insert(header.number, header);
    }
}

impl ChainReader for Chain {
    fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
        self.headers.read().get(&hash).filter(|h| h.number == number).cloned()
    }
    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.canonical.read().get(&number).cloned()
    }
    fn get_header_by_hash(&self, hash: B256) -> Option<Header> {
        self.headers.read().get(&hash).cloned()
    }
    fn config(&self) -> &XDPoSConfig {
        &self.config
    }
}

fn seal_with(header: &mut Header, key: &Key) {
    let signature = sign_hash(&key.secret, &sig_hash(header)).unwrap();
    let mut data = header.extra_data.to_vec();
    let len = data.len();
    data[len - EXTRA_SEAL..].copy_from_slice(&signature);
    header.extra_data = data.into();
}

fn genesis_with(keys: &[Key]) -> Header {
    let mut extra = vec![0u8; EXTRA_VANITY];
    extra.extend_from_slice(&pack_addresses(
        &keys.iter().map(|k| k.address).collect::<Vec<_>>(),
    ));
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    Header {
        number: 0,
        timestamp: 1_000,
        gas_limit: 8_000_000,
        extra_data: extra.into(),
        ..Default::default()
    }
}

/// Build a v1 chain by driving prepare/seal through the facade itself
#[test]
fn v1_chain_prepared_sealed_and_verified_through_facade() {
    let config = XDPoSConfig::default();
    let keys = keys(3);
    let chain = Chain::new(config.clone());
    let genesis = genesis_with(&keys);
    chain.insert(genesis.clone());

    let db: Arc<dyn Database> = Arc::new(MemoryDb::new());
    let engines: Vec<_> = keys
        .iter()
        .map(|key| {
            let engine = XDPoS::with_default_policy(config.clone(), Arc::clone(&db));
            engine.authorize(key.address, signer_fn(key));
            engine
        })
        .collect();

    let mut parent = genesis;
    let stop = AtomicBool::new(false);
    for number in 1..=6u64 {
        // The on-turn node builds the block
        let leader = ((number - 1) % keys.len() as u64) as usize;
        let engine = &engines[leader];

        let mut header = Header {
            parent_hash: parent.hash_slow(),
            number,
            gas_limit: 8_000_000,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();
        let sealed = engine.seal(&chain, &header, &stop).unwrap().expect("on-turn seal");

        // Every node accepts it. Blocks after the first sit up to a few
        // seconds ahead of wall time, the import-time path for those.
        let full = number == 1;
        for verifier in &engines {
            verifier.verify_header(&chain, &sealed, full).unwrap();
        }
        assert_eq!(engine.author(&sealed).unwrap(), keys[leader].address);

        chain.insert(sealed.clone());
        parent = sealed;
    }
}

#[test]
fn reward_checkpoint_delegates_to_policy() {
    #[derive(Default)]
    struct CountingPolicy {
        calls: AtomicUsize,
    }
    impl ChainPolicy for CountingPolicy {
        fn reward(&self, _chain: &dyn ChainReader, _header: &Header) -> XDPoSResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let config = XDPoSConfig { reward_checkpoint: 10, ..Default::default() };
    let policy = Arc::new(CountingPolicy::default());
    let engine = XDPoS::new(config.clone(), Arc::new(MemoryDb::new()), policy.clone());
    let chain = Chain::new(config);

    for number in [5u64, 10, 15, 20] {
        let header = Header { number, ..Default::default() };
        engine.apply_reward_checkpoint(&chain, &header).unwrap();
    }
    assert_eq!(policy.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn snapshot_survives_engine_restart() {
    let config = XDPoSConfig::default().with_epoch(10).with_gap(5);
    let keys = keys(3);
    let chain = Chain::new(config.clone());
    let genesis = genesis_with(&keys);
    chain.insert(genesis.clone());

    let mut parent = genesis;
    for number in 1..=5u64 {
        let mut header = Header {
            parent_hash: parent.hash_slow(),
            number,
            timestamp: parent.timestamp + config.period,
            gas_limit: 8_000_000,
            extra_data: vec![0u8; EXTRA_VANITY + EXTRA_SEAL].into(),
            ..Default::default()
        };
        seal_with(&mut header, &keys[((number - 1) % 3) as usize]);
        chain.insert(header.clone());
        parent = header;
    }

    let db: Arc<dyn Database> = Arc::new(MemoryDb::new());
    let first = XDPoS::with_default_policy(config.clone(), Arc::clone(&db));
    let snap = first.v1().snapshot(&chain, 5, parent.hash_slow(), &[]).unwrap();

    // Block 5 is the persisted anchor for epoch 10 / gap 5
    let stored = Snapshot::load(&*db, &parent.hash_slow()).unwrap();
    assert_eq!(stored.as_ref(), Some(&snap));

    // A restarted engine resolves the anchor straight from disk
    let second = XDPoS::with_default_policy(config, db);
    let resolved = second.v1().snapshot(&chain, 5, parent.hash_slow(), &[]).unwrap();
    assert_eq!(resolved.signers, snap.signers);
}

fn qc_over(block: &Header, round: u64, gap_number: u64, keys: &[Key]) -> QuorumCert {
    let info = BlockInfo::new(block.hash_slow(), round, block.number);
    let digest =
        vote_sig_hash(&vote_payload(&info, gap_number));
    let mut qc = QuorumCert::new(info, gap_number);
    for key in keys {
        qc.add_signature(sign_hash(&key.secret, &digest).unwrap().to_vec());
    }
    qc
}

fn vote_payload(info: &BlockInfo, gap_number: u64) -> xdpos_consensus::v2::VoteForSign {
    xdpos_consensus::v2::VoteForSign { proposed_block_info: info.clone(), gap_number }
}

fn v2_block(parent: &Header, round: u64, qc: &QuorumCert, keys: &[Key]) -> Header {
    let mut extra = encode_extra_fields_v2(round, Some(qc));
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    let mut header = Header {
        parent_hash: parent.hash_slow(),
        number: parent.number + 1,
        timestamp: parent.timestamp + 2,
        gas_limit: parent.gas_limit,
        difficulty: U256::ONE,
        extra_data: extra.into(),
        ..Default::default()
    };
    seal_with(&mut header, &keys[(round % keys.len() as u64) as usize]);
    header
}

/// v1 blocks below the switch, BFT blocks above it, one facade for both
#[test]
fn v1_to_v2_handover() {
    let config = XDPoSConfig::default()
        .with_v2(V2Config::new(4).with_timeout_period_ms(60_000));
    let keys = keys(3);
    let chain = Chain::new(config.clone());
    let genesis = genesis_with(&keys);
    chain.insert(genesis.clone());

    let engine = XDPoS::with_default_policy(config.clone(), Arc::new(MemoryDb::new()));
    engine.authorize(keys[0].address, signer_fn(&keys[0]));

    // Blocks 1..=4 follow the v1 schedule
    let mut parent = genesis;
    for number in 1..=4u64 {
        let creator = &keys[((number - 1) % 3) as usize];
        let mut header = Header {
            parent_hash: parent.hash_slow(),
            number,
            timestamp: parent.timestamp + config.period,
            gas_limit: 8_000_000,
            difficulty: U256::from(3),
            extra_data: vec![0u8; EXTRA_VANITY + EXTRA_SEAL].into(),
            ..Default::default()
        };
        seal_with(&mut header, creator);
        engine.verify_header(&chain, &header, true).unwrap();
        chain.insert(header.clone());
        parent = header;
    }

    // Block 5 opens the BFT era, justified by a round-0 QC over the switch block
    assert!(!engine.is_v2_block(4));
    assert!(engine.is_v2_block(5));

    let anchor_qc = qc_over(&parent, 0, 0, &keys);
    let block5 = v2_block(&parent, 1, &anchor_qc, &keys);
    engine.verify_header(&chain, &block5, true).unwrap();
    chain.insert(block5.clone());

    let v2 = engine.v2().expect("v2 engine configured");
    let outbound = v2.handle_proposal(&chain, &block5).unwrap();
    assert!(outbound.iter().any(|m| matches!(m, OutboundMessage::Vote(_))));
    assert_eq!(v2.current_round(), 1);
}

/// Full BFT loop: proposals and votes from three simulated nodes drive the
/// chain to a three-chain commit
#[test]
fn v2_round_loop_reaches_commit() {
    let config = XDPoSConfig::default()
        .with_v2(V2Config::new(0).with_timeout_period_ms(60_000));
    let keys = keys(3);
    let chain = Chain::new(config.clone());
    let genesis = genesis_with(&keys);
    chain.insert(genesis.clone());

    // Three nodes, each with its own engine and signer
    let nodes: Vec<_> = keys
        .iter()
        .map(|key| {
            let engine = XDPoS::with_default_policy(config.clone(), Arc::new(MemoryDb::new()));
            engine.authorize(key.address, signer_fn(key));
            engine
        })
        .collect();

    let mut parent = genesis.clone();
    let mut justify = qc_over(&genesis, 0, 0, &keys);

    for round in 1..=4u64 {
        // The round's leader proposes
        let block = v2_block(&parent, round, &justify, &keys);
        chain.insert(block.clone());

        // Every node processes the proposal; collect the emitted votes
        let mut votes = Vec::new();
        for node in &nodes {
            let outbound = node.v2().unwrap().handle_proposal(&chain, &block).unwrap();
            for message in outbound {
                if let OutboundMessage::Vote(vote) = message {
                    votes.push(vote);
                }
            }
        }
        assert_eq!(votes.len(), nodes.len(), "round {round}: every node votes");

        // Votes reach every node; the threshold crossing assembles the QC
        for node in &nodes {
            for vote in &votes {
                node.v2().unwrap().handle_vote(&chain, vote.clone()).unwrap();
            }
        }

        let qc = nodes[0].v2().unwrap().highest_qc().expect("QC assembled");
        assert_eq!(qc.round(), round);
        justify = qc;
        parent = block;
    }

    // Rounds 1..=4 certified: the round-2 block is committed everywhere
    for node in &nodes {
        let commit = node.v2().unwrap().highest_commit_block().expect("commit reached");
        assert_eq!(commit.round, 2);
        assert_eq!(commit.number, 2);
    }
}
