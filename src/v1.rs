//! XDPoS V1 engine: round-robin sealing with double validation.
//!
//! Headers are verified against the epoch's masternode schedule: the creator
//! seals into `extra_data`, the assigned co-validator counter-signs into the
//! `validator` field, and checkpoint headers re-publish the authorized signer
//! set. Snapshots reconstruct the voting state by replaying headers from the
//! nearest anchor.

use crate::{
    cache::Cache,
    config::XDPoSConfig,
    constants::{
        BLOCK_SIGNERS_CACHE_LIMIT, EXTRA_SEAL, EXTRA_VANITY, INMEMORY_SIGNATURES,
        INMEMORY_SNAPSHOTS, LIMIT_PENALTY_EPOCH, RECENT_SIGNER_LIMIT,
    },
    errors::{XDPoSError, XDPoSResult},
    extra_data::{
        pack_addresses, parse_packed_addresses, recover_header_signer, recover_header_validator,
        sig_hash,
    },
    masternodes::{get_m1m2, get_masternodes, remove_penalized, remove_penalties_from_block},
    primitives::{Header, EMPTY_UNCLE_HASH, NONCE_AUTH_VOTE, NONCE_DROP_VOTE},
    snapshot::Snapshot,
    traits::{ChainPolicy, ChainReader, Database, SignerFn},
    unix_now,
};
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Leader-turn bookkeeping returned by [`EngineV1::your_turn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnInfo {
    /// Size of the masternode set
    pub masternode_count: usize,
    /// Position of the parent's creator, `None` below block 1
    pub pre_index: Option<usize>,
    /// Position of the candidate signer, `None` if not a masternode
    pub cur_index: Option<usize>,
    /// Whether the candidate leads the next block
    pub is_your_turn: bool,
}

/// XDPoS V1 engine
pub struct EngineV1 {
    config: XDPoSConfig,
    db: Arc<dyn Database>,
    policy: Arc<dyn ChainPolicy>,

    /// Recent snapshots to speed up reorgs
    recents: Cache<B256, Snapshot>,
    /// Seal recoveries of recent blocks
    signatures: Cache<B256, Address>,
    /// Second-seal recoveries of recent blocks
    validator_signatures: Cache<B256, Address>,
    /// Headers that already passed full verification
    verified_headers: Cache<B256, ()>,

    /// Current list of governance proposals we are pushing
    proposals: RwLock<HashMap<Address, bool>>,
    signer: RwLock<Option<(Address, SignerFn)>>,
}

impl EngineV1 {
    /// Create a V1 engine
    pub fn new(config: XDPoSConfig, db: Arc<dyn Database>, policy: Arc<dyn ChainPolicy>) -> Self {
        Self {
            config,
            db,
            policy,
            recents: Cache::new(INMEMORY_SNAPSHOTS),
            signatures: Cache::new(INMEMORY_SIGNATURES),
            validator_signatures: Cache::new(INMEMORY_SIGNATURES),
            verified_headers: Cache::new(BLOCK_SIGNERS_CACHE_LIMIT),
            proposals: RwLock::new(HashMap::new()),
            signer: RwLock::new(None),
        }
    }

    /// Inject the local signing identity
    pub fn authorize(&self, address: Address, sign_fn: SignerFn) {
        *self.signer.write() = Some((address, sign_fn));
    }

    /// Local signer address, if authorized
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.read().as_ref().map(|(address, _)| *address)
    }

    /// The injected policy bundle
    pub fn policy(&self) -> &Arc<dyn ChainPolicy> {
        &self.policy
    }

    /// Push a governance proposal to authorize or drop `address`
    pub fn propose(&self, address: Address, authorize: bool) {
        self.proposals.write().insert(address, authorize);
    }

    /// Withdraw a governance proposal
    pub fn discard(&self, address: Address) {
        self.proposals.write().remove(&address);
    }

    /// Address recovered from the seal in the header's extra data
    pub fn author(&self, header: &Header) -> XDPoSResult<Address> {
        recover_header_signer(header, &self.signatures)
    }

    /// Address recovered from the second seal in `header.validator`
    pub fn recover_validator(&self, header: &Header) -> XDPoSResult<Address> {
        recover_header_validator(header, &self.validator_signatures)
    }

    // --- verification ---------------------------------------------------

    /// Verify a single header against the consensus rules
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        full_verify: bool,
    ) -> XDPoSResult<()> {
        self.verify_header_with_parents(chain, header, &[], full_verify)
    }

    /// Verify an ascending batch, treating earlier entries as presumed parents
    pub fn verify_headers(
        &self,
        chain: &dyn ChainReader,
        headers: &[Header],
        full_verify: bool,
    ) -> Vec<XDPoSResult<()>> {
        headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                self.verify_header_with_parents(chain, header, &headers[..i], full_verify)
            })
            .collect()
    }

    fn verify_header_with_parents(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
        full_verify: bool,
    ) -> XDPoSResult<()> {
        let hash = header.hash_slow();
        if self.verified_headers.contains(&hash) {
            return Ok(());
        }
        self.verify_header_inner(chain, header, parents, full_verify)?;
        self.verified_headers.put(hash, ());
        Ok(())
    }

    fn verify_header_inner(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
        full_verify: bool,
    ) -> XDPoSResult<()> {
        let number = header.number;

        if full_verify {
            // Double validation starts from the second epoch
            if number > self.config.epoch && header.validator.is_empty() {
                return Err(XDPoSError::FailValidatorSignature);
            }
            if header.timestamp > unix_now() {
                return Err(XDPoSError::FutureBlock);
            }
        }

        let checkpoint = number % self.config.epoch == 0;
        if checkpoint && header.beneficiary != Address::ZERO {
            return Err(XDPoSError::InvalidCheckpointBeneficiary);
        }

        // Nonces encode votes: 0x00..0 or 0xff..f, zeroes on checkpoints
        if header.nonce != NONCE_AUTH_VOTE && header.nonce != NONCE_DROP_VOTE {
            return Err(XDPoSError::InvalidVote);
        }
        if checkpoint && header.nonce != NONCE_DROP_VOTE {
            return Err(XDPoSError::InvalidCheckpointVote);
        }

        if header.extra_data.len() < EXTRA_VANITY {
            return Err(XDPoSError::MissingVanity);
        }
        if header.extra_data.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(XDPoSError::MissingSignature);
        }
        let signers_bytes = header.extra_data.len() - EXTRA_VANITY - EXTRA_SEAL;
        if !checkpoint && signers_bytes != 0 {
            return Err(XDPoSError::ExtraSigners);
        }
        if checkpoint && signers_bytes % 20 != 0 {
            return Err(XDPoSError::InvalidCheckpointSigners);
        }

        if header.mix_hash != B256::ZERO {
            return Err(XDPoSError::InvalidMixDigest);
        }
        if header.ommers_hash != EMPTY_UNCLE_HASH {
            return Err(XDPoSError::InvalidUncleHash);
        }

        self.verify_cascading_fields(chain, header, parents, full_verify)
    }

    fn verify_cascading_fields(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
        full_verify: bool,
    ) -> XDPoSResult<()> {
        let number = header.number;
        // The genesis block is the always valid dead-end
        if number == 0 {
            return Ok(());
        }

        let parent = self.resolve_parent(chain, header, parents)?;
        if parent.timestamp + self.config.period > header.timestamp {
            return Err(XDPoSError::InvalidTimestamp);
        }

        if number % self.config.epoch != 0 {
            return self.verify_seal(chain, header, parents, full_verify);
        }

        // Snapshots occasionally disagree with the published checkpoint list;
        // the contract is the tie-breaker until that path is retired
        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;
        let snapshot_err =
            match self.check_signers_on_checkpoint(chain, header, snap.get_signers()) {
                Ok(()) => return self.verify_seal(chain, header, parents, full_verify),
                Err(err) => err,
            };

        let contract_signers = match self.signers_from_contract(chain, header) {
            Ok(signers) => signers,
            Err(_) => return Err(snapshot_err),
        };
        self.check_signers_on_checkpoint(chain, header, contract_signers)?;
        self.verify_seal(chain, header, parents, full_verify)
    }

    fn resolve_parent(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> XDPoSResult<Header> {
        let number = header.number;
        let parent = match parents.last() {
            Some(parent) => parent.clone(),
            None => chain
                .get_header(header.parent_hash, number - 1)
                .ok_or(XDPoSError::UnknownAncestor)?,
        };
        if parent.number != number - 1 || parent.hash_slow() != header.parent_hash {
            return Err(XDPoSError::UnknownAncestor);
        }
        Ok(parent)
    }

    fn check_signers_on_checkpoint(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        signers: Vec<Address>,
    ) -> XDPoSResult<()> {
        let number = header.number;

        let penalties = self.policy.penalties_signing(chain, header, &signers)?;
        if header.penalties.as_ref() != pack_addresses(&penalties).as_slice() {
            return Err(XDPoSError::InvalidCheckpointPenalties);
        }

        let mut signers = remove_penalized(signers, &penalties);
        for i in 1..=LIMIT_PENALTY_EPOCH {
            if number > i * self.config.epoch {
                signers =
                    remove_penalties_from_block(chain, signers, number - i * self.config.epoch);
            }
        }

        let extra = &header.extra_data;
        let published =
            parse_packed_addresses(&extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL])
                .ok_or(XDPoSError::InvalidCheckpointSigners)?;

        let mut expected = signers.clone();
        let mut actual = published;
        expected.sort();
        actual.sort();
        if expected != actual {
            tracing::error!(
                number,
                ?actual,
                ?expected,
                "masternode lists differ between checkpoint header and snapshot"
            );
            return Err(XDPoSError::InvalidCheckpointSigners);
        }

        self.policy.verify_masternodes(header, &signers)
    }

    fn signers_from_contract(
        &self,
        chain: &dyn ChainReader,
        checkpoint: &Header,
    ) -> XDPoSResult<Vec<Address>> {
        // The contract set is anchored `gap` blocks before the checkpoint
        let mut anchor = checkpoint.clone();
        let number = checkpoint.number;
        for step in 1..=self.config.gap {
            anchor = chain
                .get_header(anchor.parent_hash, number - step)
                .ok_or(XDPoSError::UnknownAncestor)?;
        }
        self.policy.signers_from_contract(anchor.hash_slow())
    }

    /// Verify the seal, the difficulty schedule, the recency rule and the
    /// creator/validator pairing of double validation.
    pub fn verify_seal(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
        full_verify: bool,
    ) -> XDPoSResult<()> {
        let number = header.number;
        // Verifying the genesis block is not supported
        if number == 0 {
            return Err(XDPoSError::UnknownBlock);
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;
        let creator = self.author(header)?;

        let parent = self.resolve_parent(chain, header, parents)?;
        let difficulty = self.calc_difficulty_for(chain, &parent, creator)?;
        if header.difficulty != U256::from(difficulty) {
            return Err(XDPoSError::InvalidDifficulty);
        }

        let masternodes = self.masternodes(chain, header);
        if !snap.is_signer(&creator) && !masternodes.contains(&creator) {
            tracing::debug!(number, ?creator, "unauthorized creator");
            return Err(XDPoSError::Unauthorized);
        }

        // No masternode seals twice in a row, except across epoch boundaries
        if masternodes.len() > 1 {
            for (seen, recent) in &snap.recents {
                if *recent == creator
                    && *seen > number.saturating_sub(RECENT_SIGNER_LIMIT)
                    && number % self.config.epoch != 0
                {
                    return Err(XDPoSError::Unauthorized);
                }
            }
        }

        // Double validation from the second epoch onward
        if number > self.config.epoch && full_verify {
            let validator = self.recover_validator(header)?;
            let assigned = self.get_validator(creator, chain, header)?;
            if validator != assigned {
                tracing::debug!(
                    ?creator,
                    ?assigned,
                    wrong = ?validator,
                    "header contains wrong pair of creator-validator"
                );
                return Err(XDPoSError::FailedDoubleValidation);
            }
        }
        Ok(())
    }

    /// The co-validator assigned to `creator` for the epoch of `header`
    pub fn get_validator(
        &self,
        creator: Address,
        chain: &dyn ChainReader,
        header: &Header,
    ) -> XDPoSResult<Address> {
        let epoch = self.config.epoch;
        let number = header.number;
        let checkpoint_block =
            if number % epoch == 0 { number } else { number - (number % epoch) };
        if checkpoint_block == 0 {
            return Ok(Address::ZERO);
        }

        let checkpoint = match chain.get_header_by_number(checkpoint_block) {
            Some(checkpoint) => checkpoint,
            None if number % epoch == 0 => header.clone(),
            None => return Err(XDPoSError::UnknownAncestor),
        };
        let m1m2 = get_m1m2(&checkpoint, header, epoch)?;
        Ok(m1m2.get(&creator).copied().unwrap_or(Address::ZERO))
    }

    // --- snapshots ------------------------------------------------------

    /// The authorization snapshot at `(number, hash)`, walking parents back
    /// to an in-memory, persisted or genesis anchor and replaying forward.
    pub fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: B256,
        parents: &[Header],
    ) -> XDPoSResult<Snapshot> {
        let mut headers: Vec<Header> = Vec::new();
        let mut parents = parents.to_vec();
        let mut number = number;
        let mut hash = hash;

        let snap = loop {
            if let Some(snap) = self.recents.get(&hash) {
                break snap;
            }
            // Persisted snapshots sit `gap` blocks before each checkpoint
            if (number + self.config.gap) % self.config.epoch == 0 {
                if let Some(snap) = Snapshot::load(&*self.db, &hash)? {
                    tracing::trace!(number, %hash, "loaded voting snapshot from disk");
                    break snap;
                }
            }
            if number == 0 {
                let genesis =
                    chain.get_header_by_number(0).ok_or(XDPoSError::UnknownBlock)?;
                let snap = Snapshot::from_genesis(&genesis)?;
                snap.store(&*self.db)?;
                tracing::trace!("stored genesis voting snapshot to disk");
                break snap;
            }
            // No snapshot for this header, gather it and move backward
            let header = match parents.pop() {
                Some(header) => {
                    if header.hash_slow() != hash || header.number != number {
                        return Err(XDPoSError::UnknownAncestor);
                    }
                    header
                }
                None => {
                    chain.get_header(hash, number).ok_or(XDPoSError::UnknownAncestor)?
                }
            };
            number -= 1;
            hash = header.parent_hash;
            headers.push(header);
        };

        headers.reverse();
        let snap = snap.apply(&headers, &self.config, &self.signatures)?;
        self.recents.put(snap.hash, snap.clone());

        if (snap.number + self.config.gap) % self.config.epoch == 0 && !headers.is_empty() {
            snap.store(&*self.db)?;
            tracing::trace!(number = snap.number, hash = %snap.hash, "stored voting snapshot to disk");
        }
        Ok(snap)
    }

    /// Whether `address` may sign at the block of `header`
    pub fn is_authorized(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        address: &Address,
    ) -> bool {
        self.snapshot(chain, header.number, header.hash_slow(), &[])
            .map(|snap| snap.is_signer(address))
            .unwrap_or(false)
    }

    // --- leader schedule ------------------------------------------------

    /// Masternode list for `header`, honoring the deployment override
    pub fn masternodes(&self, chain: &dyn ChainReader, header: &Header) -> Vec<Address> {
        if let Some(masternodes) = &self.config.masternode_override {
            return masternodes.clone();
        }
        get_masternodes(chain, header, self.config.epoch)
    }

    /// Whether `signer` leads the block after `parent`
    pub fn your_turn(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: &Address,
    ) -> XDPoSResult<TurnInfo> {
        let masternodes = self.masternodes(chain, parent);
        if masternodes.is_empty() {
            return Err(XDPoSError::MasternodesNotFound);
        }

        // masternodes[0] has the chance to create block 1
        let pre_index = if parent.number != 0 {
            let creator = self.author(parent)?;
            masternodes.iter().position(|m| *m == creator)
        } else {
            None
        };
        let cur_index = masternodes.iter().position(|m| m == signer);

        let next = pre_index.map(|p| (p + 1) % masternodes.len()).unwrap_or(0);
        let is_your_turn = cur_index == Some(next);

        Ok(TurnInfo { masternode_count: masternodes.len(), pre_index, cur_index, is_your_turn })
    }

    /// Difficulty the next block should carry if sealed by the local signer
    pub fn calc_difficulty(&self, chain: &dyn ChainReader, parent: &Header) -> XDPoSResult<u64> {
        let signer = self.signer_address().ok_or(XDPoSError::SignerNotAuthorized)?;
        self.calc_difficulty_for(chain, parent, signer)
    }

    /// Leader-turn score: the set size minus the backward distance from the
    /// expected leader to the candidate. The on-turn signer scores highest.
    pub fn calc_difficulty_for(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        signer: Address,
    ) -> XDPoSResult<u64> {
        let turn = self.your_turn(chain, parent, &signer)?;
        let len = turn.masternode_count;
        let Some(cur) = turn.cur_index else {
            // Outsiders score below every masternode
            return Ok(0);
        };
        Ok((len - hop(len, turn.pre_index, cur)) as u64)
    }

    // --- block production -----------------------------------------------

    /// Fill in the consensus fields of a header under construction
    pub fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> XDPoSResult<()> {
        let signer = self.signer_address().ok_or(XDPoSError::SignerNotAuthorized)?;
        let number = header.number;

        header.beneficiary = Address::ZERO;
        header.nonce = NONCE_DROP_VOTE;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;

        if number % self.config.epoch != 0 {
            // Cast a vote on a pending proposal, if any applies
            let proposals = self.proposals.read();
            let candidates: Vec<(Address, bool)> = proposals
                .iter()
                .filter(|(address, authorize)| snap.valid_vote(address, **authorize))
                .map(|(address, authorize)| (*address, *authorize))
                .collect();
            if !candidates.is_empty() {
                let (address, authorize) =
                    candidates[rand::thread_rng().gen_range(0..candidates.len())];
                header.beneficiary = address;
                header.nonce = if authorize { NONCE_AUTH_VOTE } else { NONCE_DROP_VOTE };
            }
        }

        let parent = chain
            .get_header(header.parent_hash, number - 1)
            .ok_or(XDPoSError::UnknownAncestor)?;
        header.difficulty = U256::from(self.calc_difficulty_for(chain, &parent, signer)?);

        // Reassemble the extra data: vanity, then the checkpoint signer list
        let mut extra = header.extra_data.to_vec();
        extra.resize(EXTRA_VANITY, 0);

        if number >= self.config.epoch && number % self.config.epoch == 0 {
            let mut masternodes = snap.get_signers();
            let penalties = self.policy.penalties_signing(chain, header, &masternodes)?;
            if !penalties.is_empty() {
                masternodes = remove_penalized(masternodes, &penalties);
                header.penalties = pack_addresses(&penalties).into();
            }
            for i in 1..=LIMIT_PENALTY_EPOCH {
                if number > i * self.config.epoch {
                    masternodes = remove_penalties_from_block(
                        chain,
                        masternodes,
                        number - i * self.config.epoch,
                    );
                }
            }
            extra.extend_from_slice(&pack_addresses(&masternodes));
            header.validators = self.policy.validator_bytes(header, &masternodes)?.into();
        }

        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra_data = extra.into();
        header.mix_hash = B256::ZERO;

        header.timestamp = (parent.timestamp + self.config.period).max(unix_now());
        Ok(())
    }

    /// Seal a prepared header with the local key.
    ///
    /// Returns `Ok(None)` without error when sealing is cancelled via `stop`
    /// or the signer is recency-barred and must wait its turn.
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        stop: &AtomicBool,
    ) -> XDPoSResult<Option<Header>> {
        let number = header.number;
        // Sealing the genesis block is not supported
        if number == 0 {
            return Err(XDPoSError::UnknownBlock);
        }

        let (signer, sign_fn) =
            self.signer.read().clone().ok_or(XDPoSError::SignerNotAuthorized)?;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;
        let masternodes = self.masternodes(chain, header);
        if !snap.is_signer(&signer) && !masternodes.contains(&signer) {
            return Err(XDPoSError::Unauthorized);
        }

        // Recently signed: step aside for this block
        if masternodes.len() > 1 {
            for (seen, recent) in &snap.recents {
                if *recent == signer
                    && (number < RECENT_SIGNER_LIMIT
                        || *seen > number - RECENT_SIGNER_LIMIT)
                    && number % self.config.epoch != 0
                {
                    tracing::info!(number, seen, "signed recently, must wait for others");
                    return Ok(None);
                }
            }
        }
        if stop.load(Ordering::Relaxed) {
            return Ok(None);
        }

        // Sign all the things
        let signature = sign_fn(signer, sig_hash(header))?;
        let mut sealed = header.clone();
        let mut extra = sealed.extra_data.to_vec();
        if extra.len() < EXTRA_SEAL {
            return Err(XDPoSError::MissingSignature);
        }
        let len = extra.len();
        extra[len - EXTRA_SEAL..].copy_from_slice(&signature);
        sealed.extra_data = extra.into();

        // A signer that is its own co-validator seals both slots
        let m2 = self.get_validator(signer, chain, &sealed)?;
        if m2 == signer {
            sealed.validator = signature.to_vec().into();
        }
        Ok(Some(sealed))
    }
}

/// Backward distance from the expected next leader to `cur`, modulo the set
/// size. Zero for the on-turn signer.
fn hop(len: usize, pre: Option<usize>, cur: usize) -> usize {
    let expected = pre.map(|p| (p + 1) % len).unwrap_or(0);
    (expected + len - cur) % len
}

impl std::fmt::Debug for EngineV1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineV1")
            .field("config", &self.config)
            .field("signer", &self.signer_address())
            .finish()
    }
}
