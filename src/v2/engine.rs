//! XDPoS V2 BFT round state machine.
//!
//! One exclusive lock serializes every state transition: proposals, votes,
//! timeouts, certificates and timer expiries all funnel through it. Chain
//! reads happen before the lock is taken. The countdown timer never mutates
//! engine state directly; it posts onto an internal queue the driver drains
//! through [`EngineV2::drain_timer`].

use crate::{
    config::{V2Config, XDPoSConfig},
    constants::V2_DIFFICULTY,
    countdown::CountdownTimer,
    errors::{XDPoSError, XDPoSResult},
    extra_data::{extract_seal, sig_hash},
    forkchoice::ForkChoice,
    masternodes::{checkpoint_number, filter_penalized_masternodes, masternodes_from_checkpoint_header},
    primitives::Header,
    traits::{ChainPolicy, ChainReader, Database, SignerFn},
    v2::{
        pool::MessagePool,
        proposer::select_proposer,
        types::{decode_extra_fields_v2, encode_extra_fields_v2, timeout_sig_hash, vote_sig_hash},
        verification::{verify_qc, verify_tc, verify_timeout, verify_vote},
        BlockInfo, EpochSwitchInfo, ExtraFieldsV2, Forensics, QuorumCert, Round, SyncInfo,
        Timeout, TimeoutCert, TimeoutForSign, Vote, VoteForSign,
    },
};
use alloy_primitives::{Address, B256, U256};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

/// Message the engine asks the node to broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Vote(Vote),
    Timeout(Timeout),
    SyncInfo(SyncInfo),
}

/// Mutable round state, guarded by the single engine lock
#[derive(Debug)]
struct RoundState {
    current_round: Round,
    highest_qc: Option<QuorumCert>,
    lock_qc: Option<QuorumCert>,
    highest_tc: Option<TimeoutCert>,
    highest_voted_round: Round,
    highest_commit_block: Option<BlockInfo>,
    vote_pool: MessagePool<Vote>,
    timeout_pool: MessagePool<Timeout>,
}

impl RoundState {
    fn new(threshold: usize) -> Self {
        Self {
            current_round: 0,
            highest_qc: None,
            lock_qc: None,
            highest_tc: None,
            highest_voted_round: 0,
            highest_commit_block: None,
            vote_pool: MessagePool::new(threshold),
            timeout_pool: MessagePool::new(threshold),
        }
    }
}

/// XDPoS V2 BFT engine
pub struct EngineV2 {
    config: XDPoSConfig,
    v2_config: V2Config,
    db: Arc<dyn Database>,
    policy: Arc<dyn ChainPolicy>,
    state: RwLock<RoundState>,
    timer: CountdownTimer,
    timer_rx: Mutex<mpsc::Receiver<Instant>>,
    signer: RwLock<Option<(Address, SignerFn)>>,
    forensics: Mutex<Forensics>,
    fork_choice: Mutex<ForkChoice>,
}

impl EngineV2 {
    /// Create a new V2 engine. The countdown starts unarmed; the first
    /// processed certificate or an explicit [`Self::start_timer`] arms it.
    pub fn new(config: XDPoSConfig, db: Arc<dyn Database>, policy: Arc<dyn ChainPolicy>) -> Arc<Self> {
        let v2_config = config.v2.clone().unwrap_or_default();
        let timer = CountdownTimer::new(Duration::from_millis(v2_config.timeout_period_ms));
        let (tx, rx) = mpsc::channel();
        timer.set_on_timeout(Arc::new(move |fired_at| {
            let _ = tx.send(fired_at);
        }));

        let default_threshold = v2_config.cert_threshold_count(1);
        Arc::new(Self {
            config,
            v2_config,
            db,
            policy,
            state: RwLock::new(RoundState::new(default_threshold)),
            timer,
            timer_rx: Mutex::new(rx),
            signer: RwLock::new(None),
            forensics: Mutex::new(Forensics::new()),
            fork_choice: Mutex::new(ForkChoice::new()),
        })
    }

    /// Inject the local signing identity
    pub fn authorize(&self, address: Address, sign_fn: SignerFn) {
        *self.signer.write() = Some((address, sign_fn));
    }

    /// Local signer address, if authorized
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.read().as_ref().map(|(address, _)| *address)
    }

    /// Arm the round timeout
    pub fn start_timer(&self) {
        self.timer.reset();
    }

    /// Stop the round timeout
    pub fn stop_timer(&self) {
        self.timer.stop();
    }

    // --- state accessors ------------------------------------------------

    pub fn current_round(&self) -> Round {
        self.state.read().current_round
    }

    pub fn highest_qc(&self) -> Option<QuorumCert> {
        self.state.read().highest_qc.clone()
    }

    pub fn lock_qc(&self) -> Option<QuorumCert> {
        self.state.read().lock_qc.clone()
    }

    pub fn highest_tc(&self) -> Option<TimeoutCert> {
        self.state.read().highest_tc.clone()
    }

    pub fn highest_voted_round(&self) -> Round {
        self.state.read().highest_voted_round
    }

    pub fn highest_commit_block(&self) -> Option<BlockInfo> {
        self.state.read().highest_commit_block.clone()
    }

    /// Set the current round directly. Testing and recovery support.
    pub fn set_current_round(&self, round: Round) {
        let mut state = self.state.write();
        self.set_new_round(&mut state, round);
    }

    /// Raise the highest known QC. Lower-round certificates are ignored.
    pub fn set_highest_qc(&self, qc: QuorumCert) {
        let mut state = self.state.write();
        if state.highest_qc.as_ref().is_none_or(|h| qc.round() > h.round()) {
            self.fork_choice.lock().record_qc(qc.proposed_block_info.hash, qc.round());
            state.highest_qc = Some(qc);
        }
    }

    /// Vote pool size for the message's key
    pub fn vote_pool_size(&self, vote: &Vote) -> usize {
        self.state.read().vote_pool.size(vote)
    }

    /// Timeout pool size for the message's key
    pub fn timeout_pool_size(&self, timeout: &Timeout) -> usize {
        self.state.read().timeout_pool.size(timeout)
    }

    /// Live vote pool keys, for diagnostics
    pub fn vote_pool_keys(&self) -> Vec<String> {
        self.state.read().vote_pool.keys()
    }

    /// Live timeout pool keys, for diagnostics
    pub fn timeout_pool_keys(&self) -> Vec<String> {
        self.state.read().timeout_pool.keys()
    }

    /// Prune both pools against the current round
    pub fn hygiene(&self) {
        let mut state = self.state.write();
        let round = state.current_round;
        state.vote_pool.hygiene(round);
        state.timeout_pool.hygiene(round);
    }

    /// Accumulated forensics evidence
    pub fn forensics_evidence(&self) -> Vec<crate::v2::EquivocationEvidence> {
        self.forensics.lock().evidence().to_vec()
    }

    /// Preferred tip among `candidates` per the QC-anchored fork choice
    pub fn select_tip(&self, chain: &dyn ChainReader, candidates: &[Header]) -> Option<Header> {
        let commit = self
            .highest_commit_block()
            .map(|info| (info.hash, info.number));
        self.fork_choice.lock().select_tip(chain, commit, candidates)
    }

    // --- epoch helpers --------------------------------------------------

    /// Masternode set governing the epoch of block `number`
    pub fn epoch_masternodes(
        &self,
        chain: &dyn ChainReader,
        number: u64,
    ) -> XDPoSResult<Vec<Address>> {
        let checkpoint_block = checkpoint_number(number, self.config.epoch);
        let checkpoint = chain
            .get_header_by_number(checkpoint_block)
            .ok_or(XDPoSError::UnknownAncestor)?;
        let raw = masternodes_from_checkpoint_header(&checkpoint);
        if raw.is_empty() {
            return Err(XDPoSError::MasternodesNotFound);
        }
        let boundary_penalties =
            crate::extra_data::parse_packed_addresses(&checkpoint.penalties).unwrap_or_default();
        let active = filter_penalized_masternodes(
            chain,
            raw,
            checkpoint_block,
            self.config.epoch,
            &boundary_penalties,
        );
        if active.is_empty() {
            return Err(XDPoSError::MasternodesNotFound);
        }
        Ok(active)
    }

    /// Gap number anchoring the epoch of block `number`
    pub fn gap_number_for(&self, number: u64) -> u64 {
        crate::calculate_gap_number(checkpoint_number(number, self.config.epoch), self.config.gap)
    }

    /// Certificate threshold over the epoch of block `number`
    pub fn cert_threshold(&self, chain: &dyn ChainReader, number: u64) -> XDPoSResult<usize> {
        let masternodes = self.epoch_masternodes(chain, number)?;
        Ok(self.v2_config.cert_threshold_count(masternodes.len()))
    }

    /// Epoch boundary information for the block at `hash`: the governing
    /// checkpoint, its active masternode list and its recorded penalties.
    pub fn epoch_switch_info(
        &self,
        chain: &dyn ChainReader,
        hash: B256,
    ) -> XDPoSResult<EpochSwitchInfo> {
        let header = chain.get_header_by_hash(hash).ok_or(XDPoSError::UnknownBlock)?;
        let checkpoint_block = checkpoint_number(header.number, self.config.epoch);
        let checkpoint = chain
            .get_header_by_number(checkpoint_block)
            .ok_or(XDPoSError::UnknownAncestor)?;

        let masternodes = self.epoch_masternodes(chain, header.number)?;
        let penalties =
            crate::extra_data::parse_packed_addresses(&checkpoint.penalties).unwrap_or_default();
        let round = self.header_round(&checkpoint);

        Ok(EpochSwitchInfo {
            masternodes,
            epoch_switch_block_info: BlockInfo::new(
                checkpoint.hash_slow(),
                round,
                checkpoint.number,
            ),
            penalties,
        })
    }

    /// Masternodes of the epoch the engine currently operates in, anchored at
    /// the highest certified block (the switch block before any certificate).
    fn current_epoch_masternodes(&self, chain: &dyn ChainReader) -> XDPoSResult<Vec<Address>> {
        let anchor = self
            .state
            .read()
            .highest_qc
            .as_ref()
            .map(|qc| qc.proposed_block_info.number)
            .unwrap_or_else(|| self.v2_config.switch_block);
        self.epoch_masternodes(chain, anchor)
    }

    // --- message handlers -----------------------------------------------

    /// Process an incoming proposal header.
    ///
    /// Validates the carried certificate, runs `process_qc`, then applies the
    /// voting rule. Returns the messages to broadcast.
    pub fn handle_proposal(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
    ) -> XDPoSResult<Vec<OutboundMessage>> {
        let fields = self.decode_header_fields(header)?;
        let block_round = fields.round;
        let qc = fields.quorum_cert.ok_or(XDPoSError::MissingQC)?;

        // Certificates speak about the parent's epoch
        let masternodes = self.epoch_masternodes(chain, qc.proposed_block_info.number)?;
        let threshold = self.v2_config.cert_threshold_count(masternodes.len());
        verify_qc(&qc, &masternodes, threshold)?;

        let mut outbound = Vec::new();
        let mut state = self.state.write();
        self.process_qc_locked(chain, &mut state, &qc)?;

        // Voting rule: right round, extends the locked block (or carries a
        // fresher justification), and we have not voted this high before
        if block_round == state.current_round && block_round > state.highest_voted_round {
            let extends_lock = match &state.lock_qc {
                None => true,
                Some(lock) => {
                    header.parent_hash == lock.proposed_block_info.hash
                        || qc.round() > lock.round()
                }
            };
            if extends_lock {
                if let Some(vote) = self.sign_vote(header, block_round)? {
                    state.highest_voted_round = block_round;
                    outbound.push(OutboundMessage::Vote(vote));
                }
            }
        }

        Ok(outbound)
    }

    /// Process an incoming vote message
    pub fn handle_vote(
        &self,
        chain: &dyn ChainReader,
        mut vote: Vote,
    ) -> XDPoSResult<Vec<OutboundMessage>> {
        let block_number = vote.proposed_block_info.number;
        let expected_gap = self.gap_number_for(block_number);
        if vote.gap_number != expected_gap {
            return Err(XDPoSError::GapNumberMismatch {
                message: vote.gap_number,
                local: expected_gap,
            });
        }

        let masternodes = self.epoch_masternodes(chain, block_number)?;
        verify_vote(&mut vote, &masternodes)?;
        let threshold = self.v2_config.cert_threshold_count(masternodes.len());

        let mut state = self.state.write();
        state.vote_pool.set_threshold(threshold);
        let (_count, crossing) = state.vote_pool.add(vote.clone());

        if let Some(votes) = crossing {
            let mut qc = QuorumCert::new(vote.proposed_block_info.clone(), vote.gap_number);
            for pooled in &votes {
                qc.add_signature(pooled.signature.clone());
            }
            tracing::debug!(
                round = qc.round(),
                signatures = qc.signature_count(),
                "vote pool reached threshold, certificate assembled"
            );

            // Cross-check the rest of the pool against the certified block
            let round_prefix = format!("{}:", qc.round());
            let stray_votes: Vec<Vote> = state
                .vote_pool
                .keys()
                .into_iter()
                .filter(|key| key.starts_with(&round_prefix))
                .flat_map(|key| state.vote_pool.messages_for_key(&key))
                .collect();
            self.forensics.lock().observe_finalized_votes(&qc, &stray_votes, &*self.db);

            self.process_qc_locked(chain, &mut state, &qc)?;
        }
        Ok(Vec::new())
    }

    /// Process an incoming timeout message
    pub fn handle_timeout(
        &self,
        chain: &dyn ChainReader,
        mut timeout: Timeout,
    ) -> XDPoSResult<Vec<OutboundMessage>> {
        let masternodes = self.current_epoch_masternodes(chain)?;
        verify_timeout(&mut timeout, &masternodes)?;
        let threshold = self.v2_config.cert_threshold_count(masternodes.len());

        let mut state = self.state.write();
        state.timeout_pool.set_threshold(threshold);
        let (_count, crossing) = state.timeout_pool.add(timeout.clone());

        if let Some(timeouts) = crossing {
            let mut tc = TimeoutCert::new(timeout.round, timeout.gap_number);
            for pooled in &timeouts {
                tc.add_signature(pooled.signature.clone());
            }
            tracing::debug!(round = tc.round, "timeout pool reached threshold");
            self.process_tc_locked(&mut state, &tc);
        }
        Ok(Vec::new())
    }

    /// Process a SyncInfo envelope: both certificates flow through the usual
    /// paths.
    pub fn handle_sync_info(
        &self,
        chain: &dyn ChainReader,
        sync_info: &SyncInfo,
    ) -> XDPoSResult<Vec<OutboundMessage>> {
        let qc = &sync_info.highest_quorum_cert;
        let masternodes = self.epoch_masternodes(chain, qc.proposed_block_info.number)?;
        let threshold = self.v2_config.cert_threshold_count(masternodes.len());
        verify_qc(qc, &masternodes, threshold)?;

        let mut state = self.state.write();
        self.process_qc_locked(chain, &mut state, qc)?;
        if let Some(tc) = &sync_info.highest_timeout_cert {
            verify_tc(tc, &masternodes, threshold)?;
            self.process_tc_locked(&mut state, tc);
        }
        Ok(Vec::new())
    }

    /// Feed an externally assembled certificate through the state machine
    pub fn process_qc(&self, chain: &dyn ChainReader, qc: &QuorumCert) -> XDPoSResult<()> {
        let mut state = self.state.write();
        self.process_qc_locked(chain, &mut state, qc)
    }

    /// Drain pending timer expiries, broadcasting a timeout for the current
    /// round for each. The local timeout also lands in the local pool.
    pub fn drain_timer(&self, chain: &dyn ChainReader) -> XDPoSResult<Vec<OutboundMessage>> {
        let mut outbound = Vec::new();
        loop {
            let fired = { self.timer_rx.lock().try_recv() };
            match fired {
                Ok(_instant) => {
                    if let Some(timeout) = self.on_countdown(chain)? {
                        outbound.push(OutboundMessage::Timeout(timeout));
                    }
                }
                Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
        Ok(outbound)
    }

    /// Build, sign and locally pool a timeout for the current round
    fn on_countdown(&self, chain: &dyn ChainReader) -> XDPoSResult<Option<Timeout>> {
        let round = self.current_round();
        let anchor = self
            .state
            .read()
            .highest_qc
            .as_ref()
            .map(|qc| qc.proposed_block_info.number)
            .unwrap_or_else(|| self.v2_config.switch_block);
        let gap_number = self.gap_number_for(anchor);

        let Some((address, sign_fn)) = self.signer.read().clone() else {
            tracing::debug!(round, "round timed out without a local signer");
            self.timer.reset();
            return Ok(None);
        };

        let digest = timeout_sig_hash(&TimeoutForSign { round, gap_number });
        let signature = sign_fn(address, digest)?;
        let mut timeout = Timeout::new(round, signature.to_vec(), gap_number);
        timeout.set_signer(address);

        tracing::debug!(round, "broadcasting round timeout");
        // Count our own timeout toward the threshold
        self.handle_timeout(chain, timeout.clone())?;
        self.timer.reset();
        Ok(Some(timeout))
    }

    /// Propose a block for the current round if the local signer leads it.
    ///
    /// The block extends the highest certified block and carries the highest
    /// QC as its justification. Returns `None` when not the leader.
    pub fn propose(&self, chain: &dyn ChainReader, now: u64) -> XDPoSResult<Option<Header>> {
        let (address, sign_fn) =
            self.signer.read().clone().ok_or(XDPoSError::SignerNotAuthorized)?;

        let (round, highest_qc) = {
            let state = self.state.read();
            let qc = state.highest_qc.clone().ok_or(XDPoSError::MissingQC)?;
            (state.current_round, qc)
        };

        let masternodes = self.epoch_masternodes(chain, highest_qc.proposed_block_info.number)?;
        if select_proposer(round, &masternodes)? != address {
            return Ok(None);
        }

        let parent = chain
            .get_header_by_hash(highest_qc.proposed_block_info.hash)
            .ok_or(XDPoSError::UnknownAncestor)?;

        let mut extra = encode_extra_fields_v2(round, Some(&highest_qc));
        extra.extend_from_slice(&[0u8; crate::constants::EXTRA_SEAL]);

        let mut header = Header {
            parent_hash: highest_qc.proposed_block_info.hash,
            number: parent.number + 1,
            timestamp: now.max(parent.timestamp + self.v2_config.mine_period),
            difficulty: U256::from(V2_DIFFICULTY),
            gas_limit: parent.gas_limit,
            extra_data: extra.into(),
            ..Default::default()
        };

        let signature = sign_fn(address, sig_hash(&header))?;
        let mut data = header.extra_data.to_vec();
        let len = data.len();
        data[len - crate::constants::EXTRA_SEAL..].copy_from_slice(&signature);
        header.extra_data = data.into();

        Ok(Some(header))
    }

    // --- verification ---------------------------------------------------

    /// Decode the v2 extra fields of a header
    pub fn decode_header_fields(&self, header: &Header) -> XDPoSResult<ExtraFieldsV2> {
        decode_extra_fields_v2(&header.extra_data)
    }

    /// Full structural verification of a v2 header for the chain importer
    pub fn verify_header(&self, chain: &dyn ChainReader, header: &Header) -> XDPoSResult<()> {
        if header.mix_hash != B256::ZERO {
            return Err(XDPoSError::InvalidMixDigest);
        }
        if header.ommers_hash != crate::primitives::EMPTY_UNCLE_HASH {
            return Err(XDPoSError::InvalidUncleHash);
        }
        if header.difficulty < U256::from(V2_DIFFICULTY) {
            return Err(XDPoSError::InvalidDifficulty);
        }
        if header.nonce != crate::primitives::NONCE_DROP_VOTE {
            return Err(XDPoSError::InvalidVote);
        }

        // The switch anchor is grandfathered: it carries no justification
        if header.number <= self.v2_config.switch_block {
            return Ok(());
        }

        let fields = self.decode_header_fields(header)?;
        if fields.round == 0 {
            return Err(XDPoSError::InvalidExtraData);
        }
        let qc = fields.quorum_cert.as_ref().ok_or(XDPoSError::MissingQC)?;

        // The justification must certify the direct parent
        if qc.proposed_block_info.hash != header.parent_hash
            || qc.proposed_block_info.number + 1 != header.number
        {
            return Err(XDPoSError::InvalidQC);
        }
        if fields.round <= qc.round() {
            return Err(XDPoSError::RoundMismatch {
                expected: qc.round() + 1,
                got: fields.round,
            });
        }

        let expected_gap = self.gap_number_for(qc.proposed_block_info.number);
        if qc.gap_number != expected_gap {
            return Err(XDPoSError::GapNumberMismatch {
                message: qc.gap_number,
                local: expected_gap,
            });
        }

        let masternodes = self.epoch_masternodes(chain, qc.proposed_block_info.number)?;
        let threshold = self.v2_config.cert_threshold_count(masternodes.len());
        verify_qc(qc, &masternodes, threshold)?;

        let parent = chain
            .get_header(header.parent_hash, header.number.saturating_sub(1))
            .ok_or(XDPoSError::UnknownAncestor)?;
        if header.timestamp < parent.timestamp + self.v2_config.mine_period {
            return Err(XDPoSError::InvalidTimestamp);
        }

        // The sealer must be the leader of the block's round
        let seal = extract_seal(header)?;
        let creator = crate::extra_data::ecrecover(&sig_hash(header), &seal)?;
        let block_masternodes = self.epoch_masternodes(chain, header.number)?;
        if select_proposer(fields.round, &block_masternodes)? != creator {
            return Err(XDPoSError::Unauthorized);
        }

        self.policy.verify_masternodes(header, &block_masternodes)?;
        Ok(())
    }

    // --- internals (engine lock held) ------------------------------------

    /// Advance the round, reset the countdown, prune the pools
    fn set_new_round(&self, state: &mut RoundState, round: Round) {
        tracing::debug!(from = state.current_round, to = round, "round change");
        state.current_round = round;
        self.timer.reset();
        state.vote_pool.hygiene(round);
        state.timeout_pool.hygiene(round);
    }

    /// Certificate processing: highest-QC advance, lock update, three-chain
    /// commit, round advance.
    fn process_qc_locked(
        &self,
        chain: &dyn ChainReader,
        state: &mut RoundState,
        qc: &QuorumCert,
    ) -> XDPoSResult<()> {
        // 1. Advance the highest known certificate
        if state.highest_qc.as_ref().is_none_or(|h| qc.round() > h.round()) {
            state.highest_qc = Some(qc.clone());
        }
        self.fork_choice.lock().record_qc(qc.proposed_block_info.hash, qc.round());

        // 2. Equivocation watch; evidence never stalls processing
        self.forensics.lock().observe_qc(qc, &*self.db);

        // 3. Lock and commit along the parent chain, direct parents by hash
        if qc.proposed_block_info.number > 0 {
            if let Some(proposed) = chain.get_header_by_hash(qc.proposed_block_info.hash) {
                self.update_lock_and_commit(chain, state, qc, &proposed);
            }
        }

        // 4. A certificate for the current round or later opens the next one
        if qc.round() >= state.current_round {
            self.set_new_round(state, qc.round() + 1);
        }
        Ok(())
    }

    fn update_lock_and_commit(
        &self,
        chain: &dyn ChainReader,
        state: &mut RoundState,
        qc: &QuorumCert,
        proposed: &Header,
    ) {
        let Some(parent) = chain.get_header_by_hash(proposed.parent_hash) else {
            return;
        };
        let parent_round = self.header_round(&parent);
        if parent_round + 1 != qc.round() {
            return;
        }

        // Two consecutive certified rounds lock the parent via the proposed
        // block's own justification
        if let Ok(fields) = self.decode_header_fields(proposed) {
            if let Some(justify) = fields.quorum_cert {
                if justify.proposed_block_info.hash == proposed.parent_hash {
                    let stale =
                        state.lock_qc.as_ref().is_some_and(|lock| lock.round() >= justify.round());
                    if !stale {
                        state.lock_qc = Some(justify);
                    }
                }
            }
        }

        // Three consecutive certified rounds commit the grandparent
        let Some(grandparent) = chain.get_header_by_hash(parent.parent_hash) else {
            return;
        };
        let grandparent_round = self.header_round(&grandparent);
        if grandparent_round + 1 != parent_round {
            return;
        }

        let commit = BlockInfo::new(parent.parent_hash, grandparent_round, grandparent.number);
        let advances = state.highest_commit_block.as_ref().is_none_or(|current| {
            commit.number > current.number && commit.round > current.round
        });
        if advances {
            tracing::debug!(number = commit.number, round = commit.round, "commit block advanced");
            state.highest_commit_block = Some(commit);
        }
    }

    /// TC processing: catch up to the timed-out round and move past it
    fn process_tc_locked(&self, state: &mut RoundState, tc: &TimeoutCert) {
        if state.highest_tc.as_ref().is_none_or(|h| tc.round > h.round) {
            state.highest_tc = Some(tc.clone());
        }
        if tc.round >= state.current_round {
            self.set_new_round(state, tc.round + 1);
        }
    }

    /// Round recorded in a header's extra fields; v1 ancestors count as round 0
    fn header_round(&self, header: &Header) -> Round {
        self.decode_header_fields(header).map(|fields| fields.round).unwrap_or(0)
    }

    /// Sign a vote for `header` at `round` with the local signer
    fn sign_vote(&self, header: &Header, round: Round) -> XDPoSResult<Option<Vote>> {
        let Some((address, sign_fn)) = self.signer.read().clone() else {
            return Ok(None);
        };

        let block_info = BlockInfo::new(header.hash_slow(), round, header.number);
        let gap_number = self.gap_number_for(header.number);
        let digest = vote_sig_hash(&VoteForSign {
            proposed_block_info: block_info.clone(),
            gap_number,
        });
        let signature = sign_fn(address, digest)?;

        let mut vote = Vote::new(block_info, signature.to_vec(), gap_number);
        vote.set_signer(address);
        Ok(Some(vote))
    }
}

impl std::fmt::Debug for EngineV2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("EngineV2")
            .field("current_round", &state.current_round)
            .field("highest_qc_round", &state.highest_qc.as_ref().map(|q| q.round()))
            .field("highest_commit", &state.highest_commit_block)
            .finish()
    }
}
