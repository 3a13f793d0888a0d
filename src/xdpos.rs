//! Top-level XDPoS engine: v1/v2 dispatch by block number.
//!
//! One object serves the whole chain history. Blocks up to and including the
//! v2 switch block follow the v1 rules; later blocks follow the v2 BFT rules.
//! The switch block itself is the round-0 anchor of the BFT chain.

use crate::{
    config::XDPoSConfig,
    errors::{XDPoSError, XDPoSResult},
    forkchoice::ForkChoice,
    primitives::Header,
    traits::{ChainPolicy, ChainReader, Database, DefaultPolicy, SignerFn},
    v1::EngineV1,
    v2::EngineV2,
};
use alloy_primitives::Address;
use std::sync::{atomic::AtomicBool, Arc};

/// XDPoS consensus engine
pub struct XDPoS {
    config: XDPoSConfig,
    v1: EngineV1,
    v2: Option<Arc<EngineV2>>,
}

impl XDPoS {
    /// Create an engine with an injected policy bundle
    pub fn new(
        config: XDPoSConfig,
        db: Arc<dyn Database>,
        policy: Arc<dyn ChainPolicy>,
    ) -> Arc<Self> {
        let v1 = EngineV1::new(config.clone(), Arc::clone(&db), Arc::clone(&policy));
        let v2 = config
            .v2
            .as_ref()
            .map(|_| EngineV2::new(config.clone(), Arc::clone(&db), Arc::clone(&policy)));
        Arc::new(Self { config, v1, v2 })
    }

    /// Create an engine with every policy hook at its default
    pub fn with_default_policy(config: XDPoSConfig, db: Arc<dyn Database>) -> Arc<Self> {
        Self::new(config, db, Arc::new(DefaultPolicy))
    }

    /// Engine configuration
    pub fn config(&self) -> &XDPoSConfig {
        &self.config
    }

    /// The v1 engine
    pub fn v1(&self) -> &EngineV1 {
        &self.v1
    }

    /// The v2 engine, when v2 is configured
    pub fn v2(&self) -> Option<&Arc<EngineV2>> {
        self.v2.as_ref()
    }

    /// Whether `number` falls under the v2 BFT rules
    pub fn is_v2_block(&self, number: u64) -> bool {
        match self.config.v2_switch_block() {
            Some(switch) => number > switch,
            None => false,
        }
    }

    /// Inject the local signing identity into both engines
    pub fn authorize(&self, address: Address, sign_fn: SignerFn) {
        self.v1.authorize(address, Arc::clone(&sign_fn));
        if let Some(v2) = &self.v2 {
            v2.authorize(address, sign_fn);
        }
    }

    /// Address recovered from the seal in the header's extra data.
    /// The seal sits in the same place under both protocol revisions.
    pub fn author(&self, header: &Header) -> XDPoSResult<Address> {
        self.v1.author(header)
    }

    /// Verify a header under the rules of its protocol revision
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        full_verify: bool,
    ) -> XDPoSResult<()> {
        if self.is_v2_block(header.number) {
            let v2 = self.v2.as_ref().ok_or_else(|| {
                XDPoSError::Custom("v2 block received without v2 configuration".into())
            })?;
            v2.verify_header(chain, header)
        } else {
            self.v1.verify_header(chain, header, full_verify)
        }
    }

    /// Verify an ascending batch of headers
    pub fn verify_headers(
        &self,
        chain: &dyn ChainReader,
        headers: &[Header],
        full_verify: bool,
    ) -> Vec<XDPoSResult<()>> {
        headers.iter().map(|h| self.verify_header(chain, h, full_verify)).collect()
    }

    /// Prepare the consensus fields of a v1 header under construction
    pub fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> XDPoSResult<()> {
        if self.is_v2_block(header.number) {
            return Err(XDPoSError::Custom("v2 blocks are built through propose".into()));
        }
        self.v1.prepare(chain, header)
    }

    /// Seal a prepared v1 header; v2 blocks are produced by the v2 engine
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        stop: &AtomicBool,
    ) -> XDPoSResult<Option<Header>> {
        if self.is_v2_block(header.number) {
            return Err(XDPoSError::Custom("v2 blocks are built through propose".into()));
        }
        self.v1.seal(chain, header, stop)
    }

    /// Report a reward checkpoint to the policy layer
    pub fn apply_reward_checkpoint(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
    ) -> XDPoSResult<()> {
        if self.config.reward_checkpoint > 0 && header.number % self.config.reward_checkpoint == 0
        {
            return self.v1_policy_reward(chain, header);
        }
        Ok(())
    }

    fn v1_policy_reward(&self, chain: &dyn ChainReader, header: &Header) -> XDPoSResult<()> {
        // Both revisions share the reward schedule; the policy does the math
        self.v1.policy().reward(chain, header)
    }

    /// Preferred tip among `candidates`. With v2 active the QC-anchored rule
    /// applies; before that the longest-difficulty branch wins.
    pub fn select_tip(&self, chain: &dyn ChainReader, candidates: &[Header]) -> Option<Header> {
        match &self.v2 {
            Some(v2) => v2.select_tip(chain, candidates),
            None => ForkChoice::new().select_tip(chain, None, candidates),
        }
    }
}

impl std::fmt::Debug for XDPoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XDPoS")
            .field("config", &self.config)
            .field("has_v2", &self.v2.is_some())
            .finish()
    }
}
