//! External collaborator interfaces.
//!
//! The consensus core never owns the chain: headers come in through
//! [`ChainReader`], snapshots and forensic evidence go out through
//! [`Database`], and signing is delegated to a [`SignerFn`]. Epoch-boundary
//! business logic (penalties, validator assignment, contract-derived signer
//! sets) is injected as one [`ChainPolicy`] capability bundle.

use crate::{
    config::XDPoSConfig,
    errors::{XDPoSError, XDPoSResult},
    primitives::Header,
};
use alloy_primitives::{Address, B256};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Read-only view of the header chain.
///
/// All methods are pure reads; the core never writes blocks. Implementations
/// are expected to be cheap enough to call during verification.
pub trait ChainReader: Send + Sync {
    /// Header by hash and number
    fn get_header(&self, hash: B256, number: u64) -> Option<Header>;

    /// Header on the canonical chain by number
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    /// Header by hash alone (canonical or fork)
    fn get_header_by_hash(&self, hash: B256) -> Option<Header>;

    /// Chain consensus configuration
    fn config(&self) -> &XDPoSConfig;
}

/// Byte-keyed key-value store used for snapshot and evidence persistence.
pub trait Database: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> XDPoSResult<()>;
    fn get(&self, key: &[u8]) -> XDPoSResult<Option<Vec<u8>>>;
    fn delete(&self, key: &[u8]) -> XDPoSResult<()>;
}

/// In-memory [`Database`] for tests and light deployments.
#[derive(Debug, Default)]
pub struct MemoryDb {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Database for MemoryDb {
    fn put(&self, key: &[u8], value: &[u8]) -> XDPoSResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> XDPoSResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> XDPoSResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Signer callback requesting `digest` to be signed by `account`.
///
/// Returns the 65-byte compact signature (r ‖ s ‖ v). The engine never stores
/// raw key material; the closure owns whatever backend it needs.
pub type SignerFn = Arc<dyn Fn(Address, B256) -> XDPoSResult<[u8; 65]> + Send + Sync>;

/// Epoch-boundary business logic injected by the node.
///
/// Every method has a no-op default so a bare core works without a node
/// attached; deployments override the pieces they implement.
pub trait ChainPolicy: Send + Sync {
    /// Penalized masternodes for the epoch ending at `number`
    fn penalties(&self, _chain: &dyn ChainReader, _number: u64) -> XDPoSResult<Vec<Address>> {
        Ok(Vec::new())
    }

    /// Penalty list derived from signing-transaction statistics; falls back to
    /// the plain penalty hook
    fn penalties_signing(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        _candidates: &[Address],
    ) -> XDPoSResult<Vec<Address>> {
        self.penalties(chain, header.number)
    }

    /// Validator assignment bytes for a checkpoint header under preparation
    fn validator_bytes(
        &self,
        _header: &Header,
        _masternodes: &[Address],
    ) -> XDPoSResult<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Extra masternode verification at checkpoint blocks
    fn verify_masternodes(&self, _header: &Header, _signers: &[Address]) -> XDPoSResult<()> {
        Ok(())
    }

    /// Signer set read from the validator contract at the gap anchor.
    ///
    /// Only consulted when the snapshot-derived set disagrees with the
    /// checkpoint header. Slated for removal once the snapshot path is
    /// trusted on all served chains.
    fn signers_from_contract(&self, _anchor: B256) -> XDPoSResult<Vec<Address>> {
        Err(XDPoSError::Hook("no contract signer source configured".into()))
    }

    /// Reward distribution at reward checkpoints. State mutation happens on
    /// the node side; the core only reports the boundary.
    fn reward(&self, _chain: &dyn ChainReader, _header: &Header) -> XDPoSResult<()> {
        Ok(())
    }
}

/// Policy with every hook left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl ChainPolicy for DefaultPolicy {}
