//! In-process chain context and proof registry.
//!
//! Used by the node in development mode and by tests. Faults can be scripted
//! per call so retry and remediation paths can be exercised deterministically.

use async_trait::async_trait;
use blocktrust_core::{ChainParams, ChainTxRef, Digest};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ContextError, RegistryError};
use crate::traits::{AnchorRegistry, ChainContext};
use crate::types::{AnchorReceipt, AnchorRecord, AnchorRequest};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A signer that knows a set of chains and can be told to misbehave.
pub struct MemoryChainContext {
    current: AtomicU64,
    known: DashSet<u64>,
    added: Mutex<Vec<ChainParams>>,
    switch_requests: AtomicU32,
    reject_switch: AtomicBool,
    reject_add: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryChainContext {
    /// Start connected to `chain_id`, which is the only known chain.
    pub fn new(chain_id: u64) -> Self {
        let known = DashSet::new();
        known.insert(chain_id);
        Self {
            current: AtomicU64::new(chain_id),
            known,
            added: Mutex::new(Vec::new()),
            switch_requests: AtomicU32::new(0),
            reject_switch: AtomicBool::new(false),
            reject_add: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn register_known(&self, chain_id: u64) {
        self.known.insert(chain_id);
    }

    /// Simulate the user moving the signer to another chain.
    pub fn set_current(&self, chain_id: u64) {
        self.known.insert(chain_id);
        self.current.store(chain_id, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn set_reject_switch(&self, reject: bool) {
        self.reject_switch.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_add(&self, reject: bool) {
        self.reject_add.store(reject, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn switch_requests(&self) -> u32 {
        self.switch_requests.load(Ordering::SeqCst)
    }

    pub fn added_chains(&self) -> Vec<ChainParams> {
        lock(&self.added).clone()
    }

    fn check_available(&self) -> Result<(), ContextError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ContextError::Unavailable("no signer connected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainContext for MemoryChainContext {
    async fn current_chain_id(&self) -> Result<u64, ContextError> {
        self.check_available()?;
        Ok(self.current())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ContextError> {
        self.switch_requests.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.reject_switch.load(Ordering::SeqCst) {
            return Err(ContextError::Rejected("user rejected the switch".into()));
        }
        if !self.known.contains(&chain_id) {
            return Err(ContextError::UnrecognizedChain(chain_id));
        }
        self.current.store(chain_id, Ordering::SeqCst);
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), ContextError> {
        self.check_available()?;
        if self.reject_add.load(Ordering::SeqCst) {
            return Err(ContextError::Rejected("user rejected chain registration".into()));
        }
        self.known.insert(params.chain_id);
        lock(&self.added).push(params.clone());
        Ok(())
    }
}

/// A scripted response for the next `anchor` call.
#[derive(Debug, Clone)]
pub enum ScriptedFault {
    /// Fail without mining anything.
    Fail(RegistryError),
    /// Mine the anchor but report a transient failure, as when a receipt is lost.
    MineThenFail(String),
    /// Send the transaction but leave it unmined for the next `polls`
    /// `resolve` calls. Log queries do not see it until then.
    Unconfirmed { polls: u32 },
}

/// Proof registry held in memory.
pub struct MemoryRegistry {
    records: DashMap<ChainTxRef, AnchorRecord>,
    unconfirmed: DashMap<ChainTxRef, (AnchorRecord, u32)>,
    faults: Mutex<VecDeque<ScriptedFault>>,
    anchor_calls: AtomicU32,
    nonce: AtomicU64,
    offline: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            unconfirmed: DashMap::new(),
            faults: Mutex::new(VecDeque::new()),
            anchor_calls: AtomicU32::new(0),
            nonce: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Queue a fault for the next `anchor` call. Faults are consumed in order.
    pub fn push_fault(&self, fault: ScriptedFault) {
        lock(&self.faults).push_back(fault);
    }

    pub fn push_transient(&self, reason: &str) {
        self.push_fault(ScriptedFault::Fail(RegistryError::Transient(reason.into())));
    }

    /// Make `lookup_anchor` and `resolve` fail with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Write a record directly, bypassing `anchor`.
    pub fn insert_record(&self, record: AnchorRecord) {
        self.records.insert(record.tx_ref.clone(), record);
    }

    pub fn anchor_calls(&self) -> u32 {
        self.anchor_calls.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn mine(&self, request: &AnchorRequest) -> AnchorRecord {
        let record = self.build_record(request);
        self.records.insert(record.tx_ref.clone(), record.clone());
        tracing::debug!(tx_ref = %record.tx_ref, "memory registry mined anchor");
        record
    }

    fn build_record(&self, request: &AnchorRequest) -> AnchorRecord {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.digest.as_bytes());
        hasher.update(&request.credential_commitment);
        hasher.update(&nonce.to_be_bytes());
        AnchorRecord {
            tx_ref: ChainTxRef::from_bytes(*hasher.finalize().as_bytes()),
            digest: *request.digest.as_bytes(),
            signer: request.signer.clone(),
            credential_commitment: request.credential_commitment,
            anchored_at: Utc::now(),
        }
    }

    fn check_online(&self) -> Result<(), RegistryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Transient("registry offline".into()));
        }
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnchorRegistry for MemoryRegistry {
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt, RegistryError> {
        self.anchor_calls.fetch_add(1, Ordering::SeqCst);
        let fault = lock(&self.faults).pop_front();
        match fault {
            Some(ScriptedFault::Fail(err)) => Err(err),
            Some(ScriptedFault::MineThenFail(reason)) => {
                self.mine(request);
                Err(RegistryError::Transient(reason))
            }
            Some(ScriptedFault::Unconfirmed { polls }) => {
                let record = self.build_record(request);
                let tx_ref = record.tx_ref.clone();
                self.unconfirmed.insert(tx_ref.clone(), (record, polls));
                Err(RegistryError::Pending(tx_ref))
            }
            None => Ok(self.mine(request).receipt()),
        }
    }

    async fn lookup_anchor(
        &self,
        digest: &Digest,
        credential_commitment: &[u8; 32],
    ) -> Result<Option<AnchorRecord>, RegistryError> {
        self.check_online()?;
        Ok(self
            .records
            .iter()
            .find(|r| r.digest == *digest.as_bytes() && r.credential_commitment == *credential_commitment)
            .map(|r| r.value().clone()))
    }

    async fn resolve(&self, tx_ref: &ChainTxRef) -> Result<Option<AnchorRecord>, RegistryError> {
        self.check_online()?;
        if let Some(mut entry) = self.unconfirmed.get_mut(tx_ref) {
            if entry.1 > 0 {
                entry.1 -= 1;
                return Ok(None);
            }
        }
        if let Some((tx_ref, (record, _))) = self.unconfirmed.remove(tx_ref) {
            self.records.insert(tx_ref, record);
        }
        Ok(self.records.get(tx_ref).map(|r| r.value().clone()))
    }

    fn registry_id(&self) -> &str {
        "memory"
    }
}
