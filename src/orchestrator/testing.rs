// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles for the orchestrator's remote collaborators, shared by the
//! orchestrator and API handler tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::blockchain::{
    CreditLedger, DebitConfirmation, DebitProbe, LedgerError, RejectReason, SettlementError,
    SettlementJob, SettlementSubmitter,
};
use crate::storage::request_db::RequestDatabase;
use crate::storage::requests::{AuthorizationRequest, ContentBinding, SettlementRecord};

use super::{CreatedRequest, FeeSchedule, Orchestrator, OrchestratorError};

#[derive(Clone, Copy)]
pub enum DebitMode {
    Succeed,
    Insufficient,
    NotRegistered,
    Unconfirmed,
    Unavailable,
}

/// Scriptable in-memory credit ledger. Counts every `debit` invocation.
pub struct MockLedger {
    mode: Mutex<DebitMode>,
    calls: AtomicU32,
    amounts: Mutex<Vec<u64>>,
    probe: Mutex<DebitProbe>,
}

impl MockLedger {
    pub fn new(mode: DebitMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicU32::new(0),
            amounts: Mutex::new(Vec::new()),
            probe: Mutex::new(DebitProbe::Unknown),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(DebitMode::Succeed)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn amounts(&self) -> Vec<u64> {
        self.amounts.lock().unwrap().clone()
    }

    pub fn set_mode(&self, mode: DebitMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_probe(&self, probe: DebitProbe) {
        *self.probe.lock().unwrap() = probe;
    }
}

#[async_trait]
impl CreditLedger for MockLedger {
    async fn debit(&self, _owner: Address, amount: u64) -> Result<DebitConfirmation, LedgerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.amounts.lock().unwrap().push(amount);
        match *self.mode.lock().unwrap() {
            DebitMode::Succeed => Ok(DebitConfirmation {
                tx_hash: format!("0xdebit{n:02}"),
                new_balance: format!("{}", 100 - amount),
            }),
            DebitMode::Insufficient => Err(LedgerError::InsufficientBalance {
                balance: "1".to_string(),
                required: amount,
            }),
            DebitMode::NotRegistered => Err(LedgerError::NotRegistered("0xowner".to_string())),
            DebitMode::Unconfirmed => Err(LedgerError::Unconfirmed {
                tx_hash: "0xpending-debit".to_string(),
            }),
            DebitMode::Unavailable => Err(LedgerError::Unavailable("rpc down".to_string())),
        }
    }

    async fn check_debit(
        &self,
        _owner: Address,
        _tx_hash: &str,
    ) -> Result<DebitProbe, LedgerError> {
        Ok(self.probe.lock().unwrap().clone())
    }
}

#[derive(Clone)]
pub enum SubmitMode {
    Succeed,
    Reject(RejectReason),
    Unconfirmed,
    Unavailable,
}

/// Scriptable in-memory registry. Counts every `submit` invocation.
pub struct MockRegistry {
    mode: Mutex<SubmitMode>,
    submits: AtomicU32,
    existing: Mutex<Option<SettlementRecord>>,
}

impl MockRegistry {
    pub fn new(mode: SubmitMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            submits: AtomicU32::new(0),
            existing: Mutex::new(None),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(SubmitMode::Succeed)
    }

    pub fn submit_count(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: SubmitMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_existing(&self, record: Option<SettlementRecord>) {
        *self.existing.lock().unwrap() = record;
    }
}

#[async_trait]
impl SettlementSubmitter for MockRegistry {
    async fn submit(&self, job: &SettlementJob) -> Result<SettlementRecord, SettlementError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SubmitMode::Succeed => Ok(SettlementRecord {
                tx_hash: Some(format!("0xmint{n:02}")),
                record_id: format!("{n}"),
                content_key: format!("{:#x}", job.content_key),
                block_number: Some(100 + n as u64),
                settled_at: Utc::now(),
            }),
            SubmitMode::Reject(reason) => Err(SettlementError::Rejected { reason }),
            SubmitMode::Unconfirmed => Err(SettlementError::Unconfirmed {
                tx_hash: format!("0xstuck{n:02}"),
            }),
            SubmitMode::Unavailable => {
                Err(SettlementError::Unavailable("registry rpc down".to_string()))
            }
        }
    }

    async fn find_existing(
        &self,
        _content_key: B256,
    ) -> Result<Option<SettlementRecord>, SettlementError> {
        Ok(self.existing.lock().unwrap().clone())
    }
}

/// A settlement record as the registry would report it.
pub fn mint_record(record_id: &str, content_key: B256) -> SettlementRecord {
    SettlementRecord {
        tx_hash: Some(format!("0xmint-{record_id}")),
        record_id: record_id.to_string(),
        content_key: format!("{content_key:#x}"),
        block_number: Some(4242),
        settled_at: Utc::now(),
    }
}

pub fn binding(attachments: usize) -> ContentBinding {
    ContentBinding {
        subject_hash: "0xsubject".to_string(),
        sender_hash: "0xsender".to_string(),
        body_hash: "0xbody".to_string(),
        attachment_hashes: (0..attachments).map(|i| format!("0xatt{i}")).collect(),
        storage_locator: "bafy-raw-email".to_string(),
    }
}

/// Orchestrator wired to mock collaborators over a throwaway store.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub ledger: Arc<MockLedger>,
    pub registry: Arc<MockRegistry>,
    pub signer: PrivateKeySigner,
    pub db: Arc<RequestDatabase>,
    pub dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    custom_harness(
        MockLedger::succeeding(),
        MockRegistry::succeeding(),
        Duration::hours(24),
    )
}

pub fn custom_harness(ledger: MockLedger, registry: MockRegistry, window: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(RequestDatabase::open(&dir.path().join("orchestrator.redb")).unwrap());
    let ledger = Arc::new(ledger);
    let registry = Arc::new(registry);
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        ledger.clone(),
        registry.clone(),
        FeeSchedule::default(),
        window,
        "https://authorize.example".to_string(),
    ));
    Harness {
        orchestrator,
        ledger,
        registry,
        signer: PrivateKeySigner::random(),
        db,
        dir,
    }
}

impl Harness {
    pub fn owner(&self) -> String {
        format!("{:#x}", self.signer.address())
    }

    pub fn create(&self, attachments: usize) -> CreatedRequest {
        self.orchestrator
            .create(&self.owner(), binding(attachments))
            .unwrap()
    }

    pub fn sign(&self, request_id: &str) -> String {
        let sig = self.signer.sign_message_sync(request_id.as_bytes()).unwrap();
        format!("0x{}", alloy::hex::encode(sig.as_bytes()))
    }

    pub async fn authorize(
        &self,
        request_id: &str,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        let sig = self.sign(request_id);
        self.orchestrator
            .authorize(request_id, &self.owner(), &sig)
            .await
    }
}
