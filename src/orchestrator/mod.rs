// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization Request Orchestrator
//!
//! Drives one authorization request from creation to settlement:
//!
//! ```text
//! pending ---authorize---> authorized ---settle---> processed
//!    |                         |
//!    |-- cancel -> cancelled   |-- definitive debit failure -> cancelled
//!    |-- window elapsed -> expired
//! ```
//!
//! `processed`, `expired` and `cancelled` are terminal; records in those
//! states are never mutated again.
//!
//! ## Ordering
//!
//! Authorize runs: verify signature, then one conditional status transition,
//! then debit, then settle. The `pending -> authorized` compare-and-swap is
//! the linearization point; of any number of concurrent authorize calls
//! exactly one wins it, so at most one debit and at most one settlement
//! submission is ever initiated per request.
//!
//! ## Unknown is not failed
//!
//! A debit or settlement call that times out without a confirmation may still
//! land on chain. Those outcomes park the request in `authorized` with the
//! broadcast hash recorded, and only [`Orchestrator::reconcile`] moves it
//! further, by probing the chain rather than blindly resubmitting.

pub mod fees;
pub mod signature;
pub mod sweeper;
#[cfg(test)]
pub mod testing;

pub use fees::FeeSchedule;
pub use sweeper::ExpirySweeper;

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::blockchain::registry::validate_job_fields;
use crate::blockchain::{
    derive_content_key, parse_address, CreditLedger, DebitProbe, LedgerError, RejectReason,
    SettlementError, SettlementJob, SettlementSubmitter,
};
use crate::storage::request_db::{RequestDatabase, RequestDbError};
use crate::storage::requests::{
    AuthorizationRequest, ContentBinding, DebitRecord, RequestStatus, SettlementRecord,
};

use self::signature::SignatureError;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed input; nothing was changed
    #[error("{0}")]
    Validation(String),

    #[error("authorization request not found")]
    NotFound,

    /// Signature does not prove control of the owner identity; nothing was changed
    #[error("signature does not match the owner identity")]
    Unauthorized,

    /// The request already reached a terminal state. Carries the settlement
    /// record when that state is `processed`, so a retried authorize observes
    /// the original outcome instead of a new one.
    #[error("request already finalized as {status}")]
    AlreadyFinalized {
        status: RequestStatus,
        settlement: Option<SettlementRecord>,
    },

    #[error("authorization window elapsed")]
    Expired,

    /// An earlier authorize call moved this request to `authorized` and its
    /// side effects are not fully resolved; reconcile instead of re-running
    #[error("authorization already in progress; reconcile to resolve it")]
    AuthorizationInFlight,

    #[error("insufficient credit balance: have {balance}, need {required}")]
    InsufficientBalance { balance: String, required: u64 },

    #[error("owner identity is not registered with the credit ledger")]
    NotRegistered,

    /// Registry refused the settlement; credits are already spent and the
    /// request stays `authorized` for reconciliation
    #[error("settlement rejected: {reason}")]
    SettlementRejected { reason: String },

    /// Settlement broadcast without confirmation; ambiguous, never retried
    /// automatically
    #[error("settlement broadcast but unconfirmed: {tx_hash}")]
    SettlementUnconfirmed { tx_hash: String },

    /// Debit broadcast without confirmation; ambiguous, never retried
    /// automatically
    #[error("debit broadcast but unconfirmed: {tx_hash}")]
    DebitUnconfirmed { tx_hash: String },

    #[error("request store failure: {0}")]
    Store(#[from] RequestDbError),

    #[error("credit ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Outcome of [`Orchestrator::create`].
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request: AuthorizationRequest,
    /// Caller-facing URL the owner visits to review and sign
    pub authorization_reference: String,
}

/// Core lifecycle driver. Cheap to share behind an `Arc`; all per-request
/// coordination happens through conditional store transitions, never through
/// in-process locks held across remote calls.
pub struct Orchestrator {
    db: Arc<RequestDatabase>,
    ledger: Arc<dyn CreditLedger>,
    registry: Arc<dyn SettlementSubmitter>,
    fees: FeeSchedule,
    authorization_window: Duration,
    public_base_url: String,
}

impl Orchestrator {
    pub fn new(
        db: Arc<RequestDatabase>,
        ledger: Arc<dyn CreditLedger>,
        registry: Arc<dyn SettlementSubmitter>,
        fees: FeeSchedule,
        authorization_window: Duration,
        public_base_url: String,
    ) -> Self {
        Self {
            db,
            ledger,
            registry,
            fees,
            authorization_window,
            public_base_url,
        }
    }

    /// URL the owner visits to authorize; built from both identifiers so the
    /// signing page can resolve the request without a third lookup.
    pub fn authorization_reference(&self, request: &AuthorizationRequest) -> String {
        format!(
            "{}/authorize/{}?request={}",
            self.public_base_url.trim_end_matches('/'),
            request.auth_token,
            request.request_id
        )
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a new pending request for `owner_identity` over `content`.
    ///
    /// Computes the credit cost once, from the attachment count at this
    /// moment; nothing later recomputes it. No debit or settlement happens
    /// here, so upstream retries can only ever produce duplicate *pending*
    /// requests, never duplicate charges.
    pub fn create(
        &self,
        owner_identity: &str,
        content: ContentBinding,
    ) -> Result<CreatedRequest, OrchestratorError> {
        parse_address(owner_identity).map_err(|_| {
            OrchestratorError::Validation(format!(
                "owner identity is not a valid address: {owner_identity}"
            ))
        })?;
        validate_job_fields(&content).map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        let credit_cost = self.fees.cost(content.attachment_hashes.len());
        let request = AuthorizationRequest::new_pending(
            owner_identity.to_string(),
            content,
            credit_cost,
            self.authorization_window,
        );
        self.db.insert(&request)?;

        info!(
            request_id = %request.request_id,
            owner = %request.owner_address,
            credit_cost,
            expires_at = %request.expires_at,
            "Authorization request created"
        );

        let authorization_reference = self.authorization_reference(&request);
        Ok(CreatedRequest {
            request,
            authorization_reference,
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Load a request by id or, failing that, by auth token.
    pub fn get(&self, key: &str) -> Result<AuthorizationRequest, OrchestratorError> {
        if let Some(request) = self.db.get(key)? {
            return self.expire_if_due(request);
        }
        if let Some(request) = self.db.get_by_token(key)? {
            return self.expire_if_due(request);
        }
        Err(OrchestratorError::NotFound)
    }

    /// An owner's live pending requests, newest first.
    pub fn list_pending(
        &self,
        owner_identity: &str,
        limit: usize,
    ) -> Result<Vec<AuthorizationRequest>, OrchestratorError> {
        parse_address(owner_identity).map_err(|_| {
            OrchestratorError::Validation(format!(
                "owner identity is not a valid address: {owner_identity}"
            ))
        })?;

        let pending = self.db.list_pending_by_owner(owner_identity, limit)?;
        let mut live = Vec::with_capacity(pending.len());
        for request in pending {
            let fresh = self.expire_if_due(request)?;
            if fresh.status == RequestStatus::Pending {
                live.push(fresh);
            }
        }
        Ok(live)
    }

    // =========================================================================
    // Authorize
    // =========================================================================

    /// Verify the owner's consent signature, debit the credit ledger and
    /// settle the data-wallet record, in that order.
    ///
    /// The signed message is exactly the request id string. A terminal
    /// request is never re-executed: a retry against `processed` surfaces
    /// [`OrchestratorError::AlreadyFinalized`] carrying the original
    /// settlement record.
    pub async fn authorize(
        &self,
        request_id: &str,
        claimed_signer: &str,
        signature_hex: &str,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        let request = self.load_by_id(request_id)?;

        match request.status {
            RequestStatus::Processed | RequestStatus::Cancelled => {
                return Err(OrchestratorError::AlreadyFinalized {
                    status: request.status,
                    settlement: request.settlement,
                });
            }
            RequestStatus::Expired => return Err(OrchestratorError::Expired),
            RequestStatus::Authorized => return Err(OrchestratorError::AuthorizationInFlight),
            RequestStatus::Pending => {}
        }

        // Verification happens before any state change
        let owner = self.stored_owner(&request)?;
        let claimed = parse_address(claimed_signer).map_err(|_| {
            OrchestratorError::Validation(format!(
                "signer identity is not a valid address: {claimed_signer}"
            ))
        })?;
        if claimed != owner {
            warn!(request_id, claimed = %claimed, "Authorize rejected: signer is not the owner");
            return Err(OrchestratorError::Unauthorized);
        }
        let proven = match signature::matches_owner(request_id, owner, signature_hex) {
            Ok(matched) => matched,
            Err(SignatureError::Malformed(msg)) => {
                return Err(OrchestratorError::Validation(format!(
                    "malformed signature: {msg}"
                )));
            }
            Err(SignatureError::Recovery(_)) => false,
        };
        if !proven {
            warn!(request_id, "Authorize rejected: signature does not recover to the owner");
            return Err(OrchestratorError::Unauthorized);
        }

        // Linearization point: one caller wins pending -> authorized, everyone
        // else observes the conflict
        let authorized = match self.db.transition(
            request_id,
            RequestStatus::Pending,
            RequestStatus::Authorized,
            |r| r.submission_attempts = 1,
        ) {
            Ok(updated) => updated,
            Err(RequestDbError::StatusConflict { .. }) => {
                return Err(self.conflict_to_error(request_id))
            }
            Err(e) => return Err(e.into()),
        };
        info!(request_id, "Request authorized; issuing debit");

        let debited = self.issue_debit(&authorized, owner).await?;
        self.settle(&debited, owner).await
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Caller-initiated cancellation; only `pending` requests qualify.
    ///
    /// An `authorized` request has a debit issued or in flight and offers no
    /// undo; the compensating-refund flow is a separate audited operation.
    pub fn cancel(&self, request_id: &str) -> Result<AuthorizationRequest, OrchestratorError> {
        let request = self.load_by_id(request_id)?;

        match request.status {
            RequestStatus::Pending => {}
            RequestStatus::Authorized => return Err(OrchestratorError::AuthorizationInFlight),
            RequestStatus::Expired => return Err(OrchestratorError::Expired),
            RequestStatus::Processed | RequestStatus::Cancelled => {
                return Err(OrchestratorError::AlreadyFinalized {
                    status: request.status,
                    settlement: request.settlement,
                });
            }
        }

        match self.db.transition(
            request_id,
            RequestStatus::Pending,
            RequestStatus::Cancelled,
            |_| {},
        ) {
            Ok(cancelled) => {
                info!(request_id, "Request cancelled by caller");
                Ok(cancelled)
            }
            Err(RequestDbError::StatusConflict { .. }) => Err(self.conflict_to_error(request_id)),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// Resolve an `authorized` request whose debit or settlement ended in an
    /// unknown state.
    ///
    /// Explicitly invoked (operator or scheduled), never automatic. Probes
    /// the chain for each ambiguous side effect before initiating anything:
    /// a pending debit is confirmed or re-issued only once its broadcast is
    /// definitively resolved, and settlement is re-submitted only after the
    /// registry shows nothing under this request's content key. Resubmission
    /// reuses the same derived key, so a still-in-flight prior broadcast can
    /// only collide as a detectable duplicate, never mint twice.
    pub async fn reconcile(
        &self,
        request_id: &str,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        let request = self.load_by_id(request_id)?;

        match request.status {
            RequestStatus::Processed => return Ok(request),
            RequestStatus::Cancelled => {
                return Err(OrchestratorError::AlreadyFinalized {
                    status: RequestStatus::Cancelled,
                    settlement: None,
                });
            }
            RequestStatus::Expired => return Err(OrchestratorError::Expired),
            RequestStatus::Pending => {
                return Err(OrchestratorError::Validation(
                    "request is still pending; reconciliation applies after authorization"
                        .to_string(),
                ));
            }
            RequestStatus::Authorized => {}
        }

        let owner = self.stored_owner(&request)?;

        // Make the debit definite before touching settlement
        let debited = if request.debit.is_some() {
            request
        } else if let Some(tx_hash) = request.pending_debit_tx.clone() {
            match self.ledger.check_debit(owner, &tx_hash).await {
                Ok(DebitProbe::Confirmed(confirmation)) => {
                    info!(request_id, tx_hash = %confirmation.tx_hash, "Reconcile: pending debit confirmed");
                    self.db
                        .update_in_status(request_id, RequestStatus::Authorized, |r| {
                            r.debit = Some(DebitRecord {
                                tx_hash: confirmation.tx_hash.clone(),
                                new_balance: confirmation.new_balance.clone(),
                                debited_at: Utc::now(),
                            });
                            r.pending_debit_tx = None;
                        })?
                }
                Ok(DebitProbe::Reverted) => {
                    info!(request_id, tx_hash = %tx_hash, "Reconcile: pending debit reverted; reissuing");
                    let cleared = self.db.update_in_status(
                        request_id,
                        RequestStatus::Authorized,
                        |r| r.pending_debit_tx = None,
                    )?;
                    self.issue_debit(&cleared, owner).await?
                }
                Ok(DebitProbe::Unknown) => {
                    return Err(OrchestratorError::DebitUnconfirmed { tx_hash });
                }
                Err(e) => return Err(OrchestratorError::LedgerUnavailable(e.to_string())),
            }
        } else {
            // The earlier attempt failed before anything was broadcast
            self.issue_debit(&request, owner).await?
        };

        // Adopt a settlement that already landed under our key, if any
        let attempt = debited.submission_attempts.max(1);
        let content_key = derive_content_key(request_id, attempt);
        match self.registry.find_existing(content_key).await {
            Ok(Some(existing)) => {
                info!(request_id, record_id = %existing.record_id, "Reconcile: adopting existing settlement record");
                return self.finalize(request_id, existing);
            }
            Ok(None) => {}
            Err(e) => return Err(OrchestratorError::RegistryUnavailable(e.to_string())),
        }

        self.settle(&debited, owner).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn load_by_id(&self, request_id: &str) -> Result<AuthorizationRequest, OrchestratorError> {
        let request = self.db.get(request_id)?.ok_or(OrchestratorError::NotFound)?;
        self.expire_if_due(request)
    }

    /// Lazy expiry: any read that sees an overdue pending request moves it to
    /// `expired` first, through the same CAS every other transition uses.
    fn expire_if_due(
        &self,
        request: AuthorizationRequest,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        if !request.is_expired_at(Utc::now()) {
            return Ok(request);
        }
        match self.db.transition(
            &request.request_id,
            RequestStatus::Pending,
            RequestStatus::Expired,
            |_| {},
        ) {
            Ok(expired) => {
                info!(request_id = %expired.request_id, "Pending request expired on read");
                Ok(expired)
            }
            // Another caller moved it first; their result stands
            Err(RequestDbError::StatusConflict { .. }) => self
                .db
                .get(&request.request_id)?
                .ok_or(OrchestratorError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn stored_owner(&self, request: &AuthorizationRequest) -> Result<Address, OrchestratorError> {
        parse_address(&request.owner_address).map_err(|_| {
            OrchestratorError::Validation(format!(
                "stored owner identity is malformed: {}",
                request.owner_address
            ))
        })
    }

    /// Map a lost CAS to the error the current status deserves.
    fn conflict_to_error(&self, request_id: &str) -> OrchestratorError {
        match self.load_by_id(request_id) {
            Ok(current) => match current.status {
                RequestStatus::Processed | RequestStatus::Cancelled => {
                    OrchestratorError::AlreadyFinalized {
                        status: current.status,
                        settlement: current.settlement,
                    }
                }
                RequestStatus::Expired => OrchestratorError::Expired,
                RequestStatus::Authorized | RequestStatus::Pending => {
                    OrchestratorError::AuthorizationInFlight
                }
            },
            Err(e) => e,
        }
    }

    /// Issue the credit debit for an `authorized` request and record the
    /// outcome.
    ///
    /// Definitive ledger refusals cancel the request with the reason
    /// recorded. An unconfirmed broadcast parks the hash and keeps the
    /// request `authorized`; only reconciliation resolves it.
    async fn issue_debit(
        &self,
        request: &AuthorizationRequest,
        owner: Address,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        match self.ledger.debit(owner, request.credit_cost).await {
            Ok(confirmation) => {
                info!(
                    request_id = %request.request_id,
                    tx_hash = %confirmation.tx_hash,
                    new_balance = %confirmation.new_balance,
                    "Credit debit confirmed"
                );
                let updated =
                    self.db
                        .update_in_status(&request.request_id, RequestStatus::Authorized, |r| {
                            r.debit = Some(DebitRecord {
                                tx_hash: confirmation.tx_hash.clone(),
                                new_balance: confirmation.new_balance.clone(),
                                debited_at: Utc::now(),
                            });
                            r.pending_debit_tx = None;
                        })?;
                Ok(updated)
            }
            Err(LedgerError::InsufficientBalance { balance, required }) => {
                self.cancel_for_failure(
                    &request.request_id,
                    &format!("insufficient credit balance: have {balance}, need {required}"),
                );
                Err(OrchestratorError::InsufficientBalance { balance, required })
            }
            Err(LedgerError::NotRegistered(identity)) => {
                self.cancel_for_failure(
                    &request.request_id,
                    &format!("owner {identity} is not registered with the credit ledger"),
                );
                Err(OrchestratorError::NotRegistered)
            }
            Err(LedgerError::Unconfirmed { tx_hash }) => {
                warn!(
                    request_id = %request.request_id,
                    tx_hash = %tx_hash,
                    "Debit broadcast without confirmation; holding for reconciliation"
                );
                self.db
                    .update_in_status(&request.request_id, RequestStatus::Authorized, |r| {
                        r.pending_debit_tx = Some(tx_hash.clone());
                    })?;
                Err(OrchestratorError::DebitUnconfirmed { tx_hash })
            }
            Err(LedgerError::Unavailable(msg)) => {
                warn!(
                    request_id = %request.request_id,
                    error = %msg,
                    "Credit ledger unavailable; debit not issued"
                );
                Err(OrchestratorError::LedgerUnavailable(msg))
            }
        }
    }

    /// A ledger refusal that provably moved no credits ends the request.
    fn cancel_for_failure(&self, request_id: &str, reason: &str) {
        let result = self.db.transition(
            request_id,
            RequestStatus::Authorized,
            RequestStatus::Cancelled,
            |r| r.failure_reason = Some(reason.to_string()),
        );
        match result {
            Ok(_) => info!(request_id, reason, "Request cancelled after definitive debit failure"),
            Err(e) => warn!(request_id, error = %e, "Failed to record debit failure"),
        }
    }

    /// Submit the settlement for a debited request and finalize on success.
    async fn settle(
        &self,
        request: &AuthorizationRequest,
        owner: Address,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        let attempt = request.submission_attempts.max(1);
        let content_key = derive_content_key(&request.request_id, attempt);
        let job = SettlementJob {
            owner,
            content_key,
            content: request.content.clone(),
        };

        match self.registry.submit(&job).await {
            Ok(settlement) => self.finalize(&request.request_id, settlement),
            Err(SettlementError::Rejected {
                reason: RejectReason::DuplicateKey,
            }) => {
                // A record already exists under our deterministic key, which
                // means an earlier attempt landed. Adopt it.
                info!(
                    request_id = %request.request_id,
                    "Registry reports a duplicate key; adopting the existing record"
                );
                match self.registry.find_existing(content_key).await {
                    Ok(Some(existing)) => self.finalize(&request.request_id, existing),
                    Ok(None) => Err(OrchestratorError::SettlementRejected {
                        reason: RejectReason::DuplicateKey.to_string(),
                    }),
                    Err(e) => Err(OrchestratorError::RegistryUnavailable(e.to_string())),
                }
            }
            Err(SettlementError::Rejected { reason }) => {
                warn!(
                    request_id = %request.request_id,
                    %reason,
                    "Settlement rejected; request held authorized for reconciliation"
                );
                Err(OrchestratorError::SettlementRejected {
                    reason: reason.to_string(),
                })
            }
            Err(SettlementError::Unconfirmed { tx_hash }) => {
                warn!(
                    request_id = %request.request_id,
                    tx_hash = %tx_hash,
                    "Settlement broadcast without confirmation; holding for reconciliation"
                );
                self.db
                    .update_in_status(&request.request_id, RequestStatus::Authorized, |r| {
                        r.pending_settlement_tx = Some(tx_hash.clone());
                    })?;
                Err(OrchestratorError::SettlementUnconfirmed { tx_hash })
            }
            Err(SettlementError::InvalidField(msg)) => Err(OrchestratorError::SettlementRejected {
                reason: format!("invalid field: {msg}"),
            }),
            Err(SettlementError::Unavailable(msg)) => {
                warn!(
                    request_id = %request.request_id,
                    error = %msg,
                    "Registry unavailable; settlement not submitted"
                );
                Err(OrchestratorError::RegistryUnavailable(msg))
            }
        }
    }

    fn finalize(
        &self,
        request_id: &str,
        settlement: SettlementRecord,
    ) -> Result<AuthorizationRequest, OrchestratorError> {
        let record_id = settlement.record_id.clone();
        let finalized = self.db.transition(
            request_id,
            RequestStatus::Authorized,
            RequestStatus::Processed,
            |r| {
                r.settlement = Some(settlement);
                r.pending_settlement_tx = None;
            },
        )?;
        info!(request_id, record_id = %record_id, "Request processed; settlement recorded");
        Ok(finalized)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::testing::{
        binding, custom_harness, harness, mint_record, DebitMode, MockLedger, MockRegistry,
        SubmitMode,
    };
    use super::*;
    use crate::blockchain::DebitConfirmation;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    // ---- create ----

    #[test]
    fn create_computes_cost_and_reference() {
        let h = harness();
        let created = h.create(2);

        // base 3 + 2 attachments * 2 + record 1
        assert_eq!(created.request.credit_cost, 8);
        assert_eq!(created.request.status, RequestStatus::Pending);
        assert!(created
            .authorization_reference
            .contains(&created.request.auth_token));
        assert!(created
            .authorization_reference
            .contains(&created.request.request_id));
        assert!(created
            .authorization_reference
            .starts_with("https://authorize.example/authorize/"));
    }

    #[test]
    fn create_validates_inputs() {
        let h = harness();

        let err = h
            .orchestrator
            .create("not-an-address", binding(0))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let mut empty_subject = binding(0);
        empty_subject.subject_hash = String::new();
        let err = h
            .orchestrator
            .create(&h.owner(), empty_subject)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn create_twice_yields_distinct_requests() {
        // Dedup of identical content belongs upstream; two creates are two
        // independent pending requests
        let h = harness();
        let first = h.create(1);
        let second = h.create(1);

        assert_ne!(first.request.request_id, second.request.request_id);
        assert!(h.orchestrator.get(&first.request.request_id).is_ok());
        assert!(h.orchestrator.get(&second.request.request_id).is_ok());
    }

    // ---- authorize ----

    #[tokio::test]
    async fn authorize_happy_path_settles_once() {
        let h = harness();
        let created = h.create(2);
        let id = created.request.request_id.clone();

        let processed = h.authorize(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(processed.submission_attempts, 1);

        let settlement = processed.settlement.expect("settlement recorded");
        assert_eq!(settlement.record_id, "1");
        assert_eq!(settlement.tx_hash.as_deref(), Some("0xmint01"));

        let debit = processed.debit.expect("debit recorded");
        assert_eq!(debit.tx_hash, "0xdebit01");
        assert_eq!(debit.new_balance, "92");

        assert_eq!(h.ledger.calls(), 1);
        assert_eq!(h.ledger.amounts(), vec![8]);
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test]
    async fn authorize_retry_returns_original_settlement() {
        let h = harness();
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let first = h.authorize(&id).await.unwrap();
        let original = first.settlement.clone().unwrap();

        let err = h.authorize(&id).await.unwrap_err();
        match err {
            OrchestratorError::AlreadyFinalized {
                status: RequestStatus::Processed,
                settlement: Some(settlement),
            } => {
                assert_eq!(settlement.record_id, original.record_id);
                assert_eq!(settlement.tx_hash, original.tx_hash);
            }
            other => panic!("unexpected error: {other}"),
        }

        // No second side effect of any kind
        assert_eq!(h.ledger.calls(), 1);
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_authorize_debits_and_settles_once() {
        let h = Arc::new(harness());
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { h.authorize(&id).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(processed) => {
                    assert_eq!(processed.status, RequestStatus::Processed);
                    winners += 1;
                }
                Err(OrchestratorError::AlreadyFinalized {
                    status: RequestStatus::Processed,
                    settlement,
                }) => assert!(settlement.is_some()),
                Err(OrchestratorError::AuthorizationInFlight) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(h.ledger.calls(), 1);
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test]
    async fn expired_request_never_authorizes() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::succeeding(),
            Duration::seconds(-1),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Expired));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Expired);
        assert_eq!(h.ledger.calls(), 0);
        assert_eq!(h.registry.submit_count(), 0);
    }

    #[tokio::test]
    async fn wrong_signer_is_rejected_without_state_change() {
        let h = harness();
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let stranger = PrivateKeySigner::random();
        let sig = stranger.sign_message_sync(id.as_bytes()).unwrap();
        let sig_hex = format!("0x{}", alloy::hex::encode(sig.as_bytes()));

        // Claimed owner, signed by someone else
        let err = h
            .orchestrator
            .authorize(&id, &h.owner(), &sig_hex)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized));

        // Claimed stranger, not the bound owner
        let err = h
            .orchestrator
            .authorize(&id, &format!("{:#x}", stranger.address()), &sig_hex)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Pending);
        assert_eq!(h.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn signature_is_not_replayable_across_requests() {
        let h = harness();
        let first = h.create(0);
        let second = h.create(0);

        let sig_for_first = h.sign(&first.request.request_id);
        let err = h
            .orchestrator
            .authorize(&second.request.request_id, &h.owner(), &sig_for_first)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized));

        let current = h.orchestrator.get(&second.request.request_id).unwrap();
        assert_eq!(current.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn insufficient_balance_cancels_with_reason() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Insufficient),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(2);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InsufficientBalance { required: 8, .. }
        ));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Cancelled);
        assert!(current
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("insufficient credit balance"));
        assert!(current.settlement.is_none());
        assert_eq!(h.registry.submit_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_owner_cancels_with_reason() {
        let h = custom_harness(
            MockLedger::new(DebitMode::NotRegistered),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRegistered));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Cancelled);
        assert!(current.failure_reason.is_some());
    }

    #[tokio::test]
    async fn unconfirmed_debit_parks_the_request() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unconfirmed),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DebitUnconfirmed { .. }));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Authorized);
        assert_eq!(current.pending_debit_tx.as_deref(), Some("0xpending-debit"));
        assert!(current.debit.is_none());
        assert_eq!(h.registry.submit_count(), 0);
    }

    #[tokio::test]
    async fn settlement_rejection_leaves_authorized_with_debit() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::new(SubmitMode::Reject(RejectReason::Paused)),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SettlementRejected { .. }));

        // Charged but not settled: never pending again, never silently
        // processed
        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Authorized);
        assert!(current.debit.is_some());
        assert!(current.settlement.is_none());
    }

    #[tokio::test]
    async fn duplicate_key_rejection_adopts_existing_record() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::new(SubmitMode::Reject(RejectReason::DuplicateKey)),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let key = derive_content_key(&id, 1);
        h.registry.set_existing(Some(mint_record("77", key)));

        let processed = h.authorize(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(processed.settlement.unwrap().record_id, "77");
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test]
    async fn ledger_outage_keeps_request_authorized_and_unbroadcast() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unavailable),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::LedgerUnavailable(_)));

        let current = h.orchestrator.get(&id).unwrap();
        assert_eq!(current.status, RequestStatus::Authorized);
        assert!(current.debit.is_none());
        assert!(current.pending_debit_tx.is_none());
    }

    // ---- reconcile ----

    #[tokio::test]
    async fn reconcile_confirms_pending_debit_then_settles() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unconfirmed),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        h.authorize(&id).await.unwrap_err();
        assert_eq!(h.ledger.calls(), 1);

        h.ledger.set_probe(DebitProbe::Confirmed(DebitConfirmation {
            tx_hash: "0xpending-debit".to_string(),
            new_balance: "96".to_string(),
        }));

        let processed = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(processed.debit.unwrap().tx_hash, "0xpending-debit");
        assert!(processed.pending_debit_tx.is_none());

        // The broadcast debit was adopted, not repeated
        assert_eq!(h.ledger.calls(), 1);
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test]
    async fn reconcile_reissues_a_reverted_debit() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unconfirmed),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        h.authorize(&id).await.unwrap_err();
        h.ledger.set_probe(DebitProbe::Reverted);
        h.ledger.set_mode(DebitMode::Succeed);

        let processed = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(h.ledger.calls(), 2);
    }

    #[tokio::test]
    async fn reconcile_issues_a_never_broadcast_debit() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unavailable),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        h.authorize(&id).await.unwrap_err();
        h.ledger.set_mode(DebitMode::Succeed);

        let processed = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert!(processed.debit.is_some());
        assert_eq!(h.ledger.calls(), 2);
    }

    #[tokio::test]
    async fn reconcile_adopts_an_inflight_settlement() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::new(SubmitMode::Unconfirmed),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SettlementUnconfirmed { .. }));

        let parked = h.orchestrator.get(&id).unwrap();
        assert_eq!(parked.status, RequestStatus::Authorized);
        assert_eq!(parked.pending_settlement_tx.as_deref(), Some("0xstuck01"));

        let key = derive_content_key(&id, 1);
        h.registry.set_existing(Some(mint_record("31", key)));

        let processed = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(processed.settlement.unwrap().record_id, "31");
        assert!(processed.pending_settlement_tx.is_none());

        // Found on chain; no resubmission
        assert_eq!(h.registry.submit_count(), 1);
    }

    #[tokio::test]
    async fn reconcile_resubmits_when_nothing_landed() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::new(SubmitMode::Unconfirmed),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        h.authorize(&id).await.unwrap_err();
        h.registry.set_mode(SubmitMode::Succeed);

        let processed = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(processed.status, RequestStatus::Processed);
        assert_eq!(h.registry.submit_count(), 2);
    }

    #[tokio::test]
    async fn reconcile_outside_authorized_is_refused() {
        let h = harness();
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let err = h.orchestrator.reconcile(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let processed = h.authorize(&id).await.unwrap();
        let again = h.orchestrator.reconcile(&id).await.unwrap();
        assert_eq!(
            again.settlement.unwrap().record_id,
            processed.settlement.unwrap().record_id
        );
        assert_eq!(h.registry.submit_count(), 1);
    }

    // ---- cancel ----

    #[tokio::test]
    async fn cancel_applies_to_pending_only() {
        let h = harness();
        let created = h.create(0);
        let id = created.request.request_id.clone();

        let cancelled = h.orchestrator.cancel(&id).unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(cancelled.failure_reason.is_none());

        let err = h.orchestrator.cancel(&id).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AlreadyFinalized {
                status: RequestStatus::Cancelled,
                ..
            }
        ));

        let err = h.authorize(&id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AlreadyFinalized {
                status: RequestStatus::Cancelled,
                ..
            }
        ));
        assert_eq!(h.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn cancel_of_authorized_is_refused() {
        let h = custom_harness(
            MockLedger::new(DebitMode::Unconfirmed),
            MockRegistry::succeeding(),
            Duration::hours(24),
        );
        let created = h.create(0);
        let id = created.request.request_id.clone();

        h.authorize(&id).await.unwrap_err();

        let err = h.orchestrator.cancel(&id).unwrap_err();
        assert!(matches!(err, OrchestratorError::AuthorizationInFlight));
    }

    // ---- invariants ----

    #[tokio::test]
    async fn credit_cost_is_fixed_at_creation() {
        let h = harness();
        let created = h.create(2);
        let id = created.request.request_id.clone();
        assert_eq!(created.request.credit_cost, 8);

        // A second orchestrator over the same store with a different fee
        // schedule must still charge the recorded cost
        let expensive = Orchestrator::new(
            h.db.clone(),
            h.ledger.clone(),
            h.registry.clone(),
            FeeSchedule {
                base_fee: 100,
                attachment_fee: 100,
                record_fee: 100,
            },
            Duration::hours(24),
            "https://authorize.example".to_string(),
        );

        let sig = h.sign(&id);
        expensive.authorize(&id, &h.owner(), &sig).await.unwrap();
        assert_eq!(h.ledger.amounts(), vec![8]);
    }

    #[test]
    fn get_resolves_token_and_expires_lazily() {
        let h = custom_harness(
            MockLedger::succeeding(),
            MockRegistry::succeeding(),
            Duration::seconds(-1),
        );
        let created = h.create(0);

        let by_token = h.orchestrator.get(&created.request.auth_token).unwrap();
        assert_eq!(by_token.request_id, created.request.request_id);
        assert_eq!(by_token.status, RequestStatus::Expired);

        let by_id = h.orchestrator.get(&created.request.request_id).unwrap();
        assert_eq!(by_id.status, RequestStatus::Expired);

        assert!(matches!(
            h.orchestrator.get("unknown").unwrap_err(),
            OrchestratorError::NotFound
        ));
    }

    #[test]
    fn list_pending_excludes_finalized_and_overdue() {
        let h = harness();
        let keep = h.create(0);
        let drop = h.create(0);
        h.orchestrator.cancel(&drop.request.request_id).unwrap();

        let pending = h.orchestrator.list_pending(&h.owner(), 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, keep.request.request_id);

        let err = h.orchestrator.list_pending("nope", 10).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
